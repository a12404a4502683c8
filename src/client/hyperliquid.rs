use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::client::LeaderboardSource;
use crate::core::leaderboard::Entry;
use crate::error::{LeaderboardError, LeaderboardResult};

enum Endpoint<'network> {
    Leaderboard(&'network str),
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Leaderboard(network) => write!(f, "/{}/leaderboard", network),
        }
    }
}

// Response from the stats leaderboard endpoint. Other top level fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardResponse {
    #[serde(default)]
    leaderboard_rows: Vec<Entry>,
}

pub struct Hyperliquid {
    http_client: Client,
    base_url: String,
    network: String,
}

impl Hyperliquid {
    pub fn new(base_url: String, network: String, timeout: Duration) -> LeaderboardResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            network,
        })
    }

    async fn get(&self, endpoint: &Endpoint<'_>) -> LeaderboardResult<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("GET {url}");

        let response = self.http_client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => response
                .text()
                .await
                .map_err(|e| LeaderboardError::Parse(e.to_string())),
            status => Err(LeaderboardError::Http(format!("{}", status))),
        }
    }

    pub fn parse_leaderboard(body: &str) -> LeaderboardResult<Vec<Entry>> {
        let parsed = serde_json::from_str::<LeaderboardResponse>(body)?;
        match parsed.leaderboard_rows.is_empty() {
            true => Err(LeaderboardError::EmptyDataset),
            false => Ok(parsed.leaderboard_rows),
        }
    }

    pub async fn leaderboard(&self) -> LeaderboardResult<Vec<Entry>> {
        let body = self.get(&Endpoint::Leaderboard(&self.network)).await?;
        Hyperliquid::parse_leaderboard(&body)
    }
}

impl LeaderboardSource for Hyperliquid {
    async fn fetch_rows(&self) -> LeaderboardResult<Vec<Entry>> {
        self.leaderboard().await
    }
}
