use clap::Parser;
use serde::Serialize;

/// Command line overrides, merged on top of the file and environment settings.
#[derive(Debug, Parser, Serialize)]
#[command(name = "hl-leaderboard", about = "Cached, queryable leaderboard snapshots")]
pub struct Cli {
    /// Address the query endpoint listens on, e.g. 127.0.0.1:3000
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    /// Upstream network, Mainnet or Testnet
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// One of TRACE, DEBUG, INFO, WARN, ERROR
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_level: Option<String>,
}
