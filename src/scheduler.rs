use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::LeaderboardSource;
use crate::config::Settings;
use crate::error::{LeaderboardError, LeaderboardResult};
use crate::storage::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefresherState {
    Idle,
    Fetching,
}

/// Keeps the snapshot store fed. Refreshes on the normal cadence after a committed batch and on
/// the short retry cadence after any failure.
pub struct Refresher<S> {
    store: SnapshotStore,
    source: S,
    refresh_interval: Duration,
    retry_interval: Duration,
    fetch_timeout: Duration,
    state: watch::Sender<RefresherState>,
}

impl<S: LeaderboardSource> Refresher<S> {
    pub fn new(store: SnapshotStore, source: S, settings: &Settings) -> Self {
        Refresher::with_intervals(
            store,
            source,
            settings.refresh_interval(),
            settings.retry_interval(),
            settings.api_timeout(),
        )
    }

    pub fn with_intervals(
        store: SnapshotStore,
        source: S,
        refresh_interval: Duration,
        retry_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(RefresherState::Idle);
        Refresher {
            store,
            source,
            refresh_interval,
            retry_interval,
            fetch_timeout,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RefresherState> {
        self.state.subscribe()
    }

    /// One fetch. Commits a batch and returns its id, or leaves the store untouched.
    pub async fn refresh_once(&self) -> LeaderboardResult<u64> {
        self.state.send_replace(RefresherState::Fetching);
        info!("Fetching leaderboard...");

        let fetched = match time::timeout(self.fetch_timeout, self.source.fetch_rows()).await {
            Ok(fetched) => fetched,
            Err(_) => Err(LeaderboardError::Timeout(self.fetch_timeout.as_secs())),
        };
        self.state.send_replace(RefresherState::Idle);

        let rows = fetched?;
        if rows.is_empty() {
            return Err(LeaderboardError::EmptyDataset);
        }

        let n_rows = rows.len();
        let id = self.store.put(rows);
        info!("[{id}] Leaderboard updated with {n_rows} rows");
        Ok(id)
    }

    pub fn next_delay(&self, outcome: &LeaderboardResult<u64>) -> Duration {
        match outcome {
            Ok(_) => self.refresh_interval,
            Err(_) => self.retry_interval,
        }
    }

    /// Refresh right away, then keep re-arming until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting leaderboard refresher.");
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.refresh_once() => outcome,
            };

            match &outcome {
                Ok(_) => {}
                Err(LeaderboardError::EmptyDataset) => {
                    warn!("Upstream returned no leaderboard rows, keeping cached batches")
                }
                Err(e) => error!("Could not update leaderboard cache. {e}"),
            }

            let delay = self.next_delay(&outcome);
            info!("Next leaderboard refresh in {:?}", delay);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }
        self.state.send_replace(RefresherState::Idle);
        info!("Leaderboard refresher stopped.");
    }
}
