pub mod hyperliquid;

use std::future::Future;

use crate::core::leaderboard::Entry;
use crate::error::LeaderboardResult;

/// Anything able to hand over a full leaderboard dataset.
pub trait LeaderboardSource: Send + Sync + 'static {
    /// One read of the whole dataset. An empty dataset is an error, never an empty `Vec`.
    fn fetch_rows(&self) -> impl Future<Output = LeaderboardResult<Vec<Entry>>> + Send;
}
