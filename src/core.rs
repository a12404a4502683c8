pub mod leaderboard;
pub mod query;
