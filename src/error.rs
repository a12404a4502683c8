use std::error::Error;
use std::fmt;

/// Custom Error and Result types to unify errors from all sources.
pub type LeaderboardResult<T> = Result<T, LeaderboardError>;

#[derive(Debug)]
pub enum LeaderboardError {
    Http(String),
    // Upstream call exceeded its ceiling (seconds).
    Timeout(u64),
    EmptyDataset,
    Parse(String),
    DataUnavailable,
    InvalidBatch(u64),
    MalformedEntry {
        address: String,
        field: &'static str,
        value: String,
    },
    Config(String),
    Server(String),
}

impl LeaderboardError {
    /// Errors a caller can recover from by rendering an empty result with a message.
    pub fn is_recoverable_query_error(&self) -> bool {
        matches!(
            self,
            LeaderboardError::DataUnavailable | LeaderboardError::InvalidBatch(_)
        )
    }
}

impl fmt::Display for LeaderboardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LeaderboardError::Http(s) => write!(f, "HTTP Error: {}", s),
            LeaderboardError::Timeout(secs) => {
                write!(f, "Timeout Error: upstream did not answer within {}s", secs)
            }
            LeaderboardError::EmptyDataset => write!(f, "No leaderboard data found"),
            LeaderboardError::Parse(s) => write!(f, "Parse Error: {}", s),
            // Both messages below are sent back verbatim to query callers.
            LeaderboardError::DataUnavailable => write!(f, "Data not available."),
            LeaderboardError::InvalidBatch(_) => write!(f, "Invalid ID."),
            LeaderboardError::MalformedEntry {
                address,
                field,
                value,
            } => write!(
                f,
                "Malformed Entry: {} of {} is not a number ({:?})",
                field, address, value
            ),
            LeaderboardError::Config(s) => write!(f, "Config Error: {}", s),
            LeaderboardError::Server(s) => write!(f, "Server Error: {}", s),
        }
    }
}

impl Error for LeaderboardError {}

impl From<reqwest::Error> for LeaderboardError {
    fn from(error: reqwest::Error) -> Self {
        LeaderboardError::Http(error.to_string())
    }
}

impl From<serde_json::Error> for LeaderboardError {
    fn from(error: serde_json::Error) -> Self {
        LeaderboardError::Parse(error.to_string())
    }
}

impl From<figment::Error> for LeaderboardError {
    fn from(error: figment::Error) -> Self {
        LeaderboardError::Config(error.to_string())
    }
}

impl From<std::io::Error> for LeaderboardError {
    fn from(error: std::io::Error) -> Self {
        LeaderboardError::Server(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_errors_render_caller_messages() {
        assert_eq!(
            LeaderboardError::DataUnavailable.to_string(),
            "Data not available."
        );
        assert_eq!(LeaderboardError::InvalidBatch(42).to_string(), "Invalid ID.");
        assert!(LeaderboardError::InvalidBatch(42).is_recoverable_query_error());
        assert!(!LeaderboardError::EmptyDataset.is_recoverable_query_error());
    }
}
