use crate::cli::Cli;
use crate::error::{LeaderboardError, LeaderboardResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

const TRACE_LEVELS: [&'static str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
const LOCAL_SETTINGS_YAML_FILE: &str = ".env.local.yaml";

// All settings may be configured via environment variables. Example:
// REFRESH_INTERVAL_SEC="60" would set refresh_interval_sec to 60.
// A local yaml file is read first when present, command line flags win over everything.
#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_trace_level")]
    trace_level: String,
    #[serde(default = "default_stats_base_url")]
    pub stats_base_url: String,
    // Mainnet or Testnet
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_api_timeout_sec")]
    pub api_timeout_sec: u64,
    // Normal cadence between two successful refreshes
    #[serde(default = "default_refresh_interval_sec")]
    pub refresh_interval_sec: u64,
    // Short cadence after a failed or empty fetch
    #[serde(default = "default_retry_interval_sec")]
    pub retry_interval_sec: u64,
    // Age after which a non-latest batch is evicted
    #[serde(default = "default_retention_sec")]
    pub retention_sec: u64,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Settings {
    pub fn new(cli: Cli) -> LeaderboardResult<Self> {
        let figment = match Path::new(LOCAL_SETTINGS_YAML_FILE).exists() {
            true => {
                println!(
                    "\n######################################\n\
                       ##   Found '.env.local.yaml' file,  ##\n\
                       ##   loading local configuration.   ##\n\
                       ######################################\n\
                    "
                );
                Figment::new().merge(Yaml::file(LOCAL_SETTINGS_YAML_FILE))
            }
            false => Figment::new(),
        };

        Self::from_figment(figment.merge(Env::raw()).merge(Serialized::defaults(cli)))
    }

    pub fn from_figment(figment: Figment) -> LeaderboardResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The latest batch must never be old enough to be evicted, so the retention window has to
    /// outlast one full refresh cycle including its fetch ceiling.
    pub fn validate(&self) -> LeaderboardResult<()> {
        if self.refresh_interval_sec == 0 || self.retry_interval_sec == 0 {
            return Err(LeaderboardError::Config(
                "refresh and retry intervals must be greater than zero".to_string(),
            ));
        }
        if self.retention_sec <= self.refresh_interval_sec + self.api_timeout_sec {
            return Err(LeaderboardError::Config(format!(
                "retention_sec ({}) must exceed refresh_interval_sec + api_timeout_sec ({})",
                self.retention_sec,
                self.refresh_interval_sec + self.api_timeout_sec
            )));
        }
        Ok(())
    }

    pub fn get_trace_level(&self) -> Level {
        get_trace_level(&self.trace_level)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_sec)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_sec)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_sec)
    }
}

fn get_trace_level(level_str: &str) -> Level {
    match level_str.to_uppercase().as_str() {
        level if level == TRACE_LEVELS[0] => Level::TRACE,
        level if level == TRACE_LEVELS[1] => Level::DEBUG,
        level if level == TRACE_LEVELS[2] => Level::INFO,
        level if level == TRACE_LEVELS[3] => Level::WARN,
        level if level == TRACE_LEVELS[4] => Level::ERROR,
        // Default trace level
        _ => Level::INFO,
    }
}

fn default_trace_level() -> String {
    "INFO".to_string()
}

fn default_stats_base_url() -> String {
    "https://stats-data.hyperliquid.xyz".to_string()
}

fn default_network() -> String {
    "Mainnet".to_string()
}

fn default_api_timeout_sec() -> u64 {
    30
}

fn default_refresh_interval_sec() -> u64 {
    300
}

fn default_retry_interval_sec() -> u64 {
    5
}

fn default_retention_sec() -> u64 {
    3600
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}
