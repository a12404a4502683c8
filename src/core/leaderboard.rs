use crate::error::{LeaderboardError, LeaderboardResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::Deref;
use strum::{EnumIter, IntoEnumIterator};

/// Reporting periods, in the order the upstream lists them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "camelCase")]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    AllTime,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter,
)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Pnl,
    Roi,
    #[serde(alias = "vlm")]
    Volume,
    AccountValue,
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeWindow::Day => write!(f, "day"),
            TimeWindow::Week => write!(f, "week"),
            TimeWindow::Month => write!(f, "month"),
            TimeWindow::AllTime => write!(f, "allTime"),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Metric::Pnl => write!(f, "pnl"),
            Metric::Roi => write!(f, "roi"),
            Metric::Volume => write!(f, "volume"),
            Metric::AccountValue => write!(f, "accountValue"),
        }
    }
}

impl Metric {
    /// Metrics reported once per time window. `AccountValue` is a single scalar per entry.
    pub fn windowed() -> impl Iterator<Item = Metric> {
        Metric::iter().filter(|m| *m != Metric::AccountValue)
    }
}

/// Performance over one time window. Numbers are kept as the upstream strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPerformance {
    pub pnl: String,
    pub roi: String,
    pub vlm: String,
}

impl WindowPerformance {
    /// Raw string of a windowed metric. `None` for `AccountValue`, which is not windowed.
    pub fn raw(&self, metric: Metric) -> Option<&str> {
        match metric {
            Metric::Pnl => Some(&self.pnl),
            Metric::Roi => Some(&self.roi),
            Metric::Volume => Some(&self.vlm),
            Metric::AccountValue => None,
        }
    }
}

// Leaderboard row as served by the stats endpoint, serialized back in the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(rename = "ethAddress")]
    pub address: String,
    pub account_value: String,
    // Upstream sends null for users without a label
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prize: Option<serde_json::Number>,
    #[serde(default, deserialize_with = "known_windows")]
    pub window_performances: Vec<(TimeWindow, WindowPerformance)>,
}

// Periods this service does not know about (e.g. `perpDay`) are dropped instead of failing the
// whole row.
fn known_windows<'de, D>(
    deserializer: D,
) -> Result<Vec<(TimeWindow, WindowPerformance)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<(String, serde_json::Value)>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|(label, performance)| {
            TimeWindow::iter()
                .find(|w| w.to_string() == label)
                .map(|window| (window, performance))
        })
        .map(|(window, performance)| {
            serde_json::from_value(performance)
                .map(|performance| (window, performance))
                .map_err(D::Error::custom)
        })
        .collect()
}

impl Entry {
    pub fn performance(&self, window: TimeWindow) -> Option<&WindowPerformance> {
        self.window_performances
            .iter()
            .find(|(w, _)| *w == window)
            .map(|(_, performance)| performance)
    }

    pub fn account_value(&self) -> LeaderboardResult<f64> {
        parse_number(&self.address, "accountValue", &self.account_value)
    }

    /// Numeric value of `metric` for `window`. `None` when the entry has no such window.
    /// `AccountValue` ignores the window.
    pub fn metric_value(
        &self,
        window: TimeWindow,
        metric: Metric,
    ) -> Option<LeaderboardResult<f64>> {
        match metric {
            Metric::AccountValue => Some(self.account_value()),
            Metric::Pnl => self.windowed_value(window, metric, "pnl"),
            Metric::Roi => self.windowed_value(window, metric, "roi"),
            Metric::Volume => self.windowed_value(window, metric, "vlm"),
        }
    }

    fn windowed_value(
        &self,
        window: TimeWindow,
        metric: Metric,
        field: &'static str,
    ) -> Option<LeaderboardResult<f64>> {
        self.performance(window)
            .and_then(|p| p.raw(metric))
            .map(|raw| parse_number(&self.address, field, raw))
    }

    /// `needle` is expected lower-cased already.
    pub fn matches_text(&self, needle: &str) -> bool {
        self.address.to_lowercase().contains(needle)
            || self
                .display_name
                .as_ref()
                .map_or(false, |name| name.to_lowercase().contains(needle))
    }
}

fn parse_number(address: &str, field: &'static str, raw: &str) -> LeaderboardResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| LeaderboardError::MalformedEntry {
            address: address.to_string(),
            field,
            value: raw.to_string(),
        })
}

type Entries = Vec<Entry>;

/// One immutable snapshot of the full leaderboard. Entries keep the upstream order.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    entries: Entries,
}

impl Batch {
    pub fn new(id: u64, entries: Entries) -> Batch {
        Batch { id, entries }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

// Read-only view: a batch is never mutated once built.
impl Deref for Batch {
    type Target = [Entry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
