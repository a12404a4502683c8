use crate::{
    core::leaderboard::{Batch, Entry, Metric, TimeWindow},
    error::{LeaderboardError, LeaderboardResult},
    storage::SnapshotStore,
};
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

pub const DEFAULT_LIMIT: usize = 10;
// Upper bound of the account value range when no max is given.
pub const ACCOUNT_VALUE_CEILING: f64 = 1e18;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Range {
    /// Windowed metric check. Known quirk: a bound of exactly zero counts as not set, so
    /// `min: 0` does not exclude negative values.
    fn admits(&self, value: f64) -> bool {
        let below = matches!(self.min, Some(min) if min != 0.0 && value < min);
        let above = matches!(self.max, Some(max) if max != 0.0 && value > max);
        !below && !above
    }
}

/// time window => range. A null range is ignored.
pub type WindowRanges = BTreeMap<TimeWindow, Option<Range>>;

/// metric => per-window ranges. A null metric is ignored.
pub type Filter = BTreeMap<Metric, Option<WindowRanges>>;

// `null` reads as the empty value, same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    // Not needed when sorting by account value.
    #[serde(default, alias = "timePeriod")]
    pub time_window: Option<TimeWindow>,
    #[serde(alias = "type")]
    pub metric: Metric,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(default)]
    pub batch_id: Option<u64>,
    #[serde(default, alias = "query")]
    pub search_text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for QuerySpec {
    fn default() -> Self {
        QuerySpec {
            batch_id: None,
            search_text: None,
            filter: Filter::new(),
            sort: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub batch_id: u64,
    pub total_count: usize,
    pub size: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "leaderboardRows")]
    pub rows: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn failed(message: String) -> QueryResult {
        QueryResult {
            rows: vec![],
            pagination: None,
            error: Some(message),
        }
    }
}

/// Batch asked for, or the latest one.
pub fn resolve_batch(
    store: &SnapshotStore,
    batch_id: Option<u64>,
) -> LeaderboardResult<Arc<Batch>> {
    match batch_id {
        Some(id) => store.get(id).ok_or(LeaderboardError::InvalidBatch(id)),
        None => store.latest_batch().ok_or(LeaderboardError::DataUnavailable),
    }
}

/// Answer `spec` against the store. Unknown or missing batches give an empty result with an
/// error message, anything else that fails is a data defect and is returned as an error.
pub fn query(store: &SnapshotStore, spec: &QuerySpec) -> LeaderboardResult<QueryResult> {
    match resolve_batch(store, spec.batch_id).and_then(|batch| evaluate(&batch, spec)) {
        Ok(result) => Ok(result),
        Err(e) if e.is_recoverable_query_error() => Ok(QueryResult::failed(e.to_string())),
        Err(e) => {
            error!("Could not evaluate leaderboard query. {e}");
            Err(e)
        }
    }
}

/// Filter, sort and paginate one batch. Never mutates the batch.
pub fn evaluate(batch: &Batch, spec: &QuerySpec) -> LeaderboardResult<QueryResult> {
    let needle = spec.search_text.as_ref().map(|text| text.to_lowercase());
    let account_value_range = spec
        .filter
        .get(&Metric::AccountValue)
        .and_then(Option::as_ref)
        .map(effective_range);

    let matching = batch
        .iter()
        .filter(|entry| needle.as_ref().map_or(true, |n| entry.matches_text(n)))
        .map(|entry| accepts(entry, account_value_range, &spec.filter).map(|keep| (keep, entry)))
        .filter_ok(|(keep, _)| *keep)
        .map_ok(|(_, entry)| entry)
        .collect::<LeaderboardResult<Vec<&Entry>>>()?;

    let total_count = matching.len();

    let ordered = match &spec.sort {
        Some(sort) => sort_entries(matching, sort)?,
        None => matching,
    };

    let rows = ordered
        .into_iter()
        .skip(spec.offset)
        .take(spec.limit)
        .cloned()
        .collect::<Vec<Entry>>();

    debug!(
        "Batch {}: {} of {} entries match{}, returning {}",
        batch.id(),
        total_count,
        batch.len(),
        spec.sort
            .map(|sort| format!(", sorted by {} {:?}", sort.metric, sort.time_window))
            .unwrap_or_default(),
        rows.len()
    );

    Ok(QueryResult {
        pagination: Some(Pagination {
            batch_id: batch.id(),
            total_count,
            size: rows.len(),
            has_more: total_count > spec.offset.saturating_add(spec.limit),
        }),
        rows,
        error: None,
    })
}

/// Account value is one scalar per entry, so all its per-window ranges collapse into a single
/// bound: the largest min and the smallest max.
pub fn effective_range(ranges: &WindowRanges) -> (f64, f64) {
    ranges
        .values()
        .flatten()
        .fold((0.0, ACCOUNT_VALUE_CEILING), |(min, max), range| {
            (
                min.max(range.min.unwrap_or(0.0)),
                max.min(range.max.unwrap_or(ACCOUNT_VALUE_CEILING)),
            )
        })
}

fn accepts(
    entry: &Entry,
    account_value_range: Option<(f64, f64)>,
    filter: &Filter,
) -> LeaderboardResult<bool> {
    if let Some((min, max)) = account_value_range {
        let account_value = entry.account_value()?;
        if account_value < min || account_value > max {
            return Ok(false);
        }
    }

    let windowed = Metric::windowed()
        .filter_map(|m| filter.get(&m).and_then(Option::as_ref).map(|ranges| (m, ranges)));
    for (metric, windows) in windowed {
        for (window, range) in windows {
            let Some(range) = range else { continue };
            // A missing window never excludes the entry.
            let Some(value) = entry.metric_value(*window, metric) else {
                continue;
            };
            if !range.admits(value?) {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

// Account value ignores the window. Without a window a windowed metric has no value.
fn sort_key(entry: &Entry, sort: &SortSpec) -> Option<LeaderboardResult<f64>> {
    match (sort.metric, sort.time_window) {
        (Metric::AccountValue, _) => Some(entry.account_value()),
        (metric, Some(window)) => entry.metric_value(window, metric),
        (_, None) => None,
    }
}

// Entries lacking the sort window keep their position, the others are stably sorted among the
// remaining positions.
fn sort_entries<'a>(entries: Vec<&'a Entry>, sort: &SortSpec) -> LeaderboardResult<Vec<&'a Entry>> {
    let keys = entries
        .iter()
        .map(|entry| sort_key(entry, sort).transpose())
        .collect::<LeaderboardResult<Vec<Option<f64>>>>()?;

    let mut sorted = keys
        .iter()
        .zip(entries.iter())
        .filter_map(|(key, entry)| key.map(|k| (k, *entry)))
        .sorted_by(|(a, _), (b, _)| sort.direction.apply(a.total_cmp(b)))
        .map(|(_, entry)| entry);

    Ok(keys
        .iter()
        .zip(entries.iter())
        .map(|(key, entry)| match key {
            Some(_) => sorted.next().unwrap_or(*entry),
            None => *entry,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leaderboard::WindowPerformance;
    use chrono::{TimeZone, Utc};
    use strum::IntoEnumIterator;

    fn perf(pnl: &str, roi: &str, vlm: &str) -> WindowPerformance {
        WindowPerformance {
            pnl: pnl.to_string(),
            roi: roi.to_string(),
            vlm: vlm.to_string(),
        }
    }

    fn entry(address: &str, account_value: &str, day_pnl: &str) -> Entry {
        Entry {
            address: address.to_string(),
            account_value: account_value.to_string(),
            display_name: None,
            prize: None,
            window_performances: TimeWindow::iter()
                .map(|w| match w {
                    TimeWindow::Day => (w, perf(day_pnl, "0.1", "1000")),
                    _ => (w, perf("1", "0.1", "1000")),
                })
                .collect(),
        }
    }

    fn without_week(mut entry: Entry) -> Entry {
        entry.window_performances.retain(|(w, _)| *w != TimeWindow::Week);
        entry
    }

    fn batch(entries: Vec<Entry>) -> Batch {
        Batch::new(1, entries)
    }

    fn numbered(n: usize) -> Batch {
        batch(
            (0..n)
                .map(|i| entry(&format!("0x{i:02}"), "100", &i.to_string()))
                .collect(),
        )
    }

    fn addresses(result: &QueryResult) -> Vec<&str> {
        result.rows.iter().map(|e| e.address.as_str()).collect()
    }

    fn parse_spec(json: &str) -> QuerySpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn pagination_of_last_partial_page() {
        let b = numbered(25);
        let spec = QuerySpec {
            offset: 20,
            ..QuerySpec::default()
        };
        let result = evaluate(&b, &spec).unwrap();
        let pagination = result.pagination.unwrap();
        assert_eq!(pagination.size, 5);
        assert_eq!(pagination.total_count, 25);
        assert!(!pagination.has_more);
        assert_eq!(result.rows[0].address, "0x20");
    }

    #[test]
    fn pagination_of_middle_page() {
        let b = numbered(25);
        let spec = QuerySpec {
            offset: 10,
            ..QuerySpec::default()
        };
        let pagination = evaluate(&b, &spec).unwrap().pagination.unwrap();
        assert_eq!(pagination.size, 10);
        assert!(pagination.has_more);
    }

    #[test]
    fn offset_past_the_end_is_an_empty_page() {
        let b = numbered(3);
        let spec = QuerySpec {
            offset: 50,
            ..QuerySpec::default()
        };
        let result = evaluate(&b, &spec).unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.pagination.unwrap().total_count, 3);
    }

    #[test]
    fn default_spec_returns_first_ten_in_upstream_order() {
        let result = evaluate(&numbered(12), &QuerySpec::default()).unwrap();
        assert_eq!(result.rows.len(), DEFAULT_LIMIT);
        assert_eq!(result.rows[0].address, "0x00");
        assert_eq!(result.rows[9].address, "0x09");
    }

    #[test]
    fn account_value_ranges_are_intersected() {
        let b = batch(vec![
            entry("0xlow", "50", "0"),
            entry("0xmid", "300", "0"),
            entry("0xhigh", "600", "0"),
        ]);
        let spec = parse_spec(
            r#"{"filter": {"accountValue": {"day": {"min": 100}, "week": {"max": 500}}}}"#,
        );
        let result = evaluate(&b, &spec).unwrap();
        assert_eq!(addresses(&result), vec!["0xmid"]);
        assert_eq!(result.pagination.unwrap().total_count, 1);
    }

    #[test]
    fn effective_range_defaults() {
        let ranges = BTreeMap::from([(TimeWindow::Day, None)]);
        assert_eq!(effective_range(&ranges), (0.0, ACCOUNT_VALUE_CEILING));

        let ranges = BTreeMap::from([
            (TimeWindow::Day, Some(Range { min: Some(10.0), max: Some(90.0) })),
            (TimeWindow::Month, Some(Range { min: Some(20.0), max: Some(80.0) })),
        ]);
        assert_eq!(effective_range(&ranges), (20.0, 80.0));
    }

    #[test]
    fn windowed_metric_filter() {
        let b = batch(vec![
            entry("0xa", "1", "-5"),
            entry("0xb", "1", "15"),
            entry("0xc", "1", "25"),
        ]);
        let spec = parse_spec(r#"{"filter": {"pnl": {"day": {"min": 10, "max": 20}}}}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xb"]);
    }

    #[test]
    fn zero_bound_on_windowed_metric_is_not_applied() {
        let b = batch(vec![entry("0xa", "1", "-5"), entry("0xb", "1", "15")]);
        let spec = parse_spec(r#"{"filter": {"pnl": {"day": {"min": 0}}}}"#);
        assert_eq!(evaluate(&b, &spec).unwrap().rows.len(), 2);

        let spec = parse_spec(r#"{"filter": {"pnl": {"day": {"max": 0}}}}"#);
        assert_eq!(evaluate(&b, &spec).unwrap().rows.len(), 2);
    }

    #[test]
    fn zero_max_applies_to_account_value_only() {
        let b = batch(vec![entry("0xempty", "0", "5"), entry("0xrich", "10", "5")]);
        let spec = parse_spec(r#"{"filter": {"accountValue": {"day": {"max": 0}}}}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xempty"]);

        let spec = parse_spec(r#"{"filter": {"pnl": {"day": {"max": 0}}}}"#);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0xempty", "0xrich"]
        );
    }

    #[test]
    fn null_filters_are_ignored() {
        let b = batch(vec![entry("0xa", "1", "-5"), entry("0xb", "1", "15")]);

        let spec = parse_spec(r#"{"filter": null}"#);
        assert!(spec.filter.is_empty());
        assert_eq!(evaluate(&b, &spec).unwrap().rows.len(), 2);

        let spec = parse_spec(
            r#"{"filter": {"pnl": null, "accountValue": null, "roi": {"day": null}}}"#,
        );
        assert_eq!(evaluate(&b, &spec).unwrap().rows.len(), 2);

        let spec = parse_spec(r#"{"filter": {"roi": null, "pnl": {"day": {"min": 10}}}}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xb"]);
    }

    #[test]
    fn volume_filter_reads_upstream_vlm() {
        let mut big = entry("0xbig", "1", "0");
        big.window_performances[0].1.vlm = "5000000".to_string();
        let b = batch(vec![entry("0xsmall", "1", "0"), big]);
        let spec = parse_spec(r#"{"filter": {"volume": {"day": {"min": 1000000}}}}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xbig"]);
    }

    #[test]
    fn missing_window_does_not_exclude() {
        let b = batch(vec![
            without_week(entry("0xnoweek", "1", "0")),
            entry("0xweek", "1", "0"),
        ]);
        // week pnl is "1" for the full entry, so the min excludes it
        let spec = parse_spec(r#"{"filter": {"pnl": {"week": {"min": 100}}}}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xnoweek"]);
    }

    #[test]
    fn search_text_matches_address_or_name() {
        let mut named = entry("0x1111", "1", "0");
        named.display_name = Some("MoonBoy".to_string());
        let b = batch(vec![named, entry("0xABCD", "1", "0"), entry("0x2222", "1", "0")]);

        let spec = parse_spec(r#"{"searchText": "moon"}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0x1111"]);

        let spec = parse_spec(r#"{"query": "0xabcd"}"#);
        assert_eq!(addresses(&evaluate(&b, &spec).unwrap()), vec!["0xABCD"]);
    }

    #[test]
    fn end_to_end_sort_by_day_pnl() {
        let b = batch(vec![entry("0xBB", "2000", "-10"), entry("0xAA", "1000", "50")]);
        let spec = parse_spec(
            r#"{"sort": {"metric": "pnl", "timeWindow": "day", "direction": "desc"}, "limit": 10, "offset": 0}"#,
        );
        let result = evaluate(&b, &spec).unwrap();
        assert_eq!(addresses(&result), vec!["0xAA", "0xBB"]);
        let pagination = result.pagination.unwrap();
        assert_eq!(pagination.total_count, 2);
        assert!(!pagination.has_more);
    }

    #[test]
    fn sort_by_account_value_ignores_window() {
        let b = batch(vec![
            entry("0x2", "200", "0"),
            without_week(entry("0x3", "300", "0")),
            entry("0x1", "100", "0"),
        ]);
        let spec = parse_spec(
            r#"{"sort": {"type": "accountValue", "timePeriod": "week", "direction": "asc"}}"#,
        );
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0x1", "0x2", "0x3"]
        );
    }

    #[test]
    fn sort_by_account_value_needs_no_window() {
        let b = batch(vec![
            entry("0x2", "200", "0"),
            entry("0x3", "300", "0"),
            entry("0x1", "100", "0"),
        ]);
        let spec = parse_spec(r#"{"sort": {"type": "accountValue", "direction": "asc"}}"#);
        assert_eq!(spec.sort.unwrap().time_window, None);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0x1", "0x2", "0x3"]
        );
    }

    #[test]
    fn windowed_sort_without_window_keeps_order() {
        let b = batch(vec![
            entry("0xb", "1", "-10"),
            entry("0xa", "1", "50"),
            entry("0xc", "1", "7"),
        ]);
        let spec = parse_spec(r#"{"sort": {"metric": "pnl", "direction": "desc"}}"#);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0xb", "0xa", "0xc"]
        );
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let b = batch(vec![
            entry("0xfirst", "1", "5"),
            entry("0xtop", "1", "9"),
            entry("0xsecond", "1", "5"),
        ]);
        let spec = parse_spec(r#"{"sort": {"metric": "pnl", "timeWindow": "day"}}"#);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0xtop", "0xfirst", "0xsecond"]
        );

        let spec = parse_spec(r#"{"sort": {"metric": "pnl", "timeWindow": "day", "direction": "asc"}}"#);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0xfirst", "0xsecond", "0xtop"]
        );
    }

    #[test]
    fn missing_window_keeps_its_place_when_sorting() {
        let mut low = entry("0xlow", "1", "0");
        low.window_performances[1].1.roi = "0.01".to_string();
        let mut high = entry("0xhigh", "1", "0");
        high.window_performances[1].1.roi = "0.5".to_string();
        let b = batch(vec![low, without_week(entry("0xnoweek", "1", "0")), high]);

        let spec = parse_spec(r#"{"sort": {"metric": "roi", "timeWindow": "week", "direction": "desc"}}"#);
        assert_eq!(
            addresses(&evaluate(&b, &spec).unwrap()),
            vec!["0xhigh", "0xnoweek", "0xlow"]
        );
    }

    #[test]
    fn evaluation_does_not_touch_the_batch() {
        let b = batch(vec![entry("0xBB", "1", "-10"), entry("0xAA", "1", "50")]);
        let spec = parse_spec(r#"{"sort": {"metric": "pnl", "timeWindow": "day"}}"#);
        evaluate(&b, &spec).unwrap();
        assert_eq!(b[0].address, "0xBB");
    }

    #[test]
    fn malformed_number_propagates() {
        let b = batch(vec![entry("0xbad", "lots", "0")]);
        let spec = parse_spec(r#"{"sort": {"metric": "accountValue", "timeWindow": "day"}}"#);
        assert!(matches!(
            evaluate(&b, &spec),
            Err(LeaderboardError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn query_without_data_is_unavailable() {
        let store = SnapshotStore::default();
        let result = query(&store, &QuerySpec::default()).unwrap();
        assert!(result.rows.is_empty());
        assert!(result.pagination.is_none());
        assert_eq!(result.error.as_deref(), Some("Data not available."));
    }

    #[test]
    fn query_unknown_batch_is_invalid() {
        let store = SnapshotStore::default();
        store.put(vec![entry("0x1", "1", "0")]);
        let spec = QuerySpec {
            batch_id: Some(7),
            ..QuerySpec::default()
        };
        let result = query(&store, &spec).unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.error.as_deref(), Some("Invalid ID."));
    }

    #[test]
    fn query_reads_requested_or_latest_batch() {
        let store = SnapshotStore::default();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap();
        let old = store.put_at(vec![entry("0xold", "1", "0")], t);
        let new = store.put_at(vec![entry("0xnew", "1", "0")], t + chrono::Duration::minutes(5));

        let latest = query(&store, &QuerySpec::default()).unwrap();
        assert_eq!(addresses(&latest), vec!["0xnew"]);
        assert_eq!(latest.pagination.unwrap().batch_id, new);

        let spec = QuerySpec {
            batch_id: Some(old),
            ..QuerySpec::default()
        };
        assert_eq!(addresses(&query(&store, &spec).unwrap()), vec!["0xold"]);
    }

    #[test]
    fn result_serializes_to_wire_names() {
        let result = evaluate(&numbered(1), &QuerySpec::default()).unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["pagination"]["totalCount"], 1);
        assert_eq!(value["pagination"]["hasMore"], false);
        assert_eq!(value["pagination"]["batchId"], 1);
        assert_eq!(value["leaderboardRows"][0]["ethAddress"], "0x00");
        assert!(value.get("error").is_none());
    }
}
