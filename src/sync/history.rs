use crate::models::{HistoryItem, HISTORY_TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Seconds since the epoch; unparsable timestamps count as the oldest possible.
fn timestamp_key(item: &HistoryItem) -> i64 {
    NaiveDateTime::parse_from_str(item.timestamp.trim(), HISTORY_TIMESTAMP_FORMAT)
        .map(|ts| ts.and_utc().timestamp())
        .unwrap_or(0)
}

/// Newest first: timestamp, then numeric id, then raw id.
fn newest_first(a: &HistoryItem, b: &HistoryItem) -> Ordering {
    timestamp_key(b)
        .cmp(&timestamp_key(a))
        .then_with(|| b.id.parse::<i64>().ok().cmp(&a.id.parse::<i64>().ok()))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn sort_history(items: &mut [HistoryItem]) {
    items.sort_by(newest_first);
}

/// Combine local and remote history by id.
///
/// A record present locally is kept whole; remote-only records are adopted as-is.
pub fn union_history(local: &[HistoryItem], remote: &[HistoryItem]) -> Vec<HistoryItem> {
    let mut seen = HashSet::new();
    let mut merged: Vec<HistoryItem> = local
        .iter()
        .chain(remote.iter())
        .filter(|item| seen.insert(item.id.as_str()))
        .cloned()
        .collect();
    sort_history(&mut merged);
    merged
}

/// Ids in `remote` that `local` does not have.
pub fn missing_ids<'a>(local: &[HistoryItem], remote: &'a [HistoryItem]) -> Vec<&'a str> {
    let known: HashSet<&str> = local.iter().map(|item| item.id.as_str()).collect();
    remote
        .iter()
        .map(|item| item.id.as_str())
        .filter(|id| !known.contains(id))
        .collect()
}
