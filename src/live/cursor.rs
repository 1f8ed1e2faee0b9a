use std::collections::HashSet;

use log::debug;

use crate::telemetry::{TelemetryRecord, TelemetrySnapshot, snapshot_records};

/// Remembers how far into a growing snapshot the session has read.
///
/// Stores deliver the full keyed snapshot on every change. The cursor keeps
/// a high-water mark on record time plus the keys seen at that instant, so
/// each record is handed out once and in time order.
#[derive(Debug, Default)]
pub struct SnapshotCursor {
    last_ms: Option<i64>,
    keys_at_last: HashSet<String>,
}

impl SnapshotCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that are newer than anything returned before, oldest first
    pub fn advance(&mut self, snapshot: &TelemetrySnapshot) -> Vec<TelemetryRecord> {
        let mut fresh: Vec<(i64, String, TelemetryRecord)> = snapshot
            .keys()
            .zip(snapshot_records(snapshot))
            .filter_map(|(key, record)| match record.time_ms() {
                Some(time_ms) => Some((time_ms, key.clone(), record)),
                None => {
                    debug!("Skipping snapshot entry {} without a usable timestamp", key);
                    None
                }
            })
            .filter(|(time_ms, key, _)| match self.last_ms {
                Some(last) if *time_ms < last => false,
                Some(last) if *time_ms == last => !self.keys_at_last.contains(key),
                _ => true,
            })
            .collect();
        fresh.sort_by_key(|(time_ms, _, _)| *time_ms);

        if let Some((newest, _, _)) = fresh.last() {
            let newest = *newest;
            if self.last_ms != Some(newest) {
                self.keys_at_last.clear();
                self.last_ms = Some(newest);
            }
            self.keys_at_last.extend(
                fresh
                    .iter()
                    .filter(|(time_ms, _, _)| *time_ms == newest)
                    .map(|(_, key, _)| key.clone()),
            );
        }
        fresh.into_iter().map(|(_, _, record)| record).collect()
    }
}
