use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use super::{TelemetryRecord, TelemetrySnapshot, snapshot_records};
use crate::RidewatchError;

/// Decode one record, logging and dropping it when its shape is unusable
fn decode_record(value: Value, origin: &str) -> Option<TelemetryRecord> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping malformed record {}: {}", origin, e);
            None
        }
    }
}

/// Load a store snapshot: one JSON object keyed by timestamp whose values
/// are records. Entries that cannot be decoded are skipped.
pub fn load_snapshot_json(source_file: &Path) -> Result<TelemetrySnapshot, RidewatchError> {
    let file =
        File::open(source_file).map_err(|e| RidewatchError::TelemetryLoaderError { source: e })?;
    let entries: BTreeMap<String, Value> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| RidewatchError::TelemetryParseError { source: e })?;
    let total = entries.len();
    let snapshot: TelemetrySnapshot = entries
        .into_iter()
        .filter_map(|(key, value)| {
            let record = decode_record(value, &key)?;
            Some((key, record))
        })
        .collect();
    info!(
        "Loaded snapshot {:?} with {} records ({} skipped)",
        source_file,
        snapshot.len(),
        total - snapshot.len()
    );
    Ok(snapshot)
}

/// Load a JSON Lines file with one record per line, as written by a
/// device log dump or by [`JsonlReplaySource`](super::JsonlReplaySource)
/// recordings. Lines that are not valid records are skipped.
pub fn load_records_jsonl(source_file: &Path) -> Result<Vec<TelemetryRecord>, RidewatchError> {
    let mut skipped = 0;
    let records: Vec<TelemetryRecord> = serde_jsonlines::json_lines::<Value, _>(source_file)
        .map_err(|e| RidewatchError::TelemetryLoaderError { source: e })?
        .enumerate()
        .filter_map(|(index, line)| {
            let record = match line {
                Ok(value) => decode_record(value, &format!("on line {}", index + 1)),
                Err(e) => {
                    warn!("Skipping unreadable line {}: {}", index + 1, e);
                    None
                }
            };
            if record.is_none() {
                skipped += 1;
            }
            record
        })
        .collect();
    info!(
        "Loaded {:?} with {} records ({} skipped)",
        source_file,
        records.len(),
        skipped
    );
    Ok(records)
}

/// Load records from either format, chosen by file extension (`.jsonl`
/// for JSON Lines, anything else is read as a snapshot object)
pub fn load_records(source_file: &Path) -> Result<Vec<TelemetryRecord>, RidewatchError> {
    if !source_file.exists() {
        return Err(RidewatchError::InvalidTelemetryFile {
            path: format!("{:?}", source_file),
        });
    }

    let is_jsonl = source_file
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);

    if is_jsonl {
        load_records_jsonl(source_file)
    } else {
        let snapshot = load_snapshot_json(source_file)?;
        let records = snapshot_records(&snapshot);
        let without_time = records.iter().filter(|r| r.time_ms().is_none()).count();
        if without_time > 0 {
            warn!(
                "{} records in {:?} have an unusable timestamp",
                without_time, source_file
            );
        }
        Ok(records)
    }
}
