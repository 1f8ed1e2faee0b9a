use std::collections::VecDeque;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use super::{TelemetryRecord, TelemetrySnapshot, loader::load_records_jsonl};
use crate::RidewatchError;

/// Change notification delivered by a telemetry store.
///
/// Realtime stores either push the whole keyed snapshot on every change or
/// only the records that were added since the last notification.
#[derive(Clone, Debug)]
pub enum SourceUpdate {
    Snapshot(TelemetrySnapshot),
    Records(Vec<TelemetryRecord>),
}

/// Push-based telemetry feed consumed by the live session.
pub trait TelemetrySource {
    /// Connect to the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or opened.
    fn start(&mut self) -> Result<(), RidewatchError>;

    /// Block until the next change notification.
    ///
    /// Returns `Ok(None)` once the source is closed and no further updates
    /// will arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not started or the update cannot be
    /// retrieved.
    fn next_update(&mut self) -> Result<Option<SourceUpdate>, RidewatchError>;
}

/// Replays a JSON Lines recording one record per update.
pub struct JsonlReplaySource {
    file: PathBuf,
    pace: Option<Duration>,
    pending: Option<VecDeque<TelemetryRecord>>,
}

impl JsonlReplaySource {
    /// Create a replay source. With `pace_ms` set the source sleeps
    /// between records to mimic the device sampling rate.
    pub fn new(file: PathBuf, pace_ms: Option<u64>) -> Self {
        Self {
            file,
            pace: pace_ms.map(Duration::from_millis),
            pending: None,
        }
    }
}

impl TelemetrySource for JsonlReplaySource {
    fn start(&mut self) -> Result<(), RidewatchError> {
        let records = load_records_jsonl(&self.file)?;
        info!(
            "Replaying {} records from {:?}",
            records.len(),
            self.file
        );
        self.pending = Some(records.into());
        Ok(())
    }

    fn next_update(&mut self) -> Result<Option<SourceUpdate>, RidewatchError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or(RidewatchError::TelemetrySourceError {
                description: "Replay source not started".to_string(),
            })?;

        let Some(record) = pending.pop_front() else {
            debug!("Replay of {:?} finished", self.file);
            return Ok(None);
        };
        if let Some(pace) = self.pace {
            thread::sleep(pace);
        }
        Ok(Some(SourceUpdate::Records(vec![record])))
    }
}

/// In-memory source for tests and offline processing.
#[derive(Default)]
pub struct MockTelemetrySource {
    updates: VecDeque<SourceUpdate>,
    started: bool,
}

impl MockTelemetrySource {
    pub fn from_updates(updates: Vec<SourceUpdate>) -> Self {
        Self {
            updates: updates.into(),
            started: false,
        }
    }

    /// One update per record
    pub fn from_records(records: Vec<TelemetryRecord>) -> Self {
        Self::from_updates(
            records
                .into_iter()
                .map(|record| SourceUpdate::Records(vec![record]))
                .collect(),
        )
    }
}

impl TelemetrySource for MockTelemetrySource {
    fn start(&mut self) -> Result<(), RidewatchError> {
        self.started = true;
        Ok(())
    }

    fn next_update(&mut self) -> Result<Option<SourceUpdate>, RidewatchError> {
        if !self.started {
            return Err(RidewatchError::TelemetrySourceError {
                description: "Mock source not started".to_string(),
            });
        }
        Ok(self.updates.pop_front())
    }
}
