use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::mpsc::Receiver,
};

use log::{debug, error};
use serde::Serialize;
use serde_jsonlines::JsonLinesWriter;

use crate::{RidewatchError, live::LiveOutput};

/// Drain live events into a JSON Lines file until every sender is gone.
/// Returns the number of events written.
pub fn write_events(file: &Path, event_receiver: Receiver<LiveOutput>) -> Result<usize, RidewatchError> {
    let event_file = File::create(file).map_err(|e| RidewatchError::WriterError { source: e })?;
    write_events_to(BufWriter::new(event_file), event_receiver)
}

pub fn write_events_to<W: Write>(
    writer: W,
    event_receiver: Receiver<LiveOutput>,
) -> Result<usize, RidewatchError> {
    let mut event_writer = JsonLinesWriter::new(writer);
    let mut written = 0;
    for event in &event_receiver {
        match event_writer.write(&event) {
            Ok(()) => written += 1,
            Err(e) => error!("Error while writing live event: {}", e),
        }
    }
    event_writer
        .flush()
        .map_err(|e| RidewatchError::WriterError { source: e })?;
    debug!("Event writer finished after {} events", written);
    Ok(written)
}

/// Write any serializable values, one JSON document per line
pub fn write_json_lines<W, T, I>(writer: W, values: I) -> Result<usize, RidewatchError>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut lines = JsonLinesWriter::new(writer);
    let mut written = 0;
    for value in values {
        lines
            .write(&value)
            .map_err(|e| RidewatchError::WriterError { source: e })?;
        written += 1;
    }
    lines
        .flush()
        .map_err(|e| RidewatchError::WriterError { source: e })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentClassifier;
    use crate::telemetry::test_support::{record_at, ts};
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn test_events_written_until_channel_closes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("events.jsonl");
        let (sender, receiver) = mpsc::channel();
        let classifier = IncidentClassifier::default();
        for speed in [70., 80.] {
            sender
                .send(LiveOutput::Incident(
                    classifier.report(&record_at(&ts(0), 6.9, 79.9, speed)),
                ))
                .unwrap();
        }
        drop(sender);

        assert_eq!(write_events(&path, receiver).unwrap(), 2);
        let events: Vec<LiveOutput> = serde_jsonlines::json_lines(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], LiveOutput::Incident(r) if r.timestamp == ts(0)));
    }

    #[test]
    fn test_json_lines_to_buffer() {
        let mut buffer = Vec::new();
        let written = write_json_lines(&mut buffer, [1, 2, 3]).unwrap();
        assert_eq!(written, 3);
        assert_eq!(String::from_utf8(buffer).unwrap(), "1\n2\n3\n");
    }

    #[test]
    fn test_unwritable_path() {
        let temp_dir = TempDir::new().unwrap();
        let (_sender, receiver) = mpsc::channel();
        let result = write_events(&temp_dir.path().join("missing").join("events.jsonl"), receiver);
        assert!(matches!(result, Err(RidewatchError::WriterError { .. })));
    }
}
