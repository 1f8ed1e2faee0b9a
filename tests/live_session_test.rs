// Replays the sample snapshot through a live session, as the `live`
// subcommand does, and checks the published event stream

use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use ridewatch::ride::ManualClock;
use ridewatch::telemetry::loader::load_snapshot_json;
use ridewatch::telemetry::{JsonlReplaySource, parse_timestamp_ms, snapshot_records};
use ridewatch::{Classification, LiveOutput, LiveSession, PipelineConfig, writer};
use tempfile::TempDir;

fn replay_file(temp_dir: &TempDir) -> PathBuf {
    let sample = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("colombo_snapshot.json");
    let snapshot = load_snapshot_json(&sample).unwrap();
    let path = temp_dir.path().join("replay.jsonl");
    let file = std::fs::File::create(&path).unwrap();
    writer::write_json_lines(file, snapshot_records(&snapshot)).unwrap();
    path
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_replay_publishes_rides_and_incidents() {
    let temp_dir = TempDir::new().unwrap();
    let source = JsonlReplaySource::new(replay_file(&temp_dir), None);
    let mut config = PipelineConfig::default();
    config.live.tick_interval_ms = 10;

    // The clock stays at the start of the recording, only records end rides
    let clock = Arc::new(ManualClock::new(
        parse_timestamp_ms("2025-03-10T08:00:00Z").unwrap(),
    ));
    let (sender, receiver) = mpsc::channel();
    let events_path = temp_dir.path().join("events.jsonl");
    let writer_path = events_path.clone();
    let event_writer = thread::spawn(move || writer::write_events(&writer_path, receiver));

    let session = LiveSession::spawn(source, &config, clock, sender).unwrap();
    wait_until(|| session.is_source_closed());
    session.stop().unwrap();
    let written = event_writer.join().unwrap().unwrap();

    let events: Vec<LiveOutput> = serde_jsonlines::json_lines(&events_path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(events.len(), written);

    let updates = events
        .iter()
        .filter(|e| matches!(e, LiveOutput::RideUpdate(_)))
        .count();
    assert_eq!(updates, 10);

    let ended: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            LiveOutput::RideEnded(summary) => Some(summary),
            _ => None,
        })
        .collect();
    assert_eq!(ended.len(), 2);
    assert_eq!(ended[0].statistics.point_count, 5);
    assert_eq!(ended[1].statistics.point_count, 5);
    assert_ne!(ended[0].ride_id, ended[1].ride_id);
    assert_eq!(ended[1].violation_points, 1);

    let incidents: Vec<Classification> = events
        .iter()
        .filter_map(|e| match e {
            LiveOutput::Incident(report) => Some(report.classification),
            _ => None,
        })
        .collect();
    assert_eq!(
        incidents,
        vec![
            Classification::GpsDisconnected,
            Classification::Speeding,
            Classification::Accident,
            Classification::Fire
        ]
    );
}

#[test]
fn test_clock_drives_timeout_after_replay() {
    let temp_dir = TempDir::new().unwrap();
    let source = JsonlReplaySource::new(replay_file(&temp_dir), None);
    let mut config = PipelineConfig::default();
    config.live.tick_interval_ms = 10;

    let start = parse_timestamp_ms("2025-03-10T08:00:00Z").unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let (sender, receiver) = mpsc::channel();
    let session = LiveSession::spawn(source, &config, clock.clone(), sender).unwrap();
    wait_until(|| session.is_source_closed());
    assert!(session.current_summary().unwrap().is_active);

    // Last record at 08:01:10, the ride times out 10 s later
    clock.set(parse_timestamp_ms("2025-03-10T08:01:20Z").unwrap());
    thread::sleep(Duration::from_millis(50));
    assert!(session.current_summary().unwrap().is_active);

    clock.advance(1);
    wait_until(|| session.current_summary().is_some_and(|s| !s.is_active));
    assert!(!session.current_summary().unwrap().is_active);
    drop(session);

    let ended = receiver
        .try_iter()
        .filter(|e| matches!(e, LiveOutput::RideEnded(_)))
        .count();
    assert_eq!(ended, 2);
}
