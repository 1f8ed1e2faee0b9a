use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;

use ridewatch::{
    IncidentClassifier, LiveSession, PipelineConfig, RideAggregator, RideSegmenter,
    RideStatistics, RidewatchError,
    ride::{ReplayClock, format_duration},
    telemetry::{JsonlReplaySource, loader::load_records},
    writer,
};

const SHUTDOWN_POLL_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Configuration file, defaults to the one in the user config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split recorded telemetry into rides and print their statistics
    Rides {
        /// Snapshot (.json) or records (.jsonl) file
        #[arg(short, long)]
        input: PathBuf,

        /// Reference time for the recency window and ride activity (RFC 3339)
        #[arg(short, long)]
        now: Option<String>,
    },
    /// Classify every record and write incident reports as JSON Lines
    Classify {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only keep records that raise an alert
        #[arg(short, long, default_value_t = false)]
        alerts_only: bool,
    },
    /// Replay a recording through the live pipeline
    Live {
        #[arg(short, long)]
        input: PathBuf,

        /// Delay between replayed records
        #[arg(short, long)]
        pace_ms: Option<u64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct RideReport<'a> {
    id: &'a str,
    device_id: &'a str,
    is_active: bool,
    duration: String,
    statistics: RideStatistics,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, RidewatchError> {
    match path {
        Some(path) => PipelineConfig::from_path(path),
        None => Ok(PipelineConfig::from_local_file()?.unwrap_or_default()),
    }
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write + Send>, RidewatchError> {
    match output {
        Some(path) => {
            let file = File::create(path).map_err(|e| RidewatchError::WriterError { source: e })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn rides(config: &PipelineConfig, input: &Path, now: Option<&str>) -> Result<(), RidewatchError> {
    let now_ms = match now {
        Some(now) => DateTime::parse_from_rfc3339(now)
            .map_err(|e| RidewatchError::InvalidConfig {
                field: "now".to_string(),
                reason: e.to_string(),
            })?
            .timestamp_millis(),
        None => Utc::now().timestamp_millis(),
    };

    let records = load_records(input)?;
    let by_date = RideSegmenter::new(config).segment_records(records, now_ms);
    if by_date.is_empty() {
        warn!("No rides found, records older than the recency window are ignored");
    }

    let aggregator = RideAggregator::from_config(config);
    let report: BTreeMap<&str, Vec<RideReport>> = by_date
        .iter()
        .map(|(date, rides)| {
            let rides = rides
                .iter()
                .map(|ride| {
                    let statistics = aggregator.statistics(ride);
                    RideReport {
                        id: ride.id(),
                        device_id: ride.device_id(),
                        is_active: ride.is_active(),
                        duration: format_duration(statistics.duration_ms),
                        statistics,
                    }
                })
                .collect();
            (date.as_str(), rides)
        })
        .collect();

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)
        .map_err(|e| RidewatchError::WriterError { source: e.into() })?;
    writeln!(stdout).map_err(|e| RidewatchError::WriterError { source: e })
}

fn classify(
    config: &PipelineConfig,
    input: &Path,
    output: Option<&Path>,
    alerts_only: bool,
) -> Result<(), RidewatchError> {
    let records = load_records(input)?;
    let classifier = IncidentClassifier::new(config.incident.clone());
    let reports = records
        .iter()
        .map(|record| classifier.report(record))
        .filter(|report| !alerts_only || report.classification.is_alert());
    let written = writer::write_json_lines(output_writer(output)?, reports)?;
    info!("Wrote {} incident reports", written);
    Ok(())
}

fn live(
    config: &PipelineConfig,
    input: &Path,
    pace_ms: Option<u64>,
    output: Option<&Path>,
) -> Result<(), RidewatchError> {
    if !input.exists() {
        return Err(RidewatchError::InvalidTelemetryFile {
            path: format!("{:?}", input),
        });
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("Exiting...");
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| RidewatchError::LiveSessionError {
            reason: format!("Could not set Ctrl-C handler: {}", e),
        })?;
    }

    let (event_tx, event_rx) = mpsc::channel();
    let sink = output_writer(output)?;
    let event_writer = thread::spawn(move || writer::write_events_to(sink, event_rx));

    let source = JsonlReplaySource::new(input.to_path_buf(), pace_ms);
    let session = LiveSession::spawn(source, config, Arc::new(ReplayClock::new()), event_tx)?;
    while running.load(Ordering::SeqCst) && !session.is_source_closed() {
        thread::sleep(Duration::from_millis(SHUTDOWN_POLL_MS));
    }
    let session_result = session.stop();

    let written = event_writer
        .join()
        .map_err(|_| RidewatchError::LiveSessionError {
            reason: "Event writer thread panicked".to_string(),
        })??;
    info!("Wrote {} live events", written);
    session_result
}

fn run(cli: Args) -> Result<(), RidewatchError> {
    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Commands::Rides { input, now } => rides(&config, input, now.as_deref()),
        Commands::Classify {
            input,
            output,
            alerts_only,
        } => classify(&config, input, output.as_deref(), *alerts_only),
        Commands::Live {
            input,
            pace_ms,
            output,
        } => live(&config, input, *pace_ms, output.as_deref()),
    }
}

fn main() -> ExitCode {
    colog::init();

    let cli = Args::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
