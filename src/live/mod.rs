mod cursor;

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

pub use cursor::SnapshotCursor;

use crate::RidewatchError;
use crate::config::PipelineConfig;
use crate::incident::{Classification, IncidentClassifier, IncidentReport};
use crate::ride::{Clock, LiveRideTracker, RideEvent, RideSummary};
use crate::telemetry::{SourceUpdate, TelemetryRecord, TelemetrySource};

/// Events a live session publishes to the display layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveOutput {
    Incident(IncidentReport),
    RideUpdate(RideSummary),
    RideEnded(RideSummary),
}

type SharedTracker = Arc<Mutex<LiveRideTracker>>;

/// Running subscription plus ride timeout ticker for one device stream.
///
/// Both threads share the tracker and stop together, either with
/// [`LiveSession::stop`] or when the session is dropped.
pub struct LiveSession {
    tracker: SharedTracker,
    running: Arc<AtomicBool>,
    source_closed: Arc<AtomicBool>,
    sender: Sender<LiveOutput>,
    subscription: Option<JoinHandle<Result<(), RidewatchError>>>,
    ticker: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Start the source and spawn the subscription and ticker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to start or a thread cannot be
    /// spawned.
    pub fn spawn<S>(
        mut source: S,
        config: &PipelineConfig,
        clock: Arc<dyn Clock>,
        sender: Sender<LiveOutput>,
    ) -> Result<Self, RidewatchError>
    where
        S: TelemetrySource + Send + 'static,
    {
        source.start()?;

        let tracker: SharedTracker = Arc::new(Mutex::new(LiveRideTracker::new(config)));
        let running = Arc::new(AtomicBool::new(true));
        let source_closed = Arc::new(AtomicBool::new(false));

        let subscription = {
            let worker = SubscriptionWorker {
                tracker: tracker.clone(),
                classifier: IncidentClassifier::new(config.incident.clone()),
                clock: clock.clone(),
                cursor: SnapshotCursor::new(),
                sender: sender.clone(),
            };
            let running = running.clone();
            let source_closed = source_closed.clone();
            thread::Builder::new()
                .name("ridewatch-subscription".to_string())
                .spawn(move || {
                    let result = worker.run(&mut source, &running);
                    source_closed.store(true, Ordering::SeqCst);
                    result
                })
                .map_err(|e| RidewatchError::LiveSessionError {
                    reason: format!("Could not spawn subscription thread: {}", e),
                })?
        };

        let ticker = {
            let tracker = tracker.clone();
            let running = running.clone();
            let sender = sender.clone();
            let interval = Duration::from_millis(config.live.tick_interval_ms);
            thread::Builder::new()
                .name("ridewatch-ticker".to_string())
                .spawn(move || run_ticker(&tracker, clock.as_ref(), &sender, &running, interval))
                .map_err(|e| RidewatchError::LiveSessionError {
                    reason: format!("Could not spawn ticker thread: {}", e),
                })?
        };

        info!("Live session started");
        Ok(Self {
            tracker,
            running,
            source_closed,
            sender,
            subscription: Some(subscription),
            ticker: Some(ticker),
        })
    }

    /// True once the source reported that no more updates will arrive
    pub fn is_source_closed(&self) -> bool {
        self.source_closed.load(Ordering::SeqCst)
    }

    /// Summary of the live ride, if there is one
    pub fn current_summary(&self) -> Option<RideSummary> {
        lock(&self.tracker).summary()
    }

    /// Stop both threads, then close the ride that is still active.
    ///
    /// Returns the error that ended the subscription, if any.
    pub fn stop(mut self) -> Result<(), RidewatchError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), RidewatchError> {
        self.running.store(false, Ordering::SeqCst);

        let mut result = Ok(());
        if let Some(ticker) = self.ticker.take() {
            ticker.thread().unpark();
            if ticker.join().is_err() {
                result = Err(RidewatchError::LiveSessionError {
                    reason: "Ticker thread panicked".to_string(),
                });
            }
        }
        if let Some(subscription) = self.subscription.take() {
            match subscription.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => result = Err(e),
                Err(_) => {
                    result = Err(RidewatchError::LiveSessionError {
                        reason: "Subscription thread panicked".to_string(),
                    })
                }
            }
        }

        if let Some(summary) = lock(&self.tracker).close() {
            if self.sender.send(LiveOutput::RideEnded(summary)).is_err() {
                debug!("No receiver left for the final ride summary");
            }
        }
        info!("Live session stopped");
        result
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if self.subscription.is_some() || self.ticker.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Live session ended with error: {}", e);
            }
        }
    }
}

fn lock(tracker: &SharedTracker) -> MutexGuard<'_, LiveRideTracker> {
    tracker.lock().unwrap_or_else(|e| e.into_inner())
}

struct SubscriptionWorker {
    tracker: SharedTracker,
    classifier: IncidentClassifier,
    clock: Arc<dyn Clock>,
    cursor: SnapshotCursor,
    sender: Sender<LiveOutput>,
}

impl SubscriptionWorker {
    fn run(
        mut self,
        source: &mut dyn TelemetrySource,
        running: &AtomicBool,
    ) -> Result<(), RidewatchError> {
        while running.load(Ordering::SeqCst) {
            let update = match source.next_update() {
                Ok(Some(update)) => update,
                Ok(None) => {
                    info!("Telemetry source closed");
                    return Ok(());
                }
                Err(e) => {
                    error!("Telemetry source failed: {}", e);
                    return Err(e);
                }
            };
            let records = match update {
                SourceUpdate::Snapshot(snapshot) => self.cursor.advance(&snapshot),
                SourceUpdate::Records(records) => records,
            };
            for record in records {
                if let Err(e) = self.process(&record) {
                    // The receiving side is gone, nobody is listening anymore
                    running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn process(&mut self, record: &TelemetryRecord) -> Result<(), RidewatchError> {
        if let Some(time_ms) = record.time_ms() {
            self.clock.observe(time_ms);
        }

        let report = self.classifier.report(record);
        if report.classification.is_alert()
            || report.classification == Classification::GpsDisconnected
        {
            debug!(
                "{} from {} at {}",
                report.classification, report.device_id, report.timestamp
            );
            self.sender.send(LiveOutput::Incident(report))?;
        }

        let mut tracker = lock(&self.tracker);
        match tracker.on_record(record) {
            RideEvent::Started { ended, .. } => {
                if let Some(ended) = ended {
                    self.sender.send(LiveOutput::RideEnded(ended))?;
                }
                if let Some(summary) = tracker.summary() {
                    self.sender.send(LiveOutput::RideUpdate(summary))?;
                }
            }
            RideEvent::Extended { .. } => {
                if let Some(summary) = tracker.summary() {
                    self.sender.send(LiveOutput::RideUpdate(summary))?;
                }
            }
            RideEvent::KeptAlive { .. }
            | RideEvent::TimedOut { .. }
            | RideEvent::Ignored
            | RideEvent::Unchanged => {}
        }
        Ok(())
    }
}

fn run_ticker(
    tracker: &SharedTracker,
    clock: &dyn Clock,
    sender: &Sender<LiveOutput>,
    running: &AtomicBool,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        thread::park_timeout(interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let mut tracker = lock(tracker);
        if let RideEvent::TimedOut { .. } = tracker.on_tick(clock.now_ms()) {
            if let Some(summary) = tracker.summary() {
                if sender.send(LiveOutput::RideEnded(summary)).is_err() {
                    warn!("Live event receiver dropped, stopping ticker");
                    running.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}
