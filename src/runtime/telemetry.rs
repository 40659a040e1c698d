use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing how deliveries were finalized.
#[derive(Default, Debug)]
pub struct Telemetry {
    acked: AtomicU64,
    requeued: AtomicU64,
    skipped: AtomicU64,
    handler_failures: AtomicU64,
    handler_panics: AtomicU64,
    ack_failures: AtomicU64,
    reject_failures: AtomicU64,
    in_flight: AtomicUsize,
    in_flight_peak: AtomicUsize,
    running_workers: AtomicUsize,
    generations: AtomicU64,
}

impl Telemetry {
    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A panic counts as a handler failure as well.
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject_failure(&self) {
        self.reject_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_started(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a worker loop as running until the returned guard is dropped.
    pub(crate) fn enter_worker(self: &Arc<Self>) -> RunningWorkerGuard {
        self.running_workers.fetch_add(1, Ordering::SeqCst);
        RunningWorkerGuard {
            telemetry: Arc::clone(self),
        }
    }

    /// Marks a handler invocation as in flight until the returned guard is dropped.
    pub fn enter_handler(self: &Arc<Self>) -> InFlightGuard {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight_peak.fetch_max(current, Ordering::SeqCst);
        InFlightGuard {
            telemetry: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            reject_failures: self.reject_failures.load(Ordering::Relaxed),
        }
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of handler calls observed running at the same time.
    pub fn in_flight_peak(&self) -> usize {
        self.in_flight_peak.load(Ordering::SeqCst)
    }

    pub fn running_workers(&self) -> usize {
        self.running_workers.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }
}

pub struct InFlightGuard {
    telemetry: Arc<Telemetry>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.telemetry.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct RunningWorkerGuard {
    telemetry: Arc<Telemetry>,
}

impl Drop for RunningWorkerGuard {
    fn drop(&mut self) {
        self.telemetry.running_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub acked: u64,
    pub requeued: u64,
    pub skipped: u64,
    pub handler_failures: u64,
    pub handler_panics: u64,
    pub ack_failures: u64,
    pub reject_failures: u64,
}

impl TelemetrySnapshot {
    /// Deliveries that reached a final broker-side disposition.
    pub fn finalized(&self) -> u64 {
        self.acked.saturating_add(self.requeued)
    }
}

/// Spawns a background task that periodically logs throughput and failure counters
/// until either the caller's token or the generation's force-stop token fires.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    queue: Arc<str>,
    shutdown: CancellationToken,
    force_stop: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "mqpool::metrics", queue = %queue, "metrics reporter shutting down");
                    break;
                }
                _ = force_stop.cancelled() => {
                    tracing::debug!(target: "mqpool::metrics", queue = %queue, "metrics reporter force stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let finalized_delta = current
                        .finalized()
                        .saturating_sub(last_snapshot.finalized());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        finalized_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "mqpool::metrics",
                        queue = %queue,
                        throughput = format!("{throughput:.2}"),
                        acked = current.acked,
                        requeued = current.requeued,
                        skipped = current.skipped,
                        handler_failures = current.handler_failures,
                        ack_failures = current.ack_failures,
                        reject_failures = current.reject_failures,
                        in_flight = telemetry.in_flight(),
                        workers = telemetry.running_workers(),
                        "consumer metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
