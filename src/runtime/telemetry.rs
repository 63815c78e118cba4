use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

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
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    entities_fetched: AtomicU64,
    api_errors: AtomicU64,
    api_timeouts: AtomicU64,
    decode_skips: AtomicU64,
    documents_saved: AtomicU64,
    units_started: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    units_hung: AtomicU64,
}

impl Telemetry {
    pub fn record_entities_fetched(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.entities_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_api_error(&self) {
        self.api_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_timeout(&self) {
        self.api_timeouts.fetch_add(1, Ordering::Relaxed);
        self.api_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_skip(&self) {
        self.decode_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_documents_saved(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.documents_saved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unit_started(&self) {
        self.units_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_succeeded(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_hung(&self) {
        self.units_hung.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            entities_fetched: self.entities_fetched.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            api_timeouts: self.api_timeouts.load(Ordering::Relaxed),
            decode_skips: self.decode_skips.load(Ordering::Relaxed),
            documents_saved: self.documents_saved.load(Ordering::Relaxed),
            units_started: self.units_started.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_hung: self.units_hung.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub entities_fetched: u64,
    pub api_errors: u64,
    pub api_timeouts: u64,
    pub decode_skips: u64,
    pub documents_saved: u64,
    pub units_started: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub units_hung: u64,
}

/// Spawns a background task that periodically logs pipeline counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "backfill::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        target: "backfill::metrics",
                        entities_fetched = snapshot.entities_fetched,
                        documents_saved = snapshot.documents_saved,
                        decode_skips = snapshot.decode_skips,
                        api_errors = snapshot.api_errors,
                        api_timeouts = snapshot.api_timeouts,
                        units_started = snapshot.units_started,
                        units_succeeded = snapshot.units_succeeded,
                        units_failed = snapshot.units_failed,
                        units_hung = snapshot.units_hung,
                        "runtime metrics snapshot"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_entities_fetched(3);
        telemetry.record_entities_fetched(0);
        telemetry.record_api_error();
        telemetry.record_api_timeout();
        telemetry.record_decode_skip();
        telemetry.record_documents_saved(2);
        telemetry.record_unit_started();
        telemetry.record_unit_succeeded();
        telemetry.record_unit_failed();
        telemetry.record_unit_hung();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.entities_fetched, 3);
        assert_eq!(snapshot.api_errors, 2);
        assert_eq!(snapshot.api_timeouts, 1);
        assert_eq!(snapshot.decode_skips, 1);
        assert_eq!(snapshot.documents_saved, 2);
        assert_eq!(snapshot.units_started, 1);
        assert_eq!(snapshot.units_succeeded, 1);
        assert_eq!(snapshot.units_failed, 1);
        assert_eq!(snapshot.units_hung, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_entities_fetched(10);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(telemetry, shutdown.clone(), Duration::from_millis(10));

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
