//! The job coordinator: a passive ledger of per-unit download progress.
//!
//! It never initiates work. The orchestrator's workers report the states
//! their stages reach; the reprocessor reads incomplete records back. Store
//! calls go through the shared retry wrapper so a briefly unavailable
//! backend does not fail an otherwise healthy unit of work.

use crate::api::retry::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::coordinator::record::{DownloadStatus, ProgressRecord};
use crate::coordinator::store::CoordinatorStore;
use crate::pipeline::unit::WorkUnit;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const STORE_MAX_ATTEMPTS: usize = 5;
const STORE_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const STORE_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct JobCoordinator {
    store: Arc<dyn CoordinatorStore>,
}

impl JobCoordinator {
    pub fn new(store: Arc<dyn CoordinatorStore>) -> Self {
        Self { store }
    }

    /// Finds or creates the record for `unit`, appends a history event
    /// stamped now, and makes `status` current.
    ///
    /// Idempotent with respect to record creation. Monotonicity is the
    /// caller's concern: workers only report states their stage reached,
    /// and the reprocessor's reset to `Started` is the one sanctioned
    /// backward move.
    pub async fn record_progress(&self, unit: &WorkUnit, status: DownloadStatus) -> Result<()> {
        let id = unit.id();
        self.with_store_retry("record_progress", || async {
            let mut record = match self.store.find(&id).await? {
                Some(record) => record,
                None => ProgressRecord::new(unit),
            };
            record.push_status(status, Utc::now());
            self.store.upsert(&record).await
        })
        .await
        .with_context(|| format!("failed to record {status} for {unit}"))?;

        tracing::debug!(unit = %unit, status = %status, "recorded progress");
        Ok(())
    }

    /// All records that have not reached `Success`.
    pub async fn get_incomplete(&self) -> Result<Vec<ProgressRecord>> {
        self.with_store_retry("get_incomplete", || self.store.incomplete())
            .await
            .context("failed to list incomplete records")
    }

    pub async fn find(&self, unit: &WorkUnit) -> Result<Option<ProgressRecord>> {
        let id = unit.id();
        self.with_store_retry("find", || self.store.find(&id))
            .await
            .with_context(|| format!("failed to look up record for {unit}"))
    }

    async fn with_store_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = RetryBackoff::new(STORE_INITIAL_BACKOFF, STORE_MAX_BACKOFF)
            .with_max_attempts(STORE_MAX_ATTEMPTS);
        retry_with_backoff(
            backoff,
            |_| call(),
            |attempt, delay, err, will_retry| {
                tracing::warn!(
                    operation,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    will_retry,
                    "coordinator store call failed"
                );
            },
            |_, _| RetryDisposition::Retry,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::MemoryCoordinatorStore;
    use crate::pipeline::unit::TimeRange;
    use chrono::TimeZone;

    fn unit() -> WorkUnit {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 5, 0).unwrap(),
        );
        WorkUnit::new("Widget", range)
    }

    fn coordinator() -> JobCoordinator {
        JobCoordinator::new(Arc::new(MemoryCoordinatorStore::new()))
    }

    #[tokio::test]
    async fn record_progress_creates_then_appends() {
        let coordinator = coordinator();
        let unit = unit();

        coordinator
            .record_progress(&unit, DownloadStatus::Started)
            .await
            .expect("first report should succeed");
        coordinator
            .record_progress(&unit, DownloadStatus::Fetched)
            .await
            .expect("second report should succeed");

        let record = coordinator
            .find(&unit)
            .await
            .expect("lookup should succeed")
            .expect("record should exist");
        assert_eq!(record.status, DownloadStatus::Fetched);
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0].status, DownloadStatus::Started);
    }

    #[tokio::test]
    async fn reset_to_started_is_recorded_not_erased() {
        let coordinator = coordinator();
        let unit = unit();

        for status in [
            DownloadStatus::Started,
            DownloadStatus::Fetched,
            DownloadStatus::Started,
        ] {
            coordinator.record_progress(&unit, status).await.unwrap();
        }

        let record = coordinator.find(&unit).await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Started);
        assert_eq!(record.history.len(), 3);
    }

    #[tokio::test]
    async fn get_incomplete_filters_success() {
        let coordinator = coordinator();
        let done = unit();
        let pending = WorkUnit::new("Gadget", done.range);

        for status in [
            DownloadStatus::Started,
            DownloadStatus::Fetched,
            DownloadStatus::Saved,
            DownloadStatus::Success,
        ] {
            coordinator.record_progress(&done, status).await.unwrap();
        }
        coordinator
            .record_progress(&pending, DownloadStatus::Started)
            .await
            .unwrap();

        let incomplete = coordinator.get_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].kind, "Gadget");
    }
}
