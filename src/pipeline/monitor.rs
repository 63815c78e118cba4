//! Worker supervision: liveness tracking and wall-clock timeout
//! enforcement.
//!
//! Termination is abrupt (`JoinHandle::abort`). That is safe only because
//! archive writes are rename-into-place and sink upserts are idempotent, so
//! a half-finished unit of work is always retryable. A terminated unit
//! stays at whatever status it last legitimately reached; nothing here ever
//! touches the coordinator.

use crate::pipeline::unit::WorkUnit;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct TrackedWorker {
    unit: WorkUnit,
    handle: JoinHandle<Result<()>>,
    started: Instant,
}

/// How a tracked worker left the pool.
#[derive(Debug)]
pub enum WorkerFate {
    Succeeded(WorkUnit),
    Failed(WorkUnit, anyhow::Error),
    Hung(WorkUnit),
}

pub struct ProcessMonitor {
    timeout: Duration,
    tracked: Vec<TrackedWorker>,
}

impl ProcessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tracked: Vec::new(),
        }
    }

    pub fn track(&mut self, unit: WorkUnit, handle: JoinHandle<Result<()>>) {
        self.tracked.push(TrackedWorker {
            unit,
            handle,
            started: Instant::now(),
        });
    }

    /// Number of workers still being tracked.
    pub fn active(&self) -> usize {
        self.tracked.len()
    }

    /// Non-blocking supervision pass.
    ///
    /// Reaps finished workers and terminates any worker that has exceeded
    /// the timeout, reporting it as hung. Dead workers are dropped from
    /// tracking without further action.
    pub async fn sweep(&mut self) -> Vec<WorkerFate> {
        let mut fates = Vec::new();
        let mut remaining = Vec::new();

        for worker in std::mem::take(&mut self.tracked) {
            if worker.handle.is_finished() {
                fates.push(reap(worker.unit, worker.handle).await);
            } else if worker.started.elapsed() >= self.timeout {
                worker.handle.abort();
                tracing::error!(
                    unit = %worker.unit,
                    timeout_secs = self.timeout.as_secs(),
                    "worker exceeded wall-clock timeout; terminating"
                );
                fates.push(WorkerFate::Hung(worker.unit));
            } else {
                remaining.push(worker);
            }
        }

        self.tracked = remaining;
        fates
    }

    /// Terminates every tracked worker, returning the affected units.
    pub fn abort_all(&mut self) -> Vec<WorkUnit> {
        std::mem::take(&mut self.tracked)
            .into_iter()
            .map(|worker| {
                worker.handle.abort();
                worker.unit
            })
            .collect()
    }
}

async fn reap(unit: WorkUnit, handle: JoinHandle<Result<()>>) -> WorkerFate {
    match handle.await {
        Ok(Ok(())) => WorkerFate::Succeeded(unit),
        Ok(Err(err)) => WorkerFate::Failed(unit, err),
        Err(join_err) if join_err.is_cancelled() => WorkerFate::Hung(unit),
        Err(join_err) => WorkerFate::Failed(unit, anyhow!("worker panicked: {join_err}")),
    }
}
