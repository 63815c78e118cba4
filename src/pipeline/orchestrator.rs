//! Scheduling: partitioning ranges into units of work and driving them
//! through a bounded worker pool.
//!
//! The orchestrator never blocks on joins. It polls on a short fixed
//! interval, spawning at most one worker per tick so queries are spaced
//! out, and runs the monitor's timeout sweep on the same cadence. It keeps
//! no state across runs; the coordinator is the durable record of what
//! still needs retrying.

use crate::pipeline::monitor::{ProcessMonitor, WorkerFate};
use crate::pipeline::unit::{TimeRange, WorkUnit};
use crate::pipeline::worker::run_unit;
use crate::runtime::context::PipelineContext;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::sleep;

/// Terminal tally for one scheduling run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub hung: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.hung
    }

    /// True when every unit reached SUCCESS.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.hung == 0
    }
}

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Partitions `range` into per-kind units of work: consecutive
    /// sub-intervals of each kind's configured size, the last one
    /// truncated.
    pub fn partition(&self, range: TimeRange) -> Vec<WorkUnit> {
        let mut units = Vec::new();
        for kind in self.ctx.config.kinds() {
            for sub_range in range.partition(kind.sub_interval) {
                units.push(WorkUnit::new(kind.name.clone(), sub_range));
            }
        }
        units
    }

    /// Downloads every configured kind over `range`.
    pub async fn run(&self, range: TimeRange) -> Result<RunReport> {
        let units = self.partition(range);
        tracing::info!(
            start = %range.start,
            end = %range.end,
            units = units.len(),
            "starting download run"
        );
        self.run_units(units).await
    }

    /// Schedules the given units onto the bounded worker pool and waits for
    /// all of them to finish, time out, or be abandoned by shutdown.
    pub async fn run_units(&self, units: Vec<WorkUnit>) -> Result<RunReport> {
        let concurrency = self.ctx.config.concurrency();
        let poll_interval = self.ctx.config.poll_interval();
        let mut pending: VecDeque<WorkUnit> = units.into();
        let mut monitor = ProcessMonitor::new(self.ctx.config.worker_timeout());
        let mut report = RunReport::default();

        loop {
            for fate in monitor.sweep().await {
                self.tally(&mut report, fate);
            }

            if self.ctx.shutdown.is_cancelled() {
                let aborted = monitor.abort_all();
                if !aborted.is_empty() || !pending.is_empty() {
                    tracing::warn!(
                        aborted = aborted.len(),
                        unscheduled = pending.len(),
                        "shutdown requested; abandoning remaining units"
                    );
                }
                report.failed += aborted.len() + pending.len();
                pending.clear();
                break;
            }

            if monitor.active() < concurrency {
                if let Some(unit) = pending.pop_front() {
                    let ctx = self.ctx.clone();
                    let task_unit = unit.clone();
                    let handle = tokio::spawn(async move { run_unit(ctx, task_unit).await });
                    monitor.track(unit, handle);
                }
            }

            if pending.is_empty() && monitor.active() == 0 {
                break;
            }

            sleep(poll_interval).await;
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            hung = report.hung,
            "download run finished"
        );
        Ok(report)
    }

    fn tally(&self, report: &mut RunReport, fate: WorkerFate) {
        match fate {
            WorkerFate::Succeeded(unit) => {
                tracing::debug!(unit = %unit, "worker finished");
                self.ctx.telemetry.record_unit_succeeded();
                report.succeeded += 1;
            }
            WorkerFate::Failed(unit, err) => {
                tracing::error!(unit = %unit, error = %format!("{err:#}"), "worker failed");
                self.ctx.telemetry.record_unit_failed();
                report.failed += 1;
            }
            WorkerFate::Hung(unit) => {
                self.ctx.telemetry.record_unit_hung();
                report.hung += 1;
            }
        }
    }
}
