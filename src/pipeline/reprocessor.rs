//! Resubmission of incomplete work.
//!
//! Crashed workers, monitor-terminated hangs, and exhausted-retry fetch
//! failures all look the same in the coordinator: a record that never
//! reached SUCCESS. The reprocessor sweeps those up and re-drives them
//! through the orchestrator, which re-records STARTED — the one sanctioned
//! backward status move.

use crate::pipeline::orchestrator::{Orchestrator, RunReport};
use crate::pipeline::unit::WorkUnit;
use crate::runtime::context::PipelineContext;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct Reprocessor {
    ctx: Arc<PipelineContext>,
}

impl Reprocessor {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Resubmits incomplete units of work.
    ///
    /// A record is eligible when it first entered STARTED at or after
    /// `started_after` and its most recent transition is older than the
    /// configured grace period. The grace window keeps the sweep from
    /// racing work that is genuinely in progress.
    pub async fn run(&self, started_after: DateTime<Utc>) -> Result<RunReport> {
        let grace = chrono::Duration::from_std(self.ctx.config.grace_period())
            .context("grace_period does not fit a chrono duration")?;
        let quiet_before = Utc::now() - grace;

        let records = self.ctx.coordinator.get_incomplete().await?;
        if records.is_empty() {
            tracing::info!("no incomplete records; nothing to reprocess");
            return Ok(RunReport::default());
        }

        let mut units: Vec<WorkUnit> = Vec::new();
        for record in records {
            let Some(started) = record.first_started() else {
                tracing::debug!(id = %record.id, "record never started; skipping");
                continue;
            };
            if started < started_after {
                continue;
            }
            if let Some(last) = record.last_event_at() {
                if last > quiet_before {
                    tracing::debug!(
                        id = %record.id,
                        last_transition = %last.to_rfc3339(),
                        "record moved within the grace period; skipping"
                    );
                    continue;
                }
            }
            units.push(record.unit());
        }

        tracing::info!(eligible = units.len(), "resubmitting incomplete units");
        Orchestrator::new(self.ctx.clone()).run_units(units).await
    }
}
