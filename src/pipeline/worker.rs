//! One unit of work, end to end.

use crate::coordinator::record::DownloadStatus;
use crate::pipeline::unit::WorkUnit;
use crate::runtime::context::PipelineContext;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Drives a single unit through fetch, archive, and sink, reporting each
/// stage to the coordinator:
///
/// STARTED → fetch → archive → FETCHED → sink → SAVED → SUCCESS
///
/// Any error aborts before SUCCESS, leaving the unit observably incomplete
/// for the reprocessor. Errors are never retried here; interval-level
/// recovery happens only through the reprocessor's next sweep.
pub(crate) async fn run_unit(ctx: Arc<PipelineContext>, unit: WorkUnit) -> Result<()> {
    let kind = ctx
        .config
        .kind(&unit.kind)
        .with_context(|| format!("kind {:?} is not configured", unit.kind))?;
    let key_field = kind.key_field.clone();

    ctx.coordinator
        .record_progress(&unit, DownloadStatus::Started)
        .await?;
    ctx.telemetry.record_unit_started();
    tracing::info!(unit = %unit, "downloading entities");

    let batch = ctx.fetcher.fetch(&unit).await?;

    ctx.archive.write(&batch).await?;
    ctx.coordinator
        .record_progress(&unit, DownloadStatus::Fetched)
        .await?;

    let outcome = ctx.sink.sink(&batch, &key_field).await?;
    ctx.coordinator
        .record_progress(&unit, DownloadStatus::Saved)
        .await?;

    ctx.coordinator
        .record_progress(&unit, DownloadStatus::Success)
        .await?;
    tracing::info!(
        unit = %unit,
        saved = outcome.saved,
        skipped = outcome.skipped,
        "unit of work complete"
    );
    Ok(())
}
