use crate::support::{at, harness, harness_with_api, init_tracing, widget_config, ScriptedApi};
use anyhow::Result;
use backfill::{
    CoordinatorStore, DownloadStatus, Orchestrator, ProgressRecord, Reprocessor, TimeRange,
    WorkUnit,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

async fn seed(
    store: &dyn CoordinatorStore,
    unit: &WorkUnit,
    statuses: &[(DownloadStatus, DateTime<Utc>)],
) {
    let mut record = ProgressRecord::new(unit);
    for (status, ts) in statuses {
        record.push_status(*status, *ts);
    }
    store.upsert(&record).await.expect("seed should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_stale_incomplete_records_are_resubmitted() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let harness = harness(widget_config(dir.path()).build()?);
    harness.api.insert("Widget", "w1", at(2, 0));

    let now = Utc::now();
    let stale_started = now - chrono::Duration::hours(3);

    let finished = WorkUnit::new("Widget", TimeRange::new(at(0, 0), at(5, 0)));
    let recent = WorkUnit::new("Widget", TimeRange::new(at(5, 0), at(10, 0)));
    let stale = WorkUnit::new("Widget", TimeRange::new(at(10, 0), at(15, 0)));

    seed(
        harness.coordinator_store.as_ref(),
        &finished,
        &[
            (DownloadStatus::Started, stale_started),
            (DownloadStatus::Success, stale_started),
        ],
    )
    .await;
    seed(
        harness.coordinator_store.as_ref(),
        &recent,
        &[(DownloadStatus::Started, now)],
    )
    .await;
    seed(
        harness.coordinator_store.as_ref(),
        &stale,
        &[(DownloadStatus::Started, stale_started)],
    )
    .await;

    let report = Reprocessor::new(harness.ctx.clone()).run(epoch()).await?;

    assert_eq!(report.total(), 1, "only the stale record is resubmitted");
    assert_eq!(report.succeeded, 1);

    let stale_record = harness.ctx.coordinator.find(&stale).await?.unwrap();
    assert_eq!(stale_record.status, DownloadStatus::Success);
    // The reset to STARTED is recorded on top of the old history.
    assert_eq!(stale_record.history[1].status, DownloadStatus::Started);

    let recent_record = harness.ctx.coordinator.find(&recent).await?.unwrap();
    assert_eq!(recent_record.status, DownloadStatus::Started);
    assert_eq!(recent_record.history.len(), 1, "recent work was not touched");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn started_after_cutoff_excludes_old_records() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let harness = harness(widget_config(dir.path()).build()?);

    let stale_started = Utc::now() - chrono::Duration::hours(3);
    let unit = WorkUnit::new("Widget", TimeRange::new(at(0, 0), at(5, 0)));
    seed(
        harness.coordinator_store.as_ref(),
        &unit,
        &[(DownloadStatus::Started, stale_started)],
    )
    .await;

    let cutoff = Utc::now() - chrono::Duration::hours(1);
    let report = Reprocessor::new(harness.ctx.clone()).run(cutoff).await?;

    assert_eq!(report.total(), 0, "records started before the cutoff stay put");
    let record = harness.ctx.coordinator.find(&unit).await?.unwrap();
    assert_eq!(record.status, DownloadStatus::Started);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_run_is_healed_by_reprocessing() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = widget_config(dir.path())
        .max_attempts(1)
        .grace_period(Duration::from_millis(10))
        .build()?;
    let api = Arc::new(ScriptedApi::new());
    api.insert("Widget", "w1", at(2, 0));
    api.insert("Widget", "w2", at(7, 0));
    let harness = harness_with_api(config, api);

    // First run: the API is down, every unit fails after its one attempt.
    harness.api.set_fail(true);
    let range = TimeRange::new(at(0, 0), at(10, 0));
    let failed = Orchestrator::new(harness.ctx.clone()).run(range).await?;
    assert_eq!(failed.failed, 2);
    assert_eq!(harness.documents.len("Widget"), 0);

    // The API recovers; after the grace period the sweep re-drives both
    // units without any operator bookkeeping.
    harness.api.set_fail(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let healed = Reprocessor::new(harness.ctx.clone()).run(epoch()).await?;

    assert_eq!(healed.succeeded, 2);
    assert!(healed.is_clean());
    assert_eq!(harness.documents.keys("Widget"), vec!["w1", "w2"]);
    assert!(harness.ctx.coordinator.get_incomplete().await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_ledger_reprocesses_nothing() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let harness = harness(widget_config(dir.path()).build()?);

    let report = Reprocessor::new(harness.ctx.clone()).run(epoch()).await?;
    assert_eq!(report.total(), 0);
    assert!(report.is_clean());
    assert_eq!(harness.api.calls(), 0);
    Ok(())
}
