use crate::support::{at, harness, init_tracing, widget_config};
use anyhow::Result;
use backfill::{DownloadStatus, Orchestrator, TimeRange, WorkUnit};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn widget_scenario_downloads_every_document() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let harness = harness(widget_config(dir.path()).build()?);

    // Three widgets at minute offsets 2, 4, and 12; the last one trails the
    // requested range, and the tolerant fake server returns it anyway.
    harness.api.insert("Widget", "w1", at(2, 0));
    harness.api.insert("Widget", "w2", at(4, 0));
    harness.api.insert("Widget", "w3", at(12, 0));

    let range = TimeRange::new(at(0, 0), at(10, 0));
    let report = Orchestrator::new(harness.ctx.clone()).run(range).await?;

    assert_eq!(report.succeeded, 2, "two five-minute units of work");
    assert!(report.is_clean());

    for sub_range in range.partition(Duration::from_secs(300)) {
        let unit = WorkUnit::new("Widget", sub_range);
        let record = harness
            .ctx
            .coordinator
            .find(&unit)
            .await?
            .expect("every unit should have a record");
        assert_eq!(record.status, DownloadStatus::Success);
        assert!(harness.ctx.archive.archive_path(&unit).exists());
    }

    assert_eq!(harness.documents.keys("Widget"), vec!["w1", "w2", "w3"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rerunning_a_range_is_idempotent() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let harness = harness(widget_config(dir.path()).build()?);

    harness.api.insert("Widget", "w1", at(2, 0));
    harness.api.insert("Widget", "w2", at(4, 0));

    let range = TimeRange::new(at(0, 0), at(10, 0));
    let orchestrator = Orchestrator::new(harness.ctx.clone());

    let first = orchestrator.run(range).await?;
    let keys_after_first = harness.documents.keys("Widget");
    let second = orchestrator.run(range).await?;

    assert!(first.is_clean());
    assert!(second.is_clean());
    assert_eq!(harness.documents.keys("Widget"), keys_after_first);
    assert_eq!(harness.documents.len("Widget"), 2);

    // The second pass re-walks the status machine; history keeps both runs.
    let unit = WorkUnit::new("Widget", TimeRange::new(at(0, 0), at(5, 0)));
    let record = harness.ctx.coordinator.find(&unit).await?.unwrap();
    assert_eq!(record.status, DownloadStatus::Success);
    assert_eq!(record.history.len(), 8);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_workers_are_terminated_and_reported() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = widget_config(dir.path())
        .worker_timeout(Duration::from_millis(100))
        .build()?;
    let harness = harness(config);
    harness.api.set_hang(true);

    let range = TimeRange::new(at(0, 0), at(10, 0));
    let report = Orchestrator::new(harness.ctx.clone()).run(range).await?;

    assert_eq!(report.hung, 2, "both units should be terminated as hangs");
    assert_eq!(report.succeeded, 0);
    assert!(!report.is_clean());

    // A terminated unit keeps the last status its stages reached.
    for sub_range in range.partition(Duration::from_secs(300)) {
        let unit = WorkUnit::new("Widget", sub_range);
        let record = harness.ctx.coordinator.find(&unit).await?.unwrap();
        assert_eq!(record.status, DownloadStatus::Started);
    }
    assert_eq!(harness.documents.len("Widget"), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_failures_leave_units_incomplete() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = widget_config(dir.path()).max_attempts(1).build()?;
    let harness = harness(config);
    harness.api.set_fail(true);

    let range = TimeRange::new(at(0, 0), at(10, 0));
    let report = Orchestrator::new(harness.ctx.clone()).run(range).await?;

    assert_eq!(report.failed, 2);
    assert!(!report.is_clean());

    let incomplete = harness.ctx.coordinator.get_incomplete().await?;
    assert_eq!(incomplete.len(), 2);
    assert!(incomplete
        .iter()
        .all(|record| record.status == DownloadStatus::Started));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_is_respected() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = widget_config(dir.path()).concurrency(1).build()?;
    let harness = harness(config);
    harness.api.insert("Widget", "w1", at(2, 0));

    let range = TimeRange::new(at(0, 0), at(30, 0));
    let report = Orchestrator::new(harness.ctx.clone()).run(range).await?;

    assert_eq!(report.succeeded, 6);
    assert!(report.is_clean());
    assert_eq!(harness.api.calls(), 6, "one call per unit of work");
    Ok(())
}
