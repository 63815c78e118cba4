//! Operator entry points: `backfill run` downloads a time range for every
//! configured kind; `backfill reprocess` re-drives incomplete units of
//! work recorded by earlier runs.

use anyhow::{bail, Context, Result};
use backfill::runtime::telemetry::spawn_metrics_reporter;
use backfill::{
    init_tracing, ConfigFile, HttpEntityClient, JsonEntityCodec, Orchestrator, PipelineContext,
    Reprocessor, RunReport, SledCoordinatorStore, SledDocumentStore, TimeRange,
};
use chrono::{DateTime, DurationRound, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const API_TOKEN_ENV: &str = "BACKFILL_API_TOKEN";

#[derive(Parser)]
#[command(name = "backfill", about = "Entity download pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download all configured kinds over a time range.
    Run(RunArgs),
    /// Re-drive units of work that never reached SUCCESS.
    Reprocess(ReprocessArgs),
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Inclusive start of the range, RFC 3339. Defaults to the start of
    /// the previous whole hour.
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Exclusive end of the range, RFC 3339. Defaults to the current
    /// whole hour.
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Restrict the run to these kinds (repeatable). Defaults to every
    /// configured kind.
    #[arg(long = "kind")]
    kinds: Vec<String>,

    /// Override the configured worker-pool size.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct ReprocessArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Only records that first started at or after this instant are
    /// resubmitted.
    #[arg(long, default_value = "1970-01-01T00:00:00Z")]
    started_after: DateTime<Utc>,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON config file describing the API, kinds, and download settings.
    #[arg(short, long)]
    config: PathBuf,

    /// Directory holding the coordinator ledger and destination store.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Run(args) => {
            let ctx = build_context(&args.common, &args.kinds, args.concurrency)?;
            let range = resolve_range(args.start, args.end)?;
            drive(ctx.clone(), Orchestrator::new(ctx).run(range)).await?
        }
        Command::Reprocess(args) => {
            let ctx = build_context(&args.common, &[], None)?;
            drive(ctx.clone(), Reprocessor::new(ctx).run(args.started_after)).await?
        }
    };

    finish(report)
}

/// Runs a pipeline future with the periodic metrics reporter alongside it.
async fn drive(
    ctx: Arc<PipelineContext>,
    work: impl std::future::Future<Output = Result<RunReport>>,
) -> Result<RunReport> {
    let reporter_token = ctx.shutdown.child_token();
    let reporter = spawn_metrics_reporter(
        ctx.telemetry.clone(),
        reporter_token.clone(),
        ctx.config.metrics_interval(),
    );

    let report = work.await;

    reporter_token.cancel();
    let _ = reporter.await;
    report
}

fn build_context(
    args: &CommonArgs,
    kinds: &[String],
    concurrency: Option<usize>,
) -> Result<Arc<PipelineContext>> {
    let mut file = ConfigFile::load(&args.config)?;
    if !kinds.is_empty() {
        for requested in kinds {
            if !file.kinds.contains_key(requested) {
                bail!("kind {requested:?} is not present in the config file");
            }
        }
        file.kinds.retain(|name, _| kinds.contains(name));
    }
    if let Some(concurrency) = concurrency {
        file.concurrency = Some(concurrency);
    }
    let config = file.into_config()?;
    let token = std::env::var(API_TOKEN_ENV).ok();
    if token.is_none() {
        tracing::warn!("{API_TOKEN_ENV} is not set; requests will be unauthenticated");
    }

    let client = HttpEntityClient::with_options(
        config.api_url(),
        token,
        backfill::ApiClientOptions {
            request_timeout: config.request_timeout(),
        },
    )?;
    let codec = JsonEntityCodec::new(config.order_field());
    let coordinator = SledCoordinatorStore::open(args.state_dir.join("coordinator"))?;
    let documents = SledDocumentStore::open(args.state_dir.join("documents"))?;

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; finishing in-flight units then stopping");
            ctrl_c_token.cancel();
        }
    });

    Ok(Arc::new(PipelineContext::with_cancellation_token(
        config,
        Arc::new(client),
        Arc::new(codec),
        Arc::new(coordinator),
        Arc::new(documents),
        shutdown,
    )))
}

fn resolve_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<TimeRange> {
    let range = match (start, end) {
        (Some(start), Some(end)) => TimeRange::new(start, end),
        (None, None) => {
            let hour = chrono::Duration::hours(1);
            let end = Utc::now()
                .duration_trunc(hour)
                .context("failed to truncate current time to the hour")?;
            TimeRange::new(end - hour, end)
        }
        _ => bail!("--start and --end must be provided together"),
    };
    if range.is_empty() {
        bail!("range start must be before end");
    }
    Ok(range)
}

fn finish(report: RunReport) -> Result<()> {
    println!(
        "succeeded: {}  failed: {}  hung: {}",
        report.succeeded, report.failed, report.hung
    );
    if !report.is_clean() {
        bail!(
            "{} of {} units did not reach SUCCESS; run `backfill reprocess` after the grace period",
            report.failed + report.hung,
            report.total()
        );
    }
    Ok(())
}
