//! Run-scoped wiring for the pipeline.
//!
//! Everything a worker needs — client, codec, stores, archive writer,
//! telemetry — lives in one explicit context object whose lifetime is the
//! pipeline run, instead of module-level globals.

use crate::api::client::EntityClient;
use crate::api::codec::EntityCodec;
use crate::coordinator::ledger::JobCoordinator;
use crate::coordinator::store::CoordinatorStore;
use crate::pipeline::archive::ArchiveWriter;
use crate::pipeline::fetcher::IntervalFetcher;
use crate::pipeline::sink::{DocumentSink, DocumentStore};
use crate::runtime::config::PipelineConfig;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct PipelineContext {
    pub config: PipelineConfig,
    pub coordinator: JobCoordinator,
    pub fetcher: IntervalFetcher,
    pub archive: ArchiveWriter,
    pub sink: DocumentSink,
    pub telemetry: Arc<Telemetry>,
    pub shutdown: CancellationToken,
}

impl PipelineContext {
    /// Builds a context with its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to integrate with an existing
    /// shutdown mechanism.
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn EntityClient>,
        codec: Arc<dyn EntityCodec>,
        coordinator_store: Arc<dyn CoordinatorStore>,
        document_store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::with_cancellation_token(
            config,
            client,
            codec,
            coordinator_store,
            document_store,
            CancellationToken::new(),
        )
    }

    pub fn with_cancellation_token(
        config: PipelineConfig,
        client: Arc<dyn EntityClient>,
        codec: Arc<dyn EntityCodec>,
        coordinator_store: Arc<dyn CoordinatorStore>,
        document_store: Arc<dyn DocumentStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let fetcher = IntervalFetcher::new(
            client,
            codec.clone(),
            config.max_results(),
            config.max_attempts(),
            config.order_field(),
            telemetry.clone(),
            shutdown.clone(),
        );
        let archive = ArchiveWriter::new(config.archive_dir());
        let sink = DocumentSink::new(codec, document_store, telemetry.clone());
        let coordinator = JobCoordinator::new(coordinator_store);

        Self {
            config,
            coordinator,
            fetcher,
            archive,
            sink,
            telemetry,
            shutdown,
        }
    }
}
