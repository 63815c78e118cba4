pub mod api;
pub mod coordinator;
pub mod pipeline;
pub mod runtime;

pub use api::client::{ApiError, EntityClient, EntityQuery, HttpEntityClient};
pub use api::codec::{Document, EntityCodec, JsonEntityCodec};
pub use api::options::ApiClientOptions;
pub use coordinator::ledger::JobCoordinator;
pub use coordinator::record::{DownloadStatus, ProgressRecord, StatusEvent};
pub use coordinator::store::{CoordinatorStore, MemoryCoordinatorStore, SledCoordinatorStore};
pub use pipeline::archive::{ArchiveHandle, ArchiveWriter};
pub use pipeline::fetcher::IntervalFetcher;
pub use pipeline::monitor::{ProcessMonitor, WorkerFate};
pub use pipeline::orchestrator::{Orchestrator, RunReport};
pub use pipeline::reprocessor::Reprocessor;
pub use pipeline::sink::{
    DocumentSink, DocumentStore, MemoryDocumentStore, SinkOutcome, SledDocumentStore,
};
pub use pipeline::unit::{RawBatch, TimeRange, WorkUnit};
pub use runtime::config::{
    ConfigFile, KindConfig, PipelineConfig, PipelineConfigBuilder, PipelineConfigParams,
};
pub use runtime::context::PipelineContext;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
