//! The download pipeline: interval fetching, archival, sinking, worker
//! scheduling, supervision, and reprocessing.

pub mod archive;
pub mod fetcher;
pub mod monitor;
pub mod orchestrator;
pub mod reprocessor;
pub mod sink;
pub mod unit;
pub(crate) mod worker;

pub use archive::{ArchiveHandle, ArchiveWriter};
pub use fetcher::IntervalFetcher;
pub use monitor::{ProcessMonitor, WorkerFate};
pub use orchestrator::{Orchestrator, RunReport};
pub use reprocessor::Reprocessor;
pub use sink::{DocumentSink, DocumentStore, MemoryDocumentStore, SinkOutcome, SledDocumentStore};
pub use unit::{RawBatch, TimeRange, WorkUnit};
