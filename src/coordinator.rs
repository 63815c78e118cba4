//! Job coordination: the persistent per-unit state machine, its storage
//! backends, and the ledger API used by the orchestrator and reprocessor.

pub mod ledger;
pub mod record;
pub mod store;

pub use ledger::JobCoordinator;
pub use record::{DownloadStatus, ProgressRecord, StatusEvent};
pub use store::{CoordinatorStore, MemoryCoordinatorStore, SledCoordinatorStore};
