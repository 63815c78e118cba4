//! Runtime wiring: validated configuration, the run-scoped context object,
//! and telemetry.

pub mod config;
pub mod context;
pub mod telemetry;

pub use config::{ConfigFile, KindConfig, PipelineConfig, PipelineConfigBuilder};
pub use context::PipelineContext;
pub use telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
