//! Remote entity API plumbing: the HTTP client, blob codec, retry policy,
//! and client options.

pub mod client;
pub mod codec;
pub mod options;
pub mod retry;

pub use client::{ApiError, EntityClient, EntityQuery, HttpEntityClient};
pub use codec::{Document, EntityCodec, JsonEntityCodec};
pub use options::ApiClientOptions;
