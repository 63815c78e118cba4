use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Transport-level knobs for [`HttpEntityClient`](crate::api::client::HttpEntityClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiClientOptions {
    /// Per-request timeout applied by the underlying HTTP client.
    pub request_timeout: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ApiClientOptions {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        Ok(())
    }
}
