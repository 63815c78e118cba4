//! HTTP client for the remote entity export API. Houses the
//! `HttpEntityClient`, error types, and the `EntityClient` trait consumed by
//! the interval fetcher.
//!
//! The remote API takes a kind, a `[start, end)` window on an ordering
//! field, and a hard result cap; it has no cursor. Responses are ordered
//! sequences of opaque blobs, transported as base64 strings in a JSON
//! array. Pagination-by-timestamp on top of this surface lives in
//! [`IntervalFetcher`](crate::pipeline::fetcher::IntervalFetcher), not here:
//! this client performs exactly one call per `fetch_page`.

use crate::api::options::ApiClientOptions;
use anyhow::{anyhow, Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::sync::Arc;

/// Transport and protocol failures surfaced by the client.
///
/// The fetcher's retry loop downcasts to this type to decide whether a
/// failed call is worth retrying.
#[derive(Debug)]
pub enum ApiError {
    Timeout { kind: String },
    Server { status: u16 },
    Auth { status: u16 },
    Request { status: u16 },
    Transport { message: String },
}

impl ApiError {
    /// True for failures that may clear up on their own: timeouts, 5xx
    /// responses, auth hiccups, and connection-level errors. Remaining 4xx
    /// responses indicate a malformed request and are never retried.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ApiError::Request { .. })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Timeout { kind } => write!(f, "entity fetch for {kind} timed out"),
            ApiError::Server { status } => write!(f, "entity API returned server error {status}"),
            ApiError::Auth { status } => write!(f, "entity API rejected credentials ({status})"),
            ApiError::Request { status } => write!(f, "entity API rejected request ({status})"),
            ApiError::Transport { message } => write!(f, "entity API transport error: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// One page request against the remote export API.
#[derive(Debug, Clone, Copy)]
pub struct EntityQuery<'a> {
    pub kind: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_results: usize,
    pub order_field: &'a str,
}

pub trait EntityClient: Send + Sync {
    fn fetch_page<'a>(&'a self, query: EntityQuery<'a>) -> BoxFuture<'a, Result<Vec<Bytes>>>;
}

#[derive(Debug, Clone)]
pub struct HttpEntityClient {
    base_url: Arc<String>,
    token: Option<Arc<String>>,
    client: reqwest::Client,
}

impl EntityClient for HttpEntityClient {
    fn fetch_page<'a>(&'a self, query: EntityQuery<'a>) -> BoxFuture<'a, Result<Vec<Bytes>>> {
        Box::pin(self.fetch_page_inner(query))
    }
}

impl HttpEntityClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::with_options(base_url, token, ApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        token: Option<String>,
        options: ApiClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url.into().trim_end_matches('/').to_owned()),
            token: token.map(Arc::new),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn fetch_page_inner(&self, query: EntityQuery<'_>) -> Result<Vec<Bytes>> {
        let url = format!("{}/v1/entities/{}", self.base_url, query.kind);
        let mut request = self.client.get(&url).query(&[
            (
                "dt_start",
                query.start.to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
            (
                "dt_end",
                query.end.to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
            ("max", query.max_results.to_string()),
            ("order", query.order_field.to_owned()),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify_transport(query.kind, err))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Auth {
                status: status.as_u16(),
            }
            .into());
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(ApiError::Request {
                status: status.as_u16(),
            }
            .into());
        }

        let encoded: Vec<String> = response
            .json()
            .await
            .map_err(|err| classify_transport(query.kind, err))?;

        encoded
            .iter()
            .enumerate()
            .map(|(index, blob)| {
                BASE64_STANDARD
                    .decode(blob)
                    .map(Bytes::from)
                    .with_context(|| {
                        format!("entity {index} in {} response is not valid base64", query.kind)
                    })
            })
            .collect()
    }
}

fn classify_transport(kind: &str, err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        ApiError::Timeout {
            kind: kind.to_owned(),
        }
        .into()
    } else {
        ApiError::Transport {
            message: err.to_string(),
        }
        .into()
    }
}
