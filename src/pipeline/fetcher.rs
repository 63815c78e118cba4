//! Interval fetching with timestamp re-pagination.
//!
//! The remote API has no cursor and caps every call at `max_results`. A
//! full page therefore means possible truncation: the fetcher re-queries
//! with the last returned entity's ordering timestamp as the new inclusive
//! lower bound until a page comes back short. Entities sharing the exact
//! boundary timestamp are delivered twice across re-query boundaries; the
//! fetcher does not de-dup, because idempotent upsert downstream makes
//! redelivery harmless.

use crate::api::client::{ApiError, EntityClient, EntityQuery};
use crate::api::codec::EntityCodec;
use crate::api::retry::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::pipeline::unit::{RawBatch, WorkUnit};
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FETCH_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const FETCH_MAX_BACKOFF: Duration = Duration::from_secs(512);

pub struct IntervalFetcher {
    client: Arc<dyn EntityClient>,
    codec: Arc<dyn EntityCodec>,
    max_results: usize,
    max_attempts: usize,
    order_field: String,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
}

impl IntervalFetcher {
    pub fn new(
        client: Arc<dyn EntityClient>,
        codec: Arc<dyn EntityCodec>,
        max_results: usize,
        max_attempts: usize,
        order_field: impl Into<String>,
        telemetry: Arc<Telemetry>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            client,
            codec,
            max_results,
            max_attempts,
            order_field: order_field.into(),
            telemetry,
            cancellation,
        }
    }

    /// Fetches every entity of the unit's kind in its range, re-paginating
    /// past the per-call cap. Transient API failures retry with
    /// 2^attempt-second backoff; exhausting `max_attempts` on a single call
    /// fails the whole unit.
    pub async fn fetch(&self, unit: &WorkUnit) -> Result<RawBatch> {
        let mut entities: Vec<Bytes> = Vec::new();
        let mut lower = unit.range.start;

        loop {
            let page = self
                .fetch_page_with_retry(unit, lower)
                .await
                .with_context(|| format!("fetch failed for {unit}"))?;
            let count = page.len();
            self.telemetry.record_entities_fetched(count as u64);

            let truncated = count == self.max_results;
            let boundary = if truncated {
                Some(self.page_boundary(unit, &page)?)
            } else {
                None
            };
            entities.extend(page);

            let Some((first_ts, last_ts)) = boundary else {
                break;
            };

            // A maxed-out page whose first and last ordering timestamps are
            // equal can never advance: re-querying from last_ts would return
            // the same page forever.
            if first_ts == last_ts {
                bail!(
                    "more than {} {} entities share timestamp {} in {}; cannot advance pagination",
                    self.max_results,
                    unit.kind,
                    last_ts.to_rfc3339(),
                    unit.range
                );
            }

            tracing::debug!(
                unit = %unit,
                fetched = entities.len(),
                resume_from = %last_ts.to_rfc3339(),
                "page hit result cap; re-querying from last timestamp"
            );
            lower = last_ts;
            if lower >= unit.range.end {
                break;
            }
        }

        tracing::info!(unit = %unit, rows = entities.len(), "interval fetch complete");
        Ok(RawBatch::new(unit.clone(), entities))
    }

    async fn fetch_page_with_retry(
        &self,
        unit: &WorkUnit,
        lower: DateTime<Utc>,
    ) -> Result<Vec<Bytes>> {
        let backoff = RetryBackoff::new(FETCH_INITIAL_BACKOFF, FETCH_MAX_BACKOFF)
            .with_max_attempts(self.max_attempts)
            .with_cancellation(&self.cancellation);

        retry_with_backoff(
            backoff,
            |_| {
                self.client.fetch_page(EntityQuery {
                    kind: &unit.kind,
                    start: lower,
                    end: unit.range.end,
                    max_results: self.max_results,
                    order_field: &self.order_field,
                })
            },
            |attempt, delay, err, will_retry| {
                if matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Timeout { .. })) {
                    self.telemetry.record_api_timeout();
                } else {
                    self.telemetry.record_api_error();
                }
                if will_retry {
                    tracing::warn!(
                        unit = %unit,
                        attempt,
                        backoff_secs = delay.as_secs(),
                        error = %err,
                        "entity fetch failed; retrying"
                    );
                } else {
                    tracing::error!(unit = %unit, attempt, error = %err, "entity fetch exhausted retries");
                }
            },
            |_, err| match err.downcast_ref::<ApiError>() {
                Some(api_err) if api_err.is_transient() => RetryDisposition::Retry,
                _ => RetryDisposition::Abort,
            },
        )
        .await
    }

    fn page_boundary(
        &self,
        unit: &WorkUnit,
        page: &[Bytes],
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let (Some(first), Some(last)) = (page.first(), page.last()) else {
            bail!("cannot paginate {unit}: truncated page was empty");
        };
        let first_ts = self
            .codec
            .timestamp(first)
            .with_context(|| format!("cannot read ordering timestamp while paginating {unit}"))?;
        let last_ts = self
            .codec
            .timestamp(last)
            .with_context(|| format!("cannot read ordering timestamp while paginating {unit}"))?;
        Ok((first_ts, last_ts))
    }
}
