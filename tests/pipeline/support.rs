//! Shared fixtures: a scriptable in-memory entity API and context wiring.

use anyhow::Result;
use backfill::{
    ApiError, EntityClient, EntityQuery, JsonEntityCodec, KindConfig, MemoryCoordinatorStore,
    MemoryDocumentStore, PipelineConfig, PipelineConfigBuilder, PipelineContext,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    backfill::init_tracing();
}

/// Minute `m`, second `s` on the fixed test day, UTC.
pub fn at(m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, m, s).unwrap()
}

pub fn entity_blob(key: &str, ts: DateTime<Utc>) -> Bytes {
    Bytes::from(
        serde_json::to_vec(&json!({"key": key, "updated_at": ts.to_rfc3339()}))
            .expect("fixture should serialize"),
    )
}

/// In-memory stand-in for the remote export API.
///
/// Deliberately tolerant the way real backup endpoints tend to be: it
/// filters on the query's lower bound and caps at `max_results`, but may
/// return records past `dt_end`. The pipeline is expected to store such
/// trailing records rather than lose them.
#[derive(Default)]
pub struct ScriptedApi {
    entities: Mutex<HashMap<String, Vec<(DateTime<Utc>, Bytes)>>>,
    hang: AtomicBool,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: &str, key: &str, ts: DateTime<Utc>) {
        let mut entities = self.entities.lock().expect("scripted api poisoned");
        let list = entities.entry(kind.to_owned()).or_default();
        list.push((ts, entity_blob(key, ts)));
        list.sort_by_key(|(ts, _)| *ts);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EntityClient for ScriptedApi {
    fn fetch_page<'a>(&'a self, query: EntityQuery<'a>) -> BoxFuture<'a, Result<Vec<Bytes>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Server { status: 502 }.into());
            }

            let entities = self.entities.lock().expect("scripted api poisoned");
            Ok(entities
                .get(query.kind)
                .map(|list| {
                    list.iter()
                        .filter(|(ts, _)| *ts >= query.start)
                        .take(query.max_results)
                        .map(|(_, blob)| blob.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

/// Fast-polling config for a single `Widget` kind with 5-minute units.
pub fn widget_config(archive_dir: &std::path::Path) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .api_url("http://localhost:9090")
        .kind(KindConfig::new("Widget", Duration::from_secs(300)))
        .poll_interval(Duration::from_millis(10))
        .archive_dir(archive_dir)
}

pub struct TestHarness {
    pub ctx: Arc<PipelineContext>,
    pub api: Arc<ScriptedApi>,
    pub coordinator_store: Arc<MemoryCoordinatorStore>,
    pub documents: Arc<MemoryDocumentStore>,
}

pub fn harness(config: PipelineConfig) -> TestHarness {
    harness_with_api(config, Arc::new(ScriptedApi::new()))
}

pub fn harness_with_api(config: PipelineConfig, api: Arc<ScriptedApi>) -> TestHarness {
    let coordinator_store = Arc::new(MemoryCoordinatorStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let ctx = Arc::new(PipelineContext::new(
        config,
        api.clone(),
        Arc::new(JsonEntityCodec::new("updated_at")),
        coordinator_store.clone(),
        documents.clone(),
    ));
    TestHarness {
        ctx,
        api,
        coordinator_store,
        documents,
    }
}
