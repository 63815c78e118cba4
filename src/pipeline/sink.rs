//! Decoding and upserting fetched entities into the destination store.

use crate::api::codec::{Document, EntityCodec};
use crate::pipeline::unit::RawBatch;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

/// Destination store seam. Upserts are keyed overwrites, which is what
/// makes redelivered boundary duplicates and whole-unit re-runs harmless.
pub trait DocumentStore: Send + Sync {
    fn upsert<'a>(&'a self, kind: &'a str, document: &'a Document) -> BoxFuture<'a, Result<()>>;
}

/// Counts for one sunk batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkOutcome {
    pub saved: usize,
    pub skipped: usize,
}

pub struct DocumentSink {
    codec: Arc<dyn EntityCodec>,
    store: Arc<dyn DocumentStore>,
    telemetry: Arc<Telemetry>,
}

impl DocumentSink {
    pub fn new(
        codec: Arc<dyn EntityCodec>,
        store: Arc<dyn DocumentStore>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            codec,
            store,
            telemetry,
        }
    }

    /// Decodes every blob in the batch and upserts the documents.
    ///
    /// A blob that fails to decode is logged and skipped; the batch keeps
    /// going. A store failure is fatal to the unit of work. Entities whose
    /// ordering timestamp falls outside the unit's window are stored
    /// anyway, with an info-level note for debugging sloppy upstreams.
    pub async fn sink(&self, batch: &RawBatch, key_field: &str) -> Result<SinkOutcome> {
        let mut outcome = SinkOutcome::default();

        for (index, raw) in batch.entities.iter().enumerate() {
            let document = match self.codec.decode(raw, key_field) {
                Ok(document) => document,
                Err(err) => {
                    self.telemetry.record_decode_skip();
                    tracing::warn!(
                        unit = %batch.unit,
                        index,
                        error = %err,
                        "skipping entity that failed to decode"
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            if let Ok(ts) = self.codec.timestamp(raw) {
                if !batch.unit.range.contains(ts) {
                    tracing::info!(
                        unit = %batch.unit,
                        key = %document.key,
                        timestamp = %ts.to_rfc3339(),
                        "entity timestamp falls outside the requested window"
                    );
                }
            }

            self.store
                .upsert(&batch.unit.kind, &document)
                .await
                .with_context(|| {
                    format!("failed to upsert {} {}", batch.unit.kind, document.key)
                })?;
            outcome.saved += 1;
        }

        self.telemetry.record_documents_saved(outcome.saved as u64);
        tracing::info!(
            unit = %batch.unit,
            saved = outcome.saved,
            skipped = outcome.skipped,
            "batch sunk to destination store"
        );
        Ok(outcome)
    }
}

/// Reference destination store: one sled tree per kind, documents stored
/// as JSON keyed by their identity field.
pub struct SledDocumentStore {
    db: sled::Db,
}

impl SledDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).with_context(|| {
            format!("failed to open document db at {}", path.as_ref().display())
        })?;
        Ok(Self { db })
    }

    pub fn with_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl DocumentStore for SledDocumentStore {
    fn upsert<'a>(&'a self, kind: &'a str, document: &'a Document) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let tree = self
                .db
                .open_tree(kind)
                .with_context(|| format!("failed to open document tree for {kind}"))?;
            let bytes = serde_json::to_vec(&document.body).context("failed to serialize document")?;
            tree.insert(document.key.as_bytes(), bytes)
                .with_context(|| format!("failed to upsert {kind} {}", document.key))?;
            Ok(())
        })
    }
}

/// In-memory destination store for tests and dry runs.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self, kind: &str) -> Vec<Document> {
        let documents = self.documents.lock().expect("document store poisoned");
        documents
            .get(kind)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self, kind: &str) -> Vec<String> {
        let documents = self.documents.lock().expect("document store poisoned");
        let mut keys: Vec<String> = documents
            .get(kind)
            .map(|by_key| by_key.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self, kind: &str) -> usize {
        let documents = self.documents.lock().expect("document store poisoned");
        documents.get(kind).map(HashMap::len).unwrap_or(0)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert<'a>(&'a self, kind: &'a str, document: &'a Document) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut documents = self.documents.lock().expect("document store poisoned");
            documents
                .entry(kind.to_owned())
                .or_default()
                .insert(document.key.clone(), document.clone());
            Ok(())
        })
    }
}
