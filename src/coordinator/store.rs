//! Persistence backends for progress records.
//!
//! The store is the only state shared across concurrent workers. Every
//! write is an independent upsert keyed by unit id, so no cross-worker
//! locking is required; last writer wins on the current status, which is
//! acceptable because writers only report states their own stage reached.

use crate::coordinator::record::ProgressRecord;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub trait CoordinatorStore: Send + Sync {
    fn find<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<ProgressRecord>>>;

    fn upsert<'a>(&'a self, record: &'a ProgressRecord) -> BoxFuture<'a, Result<()>>;

    /// All records whose status is not `Success`.
    fn incomplete<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ProgressRecord>>>;
}

/// Durable store backed by a sled tree, one JSON value per record id.
pub struct SledCoordinatorStore {
    tree: sled::Tree,
}

impl SledCoordinatorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).with_context(|| {
            format!("failed to open coordinator db at {}", path.as_ref().display())
        })?;
        Self::with_db(&db)
    }

    pub fn with_db(db: &sled::Db) -> Result<Self> {
        let tree = db
            .open_tree("progress")
            .context("failed to open progress tree")?;
        Ok(Self { tree })
    }

    fn get(&self, id: &str) -> Result<Option<ProgressRecord>> {
        let Some(bytes) = self
            .tree
            .get(id.as_bytes())
            .with_context(|| format!("failed to read progress record {id}"))?
        else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("progress record {id} is corrupt"))?;
        Ok(Some(record))
    }

    fn put(&self, record: &ProgressRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record).context("failed to serialize progress record")?;
        self.tree
            .insert(record.id.as_bytes(), bytes)
            .with_context(|| format!("failed to write progress record {}", record.id))?;
        self.tree
            .flush()
            .context("failed to flush coordinator store")?;
        Ok(())
    }

    fn scan_incomplete(&self) -> Result<Vec<ProgressRecord>> {
        let mut records = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry.context("failed to iterate coordinator store")?;
            let record: ProgressRecord =
                serde_json::from_slice(&bytes).context("progress record is corrupt")?;
            if !record.is_complete() {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl CoordinatorStore for SledCoordinatorStore {
    fn find<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<ProgressRecord>>> {
        Box::pin(async move { self.get(id) })
    }

    fn upsert<'a>(&'a self, record: &'a ProgressRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.put(record) })
    }

    fn incomplete<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ProgressRecord>>> {
        Box::pin(async move { self.scan_incomplete() })
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCoordinatorStore {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

impl MemoryCoordinatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinatorStore for MemoryCoordinatorStore {
    fn find<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<ProgressRecord>>> {
        Box::pin(async move {
            let records = self.records.lock().expect("coordinator store poisoned");
            Ok(records.get(id).cloned())
        })
    }

    fn upsert<'a>(&'a self, record: &'a ProgressRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.lock().expect("coordinator store poisoned");
            records.insert(record.id.clone(), record.clone());
            Ok(())
        })
    }

    fn incomplete<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ProgressRecord>>> {
        Box::pin(async move {
            let records = self.records.lock().expect("coordinator store poisoned");
            Ok(records
                .values()
                .filter(|record| !record.is_complete())
                .cloned()
                .collect())
        })
    }
}
