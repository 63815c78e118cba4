//! Durable archival of raw fetched batches.
//!
//! One gzip file per unit of work, written before any decoding so a sink
//! failure can be replayed without re-contacting the remote API. Files are
//! staged to a `.tmp` sibling and renamed into place: a visible archive is
//! always complete, which is what makes abrupt worker termination safe.
//!
//! Container layout inside the gzip stream: for each blob, a big-endian
//! u32 length followed by the raw bytes.

use crate::pipeline::unit::{RawBatch, WorkUnit};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct ArchiveWriter {
    root: PathBuf,
}

/// Receipt for a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub entities: usize,
}

impl ArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Deterministic location for a unit's archive:
    /// `{root}/{YYYY-MM-DD}/{kind}/{kind}-{start}-{end}.blobs.gz`.
    ///
    /// Leading underscores are stripped from the kind; some downstream
    /// tooling refuses files with underscore-prefixed names.
    pub fn archive_path(&self, unit: &WorkUnit) -> PathBuf {
        let kind = unit.kind.trim_start_matches('_');
        let day = unit.range.start.format("%Y-%m-%d").to_string();
        let file = format!(
            "{kind}-{}-{}.blobs.gz",
            unit.range.start.format("%Y%m%dT%H%M%SZ"),
            unit.range.end.format("%Y%m%dT%H%M%SZ")
        );
        self.root.join(day).join(kind).join(file)
    }

    /// Writes the full batch, all-or-nothing. Completes (or fails loudly)
    /// before the caller may run the sink.
    pub async fn write(&self, batch: &RawBatch) -> Result<ArchiveHandle> {
        let path = self.archive_path(&batch.unit);
        let entities = batch.entities.clone();
        let count = entities.len();
        let unit = batch.unit.clone();

        let written = path.clone();
        tokio::task::spawn_blocking(move || write_blobs(&written, &entities))
            .await
            .context("archive write task failed")?
            .with_context(|| format!("failed to archive {unit}"))?;

        tracing::info!(unit = %unit, rows = count, path = %path.display(), "archived raw batch");
        Ok(ArchiveHandle {
            path,
            entities: count,
        })
    }

    /// Reads a unit's archive back as the ordered blob sequence it was
    /// written with. This is the replay source after a sink-side failure.
    pub async fn read(&self, unit: &WorkUnit) -> Result<Vec<Bytes>> {
        let path = self.archive_path(unit);
        let unit = unit.clone();
        tokio::task::spawn_blocking(move || read_blobs(&path))
            .await
            .context("archive read task failed")?
            .with_context(|| format!("failed to read archive for {unit}"))
    }
}

fn write_blobs(path: &Path, blobs: &[Bytes]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("archive path {} has no parent", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let tmp = path.with_extension("gz.tmp");
    let file = File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    for blob in blobs {
        let len = u32::try_from(blob.len()).context("blob exceeds u32 length prefix")?;
        encoder.write_all(&len.to_be_bytes())?;
        encoder.write_all(blob)?;
    }
    let file = encoder.finish().context("failed to finish gzip stream")?;
    file.sync_all().context("failed to sync archive file")?;

    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move archive into place at {}", path.display()))?;
    Ok(())
}

fn read_blobs(path: &Path) -> Result<Vec<Bytes>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut decoder = GzDecoder::new(file);
    let mut contents = Vec::new();
    decoder
        .read_to_end(&mut contents)
        .context("failed to decompress archive")?;

    let mut blobs = Vec::new();
    let mut offset = 0usize;
    while offset < contents.len() {
        if offset + 4 > contents.len() {
            bail!("archive {} has a truncated length prefix", path.display());
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&contents[offset..offset + 4]);
        let len = u32::from_be_bytes(prefix) as usize;
        offset += 4;
        if offset + len > contents.len() {
            bail!("archive {} has a truncated blob", path.display());
        }
        blobs.push(Bytes::copy_from_slice(&contents[offset..offset + len]));
        offset += len;
    }
    Ok(blobs)
}
