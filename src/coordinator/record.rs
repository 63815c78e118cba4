//! Progress records: the persistent per-unit state machine.

use crate::pipeline::unit::{TimeRange, WorkUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a unit of work. Strictly forward-moving except for the
/// reprocessor's sanctioned reset to `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    None,
    Started,
    Fetched,
    Saved,
    Success,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadStatus::None => "NONE",
            DownloadStatus::Started => "STARTED",
            DownloadStatus::Fetched => "FETCHED",
            DownloadStatus::Saved => "SAVED",
            DownloadStatus::Success => "SUCCESS",
        };
        f.write_str(label)
    }
}

/// One history entry: the status entered and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: DownloadStatus,
    pub at: DateTime<Utc>,
}

/// The coordinator's durable record for one unit of work.
///
/// `history` is append-only and retains every status ever entered,
/// including repeated `Started` entries left by reprocessing runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: String,
    pub kind: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: DownloadStatus,
    pub history: Vec<StatusEvent>,
}

impl ProgressRecord {
    pub fn new(unit: &WorkUnit) -> Self {
        Self {
            id: unit.id(),
            kind: unit.kind.clone(),
            start: unit.range.start,
            end: unit.range.end,
            status: DownloadStatus::None,
            history: Vec::new(),
        }
    }

    /// Appends a history event and makes `status` the current state.
    pub fn push_status(&mut self, status: DownloadStatus, at: DateTime<Utc>) {
        self.history.push(StatusEvent { status, at });
        self.status = status;
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Success
    }

    /// When this unit first entered `Started`, if it ever did.
    pub fn first_started(&self) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .find(|event| event.status == DownloadStatus::Started)
            .map(|event| event.at)
    }

    /// Timestamp of the most recent transition of any status.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|event| event.at)
    }

    /// Reconstructs the unit of work this record tracks.
    pub fn unit(&self) -> WorkUnit {
        WorkUnit::new(self.kind.clone(), TimeRange::new(self.start, self.end))
    }
}
