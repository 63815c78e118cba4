//! Units of work: a kind plus a half-open time range, and the raw batches
//! fetched for them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A half-open UTC window: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    /// Splits the range into consecutive sub-ranges of `step`, the last one
    /// truncated at `end`. Concatenated, the result covers the range
    /// exactly, with no gaps or overlaps.
    pub fn partition(&self, step: Duration) -> Vec<TimeRange> {
        let mut ranges = Vec::new();
        let Ok(step) = chrono::Duration::from_std(step) else {
            // A step too large for the calendar covers any range whole.
            if !self.is_empty() {
                ranges.push(*self);
            }
            return ranges;
        };
        if step <= chrono::Duration::zero() {
            return ranges;
        }

        let mut cursor = self.start;
        while cursor < self.end {
            let next = cursor
                .checked_add_signed(step)
                .map_or(self.end, |candidate| std::cmp::min(candidate, self.end));
            ranges.push(TimeRange::new(cursor, next));
            cursor = next;
        }
        ranges
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%S"),
            self.end.format("%Y-%m-%dT%H:%M:%S")
        )
    }
}

/// One download task: all entities of `kind` in `range`. Immutable once
/// created; its coordinator record carries the mutable status.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub kind: String,
    pub range: TimeRange,
}

impl WorkUnit {
    pub fn new(kind: impl Into<String>, range: TimeRange) -> Self {
        Self {
            kind: kind.into(),
            range,
        }
    }

    /// Derived coordinator id: the alphanumeric squash of kind, start, and
    /// end. The kind always participates, so two kinds over the same range
    /// never collide.
    pub fn id(&self) -> String {
        let raw = format!(
            "{}{}{}",
            self.kind,
            self.range.start.format("%Y-%m-%dT%H:%M:%S%.6f"),
            self.range.end.format("%Y-%m-%dT%H:%M:%S%.6f")
        );
        raw.chars().filter(char::is_ascii_alphanumeric).collect()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.range)
    }
}

/// The ordered blobs one fetch produced for a unit of work. Ephemeral:
/// archived, sunk, then dropped.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub unit: WorkUnit,
    pub entities: Vec<Bytes>,
}

impl RawBatch {
    pub fn new(unit: WorkUnit, entities: Vec<Bytes>) -> Self {
        Self { unit, entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, minute, 0).unwrap()
    }

    fn assert_exact_cover(range: TimeRange, parts: &[TimeRange]) {
        assert_eq!(parts.first().map(|p| p.start), Some(range.start));
        assert_eq!(parts.last().map(|p| p.end), Some(range.end));
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in partition");
        }
    }

    #[test]
    fn partition_covers_range_exactly() {
        let range = TimeRange::new(at(0), at(10));
        let parts = range.partition(Duration::from_secs(300));

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], TimeRange::new(at(0), at(5)));
        assert_eq!(parts[1], TimeRange::new(at(5), at(10)));
        assert_exact_cover(range, &parts);
    }

    #[test]
    fn partition_truncates_final_interval() {
        let range = TimeRange::new(at(0), at(7));
        let parts = range.partition(Duration::from_secs(180));

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], TimeRange::new(at(6), at(7)));
        assert_exact_cover(range, &parts);
    }

    #[test]
    fn oversized_step_yields_single_interval() {
        let range = TimeRange::new(at(0), at(3));
        let parts = range.partition(Duration::from_secs(3600));

        assert_eq!(parts, vec![range]);
    }

    #[test]
    fn empty_range_yields_nothing() {
        let range = TimeRange::new(at(5), at(5));
        assert!(range.partition(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn unit_id_embeds_kind() {
        let range = TimeRange::new(at(0), at(5));
        let widget = WorkUnit::new("Widget", range);
        let gadget = WorkUnit::new("Gadget", range);

        assert_ne!(widget.id(), gadget.id());
        assert!(widget.id().starts_with("Widget"));
        assert!(widget.id().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn unit_id_is_deterministic() {
        let range = TimeRange::new(at(0), at(5));
        assert_eq!(
            WorkUnit::new("Widget", range).id(),
            WorkUnit::new("Widget", range).id()
        );
    }
}
