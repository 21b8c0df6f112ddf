//! Outage Durations
//!
//! Duration mode skips the stateful event simulation: every unit's outages are
//! generated as `[start, end)` intervals and the [`overlap`] analyzer looks for
//! periods where more units are down than the code tolerates.

pub mod overlap;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::FailureKind;
use crate::hardware::UnitId;

pub use overlap::{Concurrency, OverlapAnalyzer, Period, PeriodOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationKind {
    /// Data on the unit is destroyed until rebuilt
    Loss,
    /// Data on the unit is unreachable
    Unavailable,
}

/// What an interval applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    /// A rack, machine or disk
    Unit(UnitId),
    /// A single sector of the given disk
    Sector(UnitId),
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationUnit::Unit(id) => write!(f, "unit {}", id),
            DurationUnit::Sector(disk) => write!(f, "sector of disk {}", disk),
        }
    }
}

/// Id issued by the owning [`DurationQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DurationId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Duration {
    pub id: DurationId,
    pub kind: DurationKind,
    pub start: f64,
    pub end: f64,
    pub unit: DurationUnit,
    pub cause: Option<FailureKind>,
    pub ignore: bool,
}

/// Intervals of one run, iterated by start time then insertion order
#[derive(Debug, Default)]
pub struct DurationQueue {
    durations: Vec<Duration>,
    next_id: u64,
}

impl DurationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        kind: DurationKind,
        start: f64,
        end: f64,
        unit: DurationUnit,
        cause: Option<FailureKind>,
    ) -> Result<DurationId> {
        if !start.is_finite() || start < 0.0 {
            return Err(Error::InvalidTimestamp(start));
        }
        if end.is_nan() || end < start {
            return Err(Error::InvalidTimestamp(end));
        }
        self.next_id += 1;
        let id = DurationId(self.next_id);
        self.durations.push(Duration {
            id,
            kind,
            start,
            end,
            unit,
            cause,
            ignore: false,
        });
        Ok(id)
    }

    pub fn set_ignore(&mut self, id: DurationId) {
        if let Some(d) = self.durations.iter_mut().rev().find(|d| d.id == id) {
            d.ignore = true;
        }
    }

    /// Non-ignored intervals ordered by start time, ties in insertion order
    pub fn ordered(&self) -> Vec<&Duration> {
        let mut ordered: Vec<&Duration> = self.durations.iter().filter(|d| !d.ignore).collect();
        ordered.sort_by(|a, b| a.start.total_cmp(&b.start));
        ordered
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Duration> {
        self.durations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_per_queue() {
        let mut a = DurationQueue::new();
        let mut b = DurationQueue::new();
        let unit = DurationUnit::Unit(UnitId(1));
        let first = a.add(DurationKind::Loss, 0.0, 1.0, unit, None).unwrap();
        let second = a.add(DurationKind::Loss, 0.0, 1.0, unit, None).unwrap();
        let other = b.add(DurationKind::Loss, 0.0, 1.0, unit, None).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, other);
    }

    #[test]
    fn test_ordered_skips_ignored() {
        let mut queue = DurationQueue::new();
        let unit = DurationUnit::Unit(UnitId(1));
        queue.add(DurationKind::Unavailable, 5.0, 6.0, unit, None).unwrap();
        let hidden = queue.add(DurationKind::Loss, 1.0, 2.0, unit, None).unwrap();
        queue.add(DurationKind::Loss, 3.0, 4.0, unit, None).unwrap();
        queue.set_ignore(hidden);

        let starts: Vec<f64> = queue.ordered().iter().map(|d| d.start).collect();
        assert_eq!(starts, vec![3.0, 5.0]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_rejects_inverted_interval() {
        let mut queue = DurationQueue::new();
        let unit = DurationUnit::Sector(UnitId(4));
        assert!(queue.add(DurationKind::Loss, 2.0, 1.0, unit, None).is_err());
        assert!(queue.add(DurationKind::Loss, f64::NAN, 1.0, unit, None).is_err());
    }
}
