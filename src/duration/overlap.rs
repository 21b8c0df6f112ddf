//! Interval Overlap Analysis
//!
//! Sweeps outage intervals in start order, keeping the set of intervals still
//! open. Whenever more than `ft` units are down together, the intersection of
//! the open intervals is a concurrent period. Periods are then mapped to the
//! stripes hosted on the affected units to decide loss or unavailability.
//!
//! ```text
//!   unit a  [0 ───────────────── 10)
//!   unit b        [2 ───────────────── 12)
//!   unit c              [5 ─── 8)
//!                       ╰──┬──╯
//!               concurrent period [5, 8) with ft = 2
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Duration, DurationKind, DurationQueue, DurationUnit};
use crate::ec::RedundancyScheme;
use crate::error::{Error, Result};
use crate::hardware::{Placement, Topology, UnitKind};

/// Half-open time window, totally ordered by `(start, end)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Period {
    pub start: f64,
    pub end: f64,
}

impl Period {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Period {}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .total_cmp(&other.start)
            .then_with(|| self.end.total_cmp(&other.end))
    }
}

/// Concurrent periods found by one sweep
#[derive(Debug, Clone, Default)]
pub struct Concurrency {
    /// Every period, chained periods split so unit sets are never stale
    pub all: BTreeMap<Period, Vec<DurationUnit>>,
    /// Periods triggered by a loss interval
    pub lost: BTreeMap<Period, Vec<DurationUnit>>,
    pub concurrent_count: usize,
    pub lost_concurrent_count: usize,
}

/// Totals over a set of periods
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    /// Periods in which at least one stripe failed
    pub failure_periods: usize,
    pub failed_stripes: u64,
    /// Summed length of failure periods
    pub failed_period: f64,
    /// Σ period length × stripes failed in it
    pub weighted_period: f64,
}

// =============================================================================
// Analyzer
// =============================================================================

#[derive(Debug)]
pub struct OverlapAnalyzer<'a> {
    scheme: RedundancyScheme,
    ft: usize,
    threshold: f64,
    topology: &'a Topology,
    placement: &'a Placement,
    disk_usage: f64,
}

impl<'a> OverlapAnalyzer<'a> {
    /// Fails for locality codes without a known loss threshold
    pub fn new(
        scheme: RedundancyScheme,
        topology: &'a Topology,
        placement: &'a Placement,
        disk_usage: f64,
    ) -> Result<Self> {
        let threshold = scheme.loss_threshold()?;
        Ok(Self {
            scheme,
            ft: scheme.fault_tolerance(),
            threshold,
            topology,
            placement,
            disk_usage,
        })
    }

    pub fn fault_tolerance(&self) -> usize {
        self.ft
    }

    /// Sweeps the intervals and collects concurrent periods
    #[instrument(skip_all, fields(durations = durations.len(), ft = self.ft))]
    pub fn find_concurrent(&self, durations: &DurationQueue) -> Concurrency {
        let mut result = Concurrency::default();
        let mut active: Vec<&Duration> = Vec::new();
        let mut last: Option<Period> = None;

        for d in durations.ordered() {
            let now = d.start;
            active.retain(|open| open.end > now);
            active.push(d);
            if active.len() <= self.ft {
                continue;
            }

            let start = active.iter().map(|a| a.start).fold(f64::MIN, f64::max);
            let end = active.iter().map(|a| a.end).fold(f64::INFINITY, f64::min);
            let period = Period::new(start, end);

            if let Some(prev) = last {
                if period.start < prev.end {
                    if let Some(units) = result.all.remove(&prev) {
                        let head = Period::new(prev.start, period.start);
                        if head.length() > 0.0 {
                            result.all.insert(head, units.clone());
                        }
                        if period.end < prev.end {
                            result.all.insert(Period::new(period.end, prev.end), units);
                        }
                    }
                }
            }

            let units: Vec<DurationUnit> = active.iter().map(|a| a.unit).collect();
            if d.kind == DurationKind::Loss {
                result.lost.insert(period, units.clone());
                result.lost_concurrent_count += 1;
            }
            result.all.insert(period, units);

            last = Some(period);
            result.concurrent_count += 1;
        }

        debug!(
            concurrent = result.concurrent_count,
            lost_concurrent = result.lost_concurrent_count,
            "Found concurrent periods"
        );
        result
    }

    /// Maps each period to stripes and counts the ones that fail
    pub fn process<R: Rng + ?Sized>(
        &self,
        periods: &BTreeMap<Period, Vec<DurationUnit>>,
        rng: &mut R,
    ) -> Result<PeriodOutcome> {
        let mut outcome = PeriodOutcome::default();

        for (period, units) in periods {
            let failures = self.stripe_failures(units, rng)?;

            let mut failed = 0u64;
            for count in failures.values() {
                if *count <= self.ft {
                    continue;
                }
                if !self.scheme.is_mds() && *count == self.ft + 1 {
                    if rng.gen::<f64>() < self.threshold {
                        failed += 1;
                    }
                } else {
                    failed += 1;
                }
            }

            outcome.failed_stripes += failed;
            outcome.weighted_period += failed as f64 * period.length();
            if failed > 0 {
                outcome.failure_periods += 1;
                outcome.failed_period += period.length();
            }
        }

        Ok(outcome)
    }

    /// Blocks lost per stripe across the given units
    fn stripe_failures<R: Rng + ?Sized>(
        &self,
        units: &[DurationUnit],
        rng: &mut R,
    ) -> Result<BTreeMap<usize, usize>> {
        let mut failures: BTreeMap<usize, usize> = BTreeMap::new();
        for unit in units {
            match *unit {
                DurationUnit::Sector(disk) => {
                    // most sectors hold no block at all
                    if rng.gen::<f64>() > self.disk_usage {
                        continue;
                    }
                    if let Some(slot) = self.placement.random_slot(disk, rng) {
                        *failures.entry(slot.stripe).or_default() += 1;
                    }
                }
                DurationUnit::Unit(id) => {
                    if self.topology.kind(id) == UnitKind::Datacenter {
                        return Err(Error::InvalidEventTarget {
                            event: "outage duration".to_string(),
                            unit: self.topology.name(id),
                        });
                    }
                    for disk in self.topology.disks_under(id) {
                        for slot in self.placement.slots(disk) {
                            *failures.entry(slot.stripe).or_default() += 1;
                        }
                    }
                }
            }
        }
        Ok(failures)
    }
}
