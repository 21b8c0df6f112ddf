//! Bandwidth Contention Model
//!
//! First-in-first-out ledger of cross-rack recovery bandwidth. Each rack has a
//! point in time at which its recovery capacity becomes free; a repair that
//! reads from several racks waits for the slowest of the racks it uses.

use std::collections::BTreeMap;

use tracing::trace;

use crate::hardware::UnitId;

/// Per-rack occupancy ledger
#[derive(Debug, Clone, Default)]
pub struct BandwidthLedger {
    free_at: BTreeMap<UnitId, f64>,
    /// Requests that had to wait, and their summed wait
    delayed: usize,
    total_wait: f64,
}

impl BandwidthLedger {
    /// All racks free at time zero
    pub fn new(racks: &[UnitId]) -> Self {
        Self {
            free_at: racks.iter().map(|r| (*r, 0.0)).collect(),
            delayed: 0,
            total_wait: 0.0,
        }
    }

    /// Time at which the rack's recovery bandwidth becomes free
    pub fn free_at(&self, rack: UnitId) -> f64 {
        self.free_at.get(&rack).copied().unwrap_or(0.0)
    }

    /// Reserves `racks_needed` of the candidate racks for `duration` hours
    /// starting no earlier than `start`, and returns the completion time.
    ///
    /// The racks that become free soonest are used; the repair finishes after
    /// waiting for the slowest of them.
    pub fn occupy(
        &mut self,
        start: f64,
        candidates: &[UnitId],
        racks_needed: usize,
        duration: f64,
    ) -> f64 {
        let mut queue: Vec<(f64, UnitId)> = candidates
            .iter()
            .map(|r| ((self.free_at(*r) - start).max(0.0), *r))
            .collect();
        // stable: ties keep candidate order
        queue.sort_by(|a, b| a.0.total_cmp(&b.0));

        let used = racks_needed.min(queue.len());
        let wait = queue[..used]
            .iter()
            .map(|(w, _)| *w)
            .fold(0.0_f64, f64::max);
        if wait > 0.0 {
            self.delayed += 1;
            self.total_wait += wait;
        }

        for (_, rack) in &queue[..used] {
            let free = self.free_at.entry(*rack).or_insert(0.0);
            if *free <= start {
                *free = start + duration;
            } else {
                *free += duration;
            }
        }

        let completion = start + duration + wait;
        trace!(start, duration, wait, completion, "Occupied recovery bandwidth");
        completion
    }

    /// Number of delayed requests and their mean wait
    pub fn statistics(&self) -> (usize, f64) {
        if self.delayed == 0 {
            return (0, 0.0);
        }
        (self.delayed, self.total_wait / self.delayed as f64)
    }
}
