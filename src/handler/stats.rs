//! End-of-run metrics.

use std::collections::HashSet;

use tracing::info;

use super::EventHandler;
use crate::report::{EventRunReport, LossDetails, QueueStatistics, UnavailabilityWindow};

const BYTES_PER_MB: f64 = 1_048_576.0;
const MB_PER_TIB: f64 = 1_048_576.0;

/// Time-to-failure and time-to-repair samples.
///
/// With `merge`, windows opening at the same instant count as one system
/// outage.
fn samples<'w>(
    windows: impl Iterator<Item = &'w UnavailabilityWindow>,
    mission_end: f64,
    merge: bool,
) -> (Vec<f64>, Vec<f64>) {
    let mut starts: Vec<f64> = Vec::new();
    let mut seen = HashSet::new();
    let mut repairs = Vec::new();
    for window in windows {
        if merge && !seen.insert(window.start.to_bits()) {
            continue;
        }
        starts.push(window.start);
        repairs.push(window.end.unwrap_or(mission_end) - window.start);
    }
    if starts.is_empty() {
        return (Vec::new(), Vec::new());
    }

    starts.sort_by(f64::total_cmp);
    let mut failures = Vec::with_capacity(starts.len());
    failures.push(starts[0]);
    failures.extend(starts.windows(2).map(|w| w[1] - w[0]));
    (failures, repairs)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

impl EventHandler<'_> {
    /// Finishes the run and computes its metrics
    pub fn end(self) -> EventRunReport {
        let config = self.config;
        let mission_end = config.total_time;
        let avg_slices = config.avg_total_slices();
        let undurable = self.losses.len() as u64;

        let pdl = undurable as f64 / avg_slices;
        let nomdl = undurable as f64 * config.chunk_size * BYTES_PER_MB
            / (config.total_active_storage * 1024.0);

        let (failures, repairs) = samples(self.windows.values().flatten(), mission_end, true);
        let (mttr, mtbf, pua) = if failures.is_empty() {
            (0.0, mission_end, 0.0)
        } else {
            let mttf = mean(&failures);
            let mttr = mean(&repairs);
            (round_to(mttr, 4), round_to(mttr + mttf, 4), mttr / (mttf + mttr))
        };

        let (_, stripe_repairs) = samples(self.windows.values().flatten(), mission_end, false);
        let pus = stripe_repairs.iter().sum::<f64>() / (mission_end * avg_slices);
        let trt = self.counters.repair_transfer_mb / MB_PER_TIB;

        let queue = self.ledger.as_ref().map(|ledger| {
            let (queued, avg_wait) = ledger.statistics();
            QueueStatistics { queued, avg_wait }
        });

        info!(
            undurable,
            unavailable = self.unavailable_count,
            anomalous_available = self.counters.anomalous_available,
            latent_failures = self.counters.latent_failures,
            scrubs = self.counters.scrubs,
            scrub_repairs = self.counters.scrub_repairs,
            disk_failures = self.counters.disk_failures,
            machine_failures = self.counters.machine_failures,
            repairs = self.counters.repairs,
            pdl,
            pua,
            "Run finished"
        );

        EventRunReport {
            undurable_count: undurable,
            unavailable_count: self.unavailable_count,
            loss_details: LossDetails::from_losses(&self.losses),
            losses: self.losses,
            pdl,
            nomdl,
            mttr,
            mtbf,
            pua,
            pus,
            trt,
            queue,
            counters: self.counters,
            windows: self.windows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: f64, end: Option<f64>) -> UnavailabilityWindow {
        UnavailabilityWindow { start, end }
    }

    #[test]
    fn test_merged_samples() {
        let windows = [
            window(10.0, Some(12.0)),
            window(10.0, Some(14.0)),
            window(30.0, None),
        ];
        let (failures, repairs) = samples(windows.iter(), 100.0, true);
        assert_eq!(failures, vec![10.0, 20.0]);
        assert_eq!(repairs, vec![2.0, 70.0]);

        let (failures, repairs) = samples(windows.iter(), 100.0, false);
        assert_eq!(failures, vec![10.0, 0.0, 20.0]);
        assert_eq!(repairs, vec![2.0, 4.0, 70.0]);
    }

    #[test]
    fn test_merge_across_stripes() {
        // stripes are visited in turn, so shared starts are not adjacent
        let windows: Vec<_> = (0..500)
            .flat_map(|_| [window(10.0, Some(11.0)), window(40.0, Some(43.0))])
            .collect();
        let (failures, repairs) = samples(windows.iter(), 100.0, true);
        assert_eq!(failures, vec![10.0, 30.0]);
        assert_eq!(repairs, vec![1.0, 3.0]);
    }

    #[test]
    fn test_no_windows() {
        let (failures, repairs) = samples(std::iter::empty(), 100.0, true);
        assert!(failures.is_empty());
        assert!(repairs.is_empty());
    }
}
