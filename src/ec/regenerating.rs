//! Regenerating code costs
//!
//! A regenerating code repairs one block by downloading a fraction of a block
//! from each of `d` helpers, provided at least `d` blocks are readable.

/// Minimum-storage regenerating repair cost in blocks: `d / (d - k + 1)`
pub(crate) fn msr_repair_cost(k: usize, d: usize) -> f64 {
    d as f64 / (d - k + 1) as f64
}

/// Minimum-bandwidth regenerating repair cost: `2d / (2d - k + 1)`.
///
/// Also the per-device storage, since MBR stores sub-blocks.
pub(crate) fn mbr_repair_cost(k: usize, d: usize) -> f64 {
    (2 * d) as f64 / (2 * d - k + 1) as f64
}

/// Hierarchical traffic: helpers sharing the rack don't cross the rack boundary
pub(crate) fn hierarchical_traffic(orc: f64, n: usize, d: usize, distinct_racks: usize) -> f64 {
    let same_rack = n as f64 / distinct_racks as f64 - 1.0;
    orc * (1.0 - same_rack / d as f64)
}
