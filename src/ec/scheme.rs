//! Redundancy Schemes
//!
//! Closed set of erasure-code families. Every family answers the same four
//! questions about a stripe's block-state vector: can it be decoded, what does
//! a single-block repair cost, what does a batch repair cost, and how much
//! traffic does a repair generate in steady state.
//!
//! Costs are expressed in blocks transferred.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

use super::lrc;
use super::regenerating;
use super::state::{restore_blocks, BlockState, StripeState};
use crate::error::{Error, Result};

// =============================================================================
// Scheme
// =============================================================================

/// Erasure-code family and parameters
///
/// Parsed from names like `RS_9_6`, `LRC_10_6_2`, `XORBAS_16_10_2`,
/// `MSR_14_10_12` and `MBR_9_6_6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RedundancyScheme {
    /// Reed-Solomon (MDS)
    Rs { n: usize, k: usize },
    /// Locally Repairable Code with `ll` local groups
    Lrc { n: usize, k: usize, ll: usize },
    /// LRC whose parities also form a repair group of their own
    Xorbas { n: usize, k: usize, ll: usize },
    /// Minimum-storage regenerating code with `d` helpers
    Msr { n: usize, k: usize, d: usize },
    /// Minimum-bandwidth regenerating code with `d` helpers
    Mbr { n: usize, k: usize, d: usize },
}

impl RedundancyScheme {
    pub fn rs(n: usize, k: usize) -> Result<Self> {
        check_nk(n, k)?;
        Ok(RedundancyScheme::Rs { n, k })
    }

    pub fn lrc(n: usize, k: usize, ll: usize) -> Result<Self> {
        check_locality(n, k, ll)?;
        Ok(RedundancyScheme::Lrc { n, k, ll })
    }

    pub fn xorbas(n: usize, k: usize, ll: usize) -> Result<Self> {
        check_locality(n, k, ll)?;
        Ok(RedundancyScheme::Xorbas { n, k, ll })
    }

    pub fn msr(n: usize, k: usize, d: usize) -> Result<Self> {
        check_regenerating(n, k, d)?;
        Ok(RedundancyScheme::Msr { n, k, d })
    }

    pub fn mbr(n: usize, k: usize, d: usize) -> Result<Self> {
        check_regenerating(n, k, d)?;
        Ok(RedundancyScheme::Mbr { n, k, d })
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Total blocks per stripe
    pub fn n(&self) -> usize {
        match *self {
            RedundancyScheme::Rs { n, .. }
            | RedundancyScheme::Lrc { n, .. }
            | RedundancyScheme::Xorbas { n, .. }
            | RedundancyScheme::Msr { n, .. }
            | RedundancyScheme::Mbr { n, .. } => n,
        }
    }

    /// Data blocks per stripe
    pub fn k(&self) -> usize {
        match *self {
            RedundancyScheme::Rs { k, .. }
            | RedundancyScheme::Lrc { k, .. }
            | RedundancyScheme::Xorbas { k, .. }
            | RedundancyScheme::Msr { k, .. }
            | RedundancyScheme::Mbr { k, .. } => k,
        }
    }

    pub fn is_mds(&self) -> bool {
        !matches!(
            self,
            RedundancyScheme::Lrc { .. } | RedundancyScheme::Xorbas { .. }
        )
    }

    /// Concurrent block failures a stripe always survives
    pub fn fault_tolerance(&self) -> usize {
        let parity = self.n() - self.k();
        if self.is_mds() {
            parity
        } else {
            parity - 1
        }
    }

    /// Normal repair cost: read `k` blocks
    pub fn repair_cost(&self) -> f64 {
        self.k() as f64
    }

    /// Optimal repair cost
    pub fn optimal_repair_cost(&self) -> f64 {
        match *self {
            RedundancyScheme::Rs { k, .. } => k as f64,
            RedundancyScheme::Lrc { k, ll, .. } | RedundancyScheme::Xorbas { k, ll, .. } => {
                k as f64 / ll as f64
            }
            RedundancyScheme::Msr { k, d, .. } => regenerating::msr_repair_cost(k, d),
            RedundancyScheme::Mbr { k, d, .. } => regenerating::mbr_repair_cost(k, d),
        }
    }

    /// Storage per device, in blocks
    pub fn device_storage(&self) -> f64 {
        match *self {
            RedundancyScheme::Mbr { k, d, .. } => regenerating::mbr_repair_cost(k, d),
            _ => 1.0,
        }
    }

    /// Storage per stripe, in blocks
    pub fn stripe_storage(&self) -> f64 {
        self.n() as f64 * self.device_storage()
    }

    /// Storage overhead `n / k`, rounded to three decimals
    pub fn storage_overhead(&self) -> f64 {
        (self.n() as f64 / self.k() as f64 * 1000.0).round() / 1000.0
    }

    /// Blocks (and hence racks) a reconstruction reads from
    pub fn repair_sources(&self) -> usize {
        match *self {
            RedundancyScheme::Msr { d, .. } | RedundancyScheme::Mbr { d, .. } => d,
            _ => self.k(),
        }
    }

    /// Probability that a locality-code stripe is lost when exactly one more
    /// block than its fault tolerance is down.
    ///
    /// MDS codes lose the stripe deterministically at that point. Only two
    /// locality layouts have a measured value.
    pub fn loss_threshold(&self) -> Result<f64> {
        if self.is_mds() {
            return Ok(1.0);
        }
        match (self.n(), self.k()) {
            (10, 6) => Ok(0.143),
            (16, 12) => Ok(0.138),
            (n, k) => Err(Error::UnsupportedThreshold { n, k }),
        }
    }

    // =========================================================================
    // Repair Model
    // =========================================================================

    /// Whether the surviving blocks can rebuild every missing one
    pub fn is_repairable(&self, state: &StripeState) -> Result<bool> {
        let blocks = match state.blocks() {
            Some(blocks) => blocks,
            None => return Ok(false),
        };
        self.check_len(blocks)?;

        let repairable = match *self {
            RedundancyScheme::Rs { k, .. }
            | RedundancyScheme::Msr { k, .. }
            | RedundancyScheme::Mbr { k, .. } => available(blocks) >= k,
            RedundancyScheme::Lrc { n, k, ll } => lrc::is_decodable(blocks, n, k, ll),
            RedundancyScheme::Xorbas { n, k, ll } => {
                let view = lrc::with_parity_group_completed(blocks, k);
                lrc::is_decodable(&view, n, k, ll)
            }
        };
        Ok(repairable)
    }

    /// Repairs exactly one block and returns the cost.
    ///
    /// Fails when the block is already normal or the stripe can't be decoded.
    pub fn repair(&self, state: &mut StripeState, index: usize) -> Result<f64> {
        self.ensure_repairable(state)?;
        let blocks = state
            .blocks_mut()
            .ok_or_else(|| Error::Internal("repair on lost stripe".to_string()))?;
        let current = *blocks.get(index).ok_or_else(|| {
            Error::Internal(format!("block index {} out of range", index))
        })?;
        if current.is_normal() {
            return Err(Error::BlockNotDamaged { index });
        }

        let optimal = match *self {
            RedundancyScheme::Rs { .. } => false,
            RedundancyScheme::Lrc { k, ll, .. } => {
                lrc::group_normal_count(blocks, k, ll, index) >= lrc::group_width(k, ll)
            }
            RedundancyScheme::Xorbas { k, ll, .. } => {
                lrc::group_normal_count(blocks, k, ll, index) >= lrc::group_width(k, ll)
                    || (index >= k && lrc::parity_missing(blocks, k) == 1)
            }
            RedundancyScheme::Msr { d, .. } | RedundancyScheme::Mbr { d, .. } => {
                available(blocks) >= d
            }
        };

        blocks[index] = BlockState::Normal;
        let cost = if optimal {
            self.optimal_repair_cost()
        } else {
            self.repair_cost()
        };
        trace!(index, cost, "Repaired block");
        Ok(cost)
    }

    /// Repairs every damaged block in one pass.
    ///
    /// With `only_lost`, unavailable blocks are left alone. The fixed cost of
    /// reading `k` blocks is paid once; every extra rebuilt block adds one
    /// upload.
    pub fn parallel_repair(&self, state: &mut StripeState, only_lost: bool) -> Result<f64> {
        self.ensure_repairable(state)?;
        let blocks = state
            .blocks_mut()
            .ok_or_else(|| Error::Internal("repair on lost stripe".to_string()))?;

        let available_before = available(blocks);
        let repaired = restore_blocks(blocks, only_lost);

        let cost = match repaired.as_slice() {
            [] => 0.0,
            [index] if self.single_repair_is_optimal(*index, available_before) => {
                self.optimal_repair_cost()
            }
            many => self.repair_cost() + many.len() as f64 - 1.0,
        };
        trace!(repaired = repaired.len(), cost, "Batch repaired stripe");
        Ok(cost)
    }

    /// Expected blocks transferred per block repair.
    ///
    /// Hierarchical placement keeps `n / distinct_racks` blocks per rack, so
    /// that many minus one helpers are read without crossing racks.
    pub fn repair_traffic(&self, hierarchical: bool, distinct_racks: usize) -> f64 {
        let n = self.n();
        let racks = distinct_racks.max(1);
        match *self {
            RedundancyScheme::Lrc { k, ll, .. } => {
                let m1 = lrc::global_parity(n, k, ll) as f64;
                let rt = (m1 * self.repair_cost() + (n as f64 - m1) * self.optimal_repair_cost())
                    / n as f64;
                if hierarchical {
                    subtract_same_rack(rt, n, racks)
                } else {
                    rt
                }
            }
            RedundancyScheme::Msr { d, .. } | RedundancyScheme::Mbr { d, .. } => {
                let orc = self.optimal_repair_cost();
                if hierarchical {
                    regenerating::hierarchical_traffic(orc, n, d, racks)
                } else {
                    orc
                }
            }
            RedundancyScheme::Rs { .. } | RedundancyScheme::Xorbas { .. } => {
                let orc = self.optimal_repair_cost();
                if hierarchical {
                    subtract_same_rack(orc, n, racks)
                } else {
                    orc
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_len(&self, blocks: &[BlockState]) -> Result<()> {
        if blocks.len() != self.n() {
            return Err(Error::StateLength {
                expected: self.n(),
                actual: blocks.len(),
            });
        }
        Ok(())
    }

    fn ensure_repairable(&self, state: &StripeState) -> Result<()> {
        if !self.is_repairable(state)? {
            return Err(Error::NotRepairable {
                available: state.available_count(),
                required: self.k(),
            });
        }
        Ok(())
    }

    fn single_repair_is_optimal(&self, index: usize, available_before: usize) -> bool {
        match *self {
            RedundancyScheme::Rs { .. } => false,
            RedundancyScheme::Lrc { n, k, ll } => index < n - lrc::global_parity(n, k, ll),
            RedundancyScheme::Xorbas { .. } => true,
            RedundancyScheme::Msr { d, .. } | RedundancyScheme::Mbr { d, .. } => {
                available_before >= d
            }
        }
    }
}

fn available(blocks: &[BlockState]) -> usize {
    blocks.iter().filter(|s| s.is_normal()).count()
}

fn subtract_same_rack(traffic: f64, n: usize, distinct_racks: usize) -> f64 {
    let reduced = n as f64 / distinct_racks as f64 - 1.0;
    if reduced > traffic {
        0.0
    } else {
        traffic - reduced
    }
}

fn check_nk(n: usize, k: usize) -> Result<()> {
    if k == 0 || k >= n {
        return Err(Error::InvalidScheme(format!(
            "k must be in [1, n), got n={}, k={}",
            n, k
        )));
    }
    Ok(())
}

fn check_locality(n: usize, k: usize, ll: usize) -> Result<()> {
    check_nk(n, k)?;
    if ll == 0 || k % ll != 0 {
        return Err(Error::InvalidScheme(format!(
            "k={} must split evenly into ll={} local groups",
            k, ll
        )));
    }
    if k + ll * lrc::LOCAL_PARITY > n {
        return Err(Error::InvalidScheme(format!(
            "n={} leaves no room for {} local parities",
            n, ll
        )));
    }
    Ok(())
}

fn check_regenerating(n: usize, k: usize, d: usize) -> Result<()> {
    check_nk(n, k)?;
    if d < k || d >= n {
        return Err(Error::InvalidScheme(format!(
            "d must be in [k, n), got n={}, k={}, d={}",
            n, k, d
        )));
    }
    Ok(())
}

// =============================================================================
// Naming
// =============================================================================

impl fmt::Display for RedundancyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RedundancyScheme::Rs { n, k } => write!(f, "RS_{}_{}", n, k),
            RedundancyScheme::Lrc { n, k, ll } => write!(f, "LRC_{}_{}_{}", n, k, ll),
            RedundancyScheme::Xorbas { n, k, ll } => write!(f, "XORBAS_{}_{}_{}", n, k, ll),
            RedundancyScheme::Msr { n, k, d } => write!(f, "MSR_{}_{}_{}", n, k, d),
            RedundancyScheme::Mbr { n, k, d } => write!(f, "MBR_{}_{}_{}", n, k, d),
        }
    }
}

impl FromStr for RedundancyScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('_');
        let family = parts.next().unwrap_or_default().to_uppercase();
        let params = parts
            .map(|p| {
                p.parse::<usize>().map_err(|_| {
                    Error::InvalidScheme(format!("'{}' has a non-integer parameter '{}'", s, p))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match (family.as_str(), params.as_slice()) {
            ("RS", [n, k]) => Self::rs(*n, *k),
            ("LRC", [n, k, ll]) => Self::lrc(*n, *k, *ll),
            ("XORBAS", [n, k, ll]) => Self::xorbas(*n, *k, *ll),
            ("MSR", [n, k, d]) => Self::msr(*n, *k, *d),
            ("MBR", [n, k, d]) => Self::mbr(*n, *k, *d),
            _ => Err(Error::InvalidScheme(format!(
                "unknown redundancy scheme '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RedundancyScheme {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RedundancyScheme> for String {
    fn from(scheme: RedundancyScheme) -> Self {
        scheme.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use BlockState::{LostDurability as L, LostLatent as S, Normal as N, Unavailable as U};

    fn blocks(v: &[BlockState]) -> StripeState {
        StripeState::Blocks(v.to_vec())
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "RS_9_6".parse::<RedundancyScheme>().unwrap(),
            RedundancyScheme::Rs { n: 9, k: 6 }
        );
        assert_eq!(
            "lrc_10_6_2".parse::<RedundancyScheme>().unwrap(),
            RedundancyScheme::Lrc { n: 10, k: 6, ll: 2 }
        );
        assert_eq!(
            "MSR_14_10_12".parse::<RedundancyScheme>().unwrap().to_string(),
            "MSR_14_10_12"
        );
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_matches!(
            "RS_6_6".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            "MSR_14_10_14".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            "MSR_14_10_9".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            "LRC_10_5_2".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            "FOO_9_6".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
        assert_matches!(
            "RS_9_x".parse::<RedundancyScheme>(),
            Err(Error::InvalidScheme(_))
        );
    }

    #[test]
    fn test_serde_as_string() {
        let scheme: RedundancyScheme = serde_yaml::from_str("XORBAS_16_10_2").unwrap();
        assert_eq!(scheme, RedundancyScheme::Xorbas { n: 16, k: 10, ll: 2 });
        let json = serde_json::to_string(&scheme).unwrap();
        assert_eq!(json, "\"XORBAS_16_10_2\"");
    }

    // =========================================================================
    // Derived Constants
    // =========================================================================

    #[test]
    fn test_constants() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        assert_eq!(rs.storage_overhead(), 1.5);
        assert_eq!(rs.optimal_repair_cost(), 6.0);
        assert_eq!(rs.fault_tolerance(), 3);
        assert_eq!(rs.stripe_storage(), 9.0);

        let lrc = RedundancyScheme::lrc(10, 6, 2).unwrap();
        assert!(!lrc.is_mds());
        assert_eq!(lrc.optimal_repair_cost(), 3.0);
        assert_eq!(lrc.fault_tolerance(), 3);

        let mbr = RedundancyScheme::mbr(9, 6, 6).unwrap();
        assert!((mbr.device_storage() - 12.0 / 7.0).abs() < 1e-12);
        assert_eq!(mbr.repair_sources(), 6);
    }

    #[test]
    fn test_loss_threshold() {
        assert_eq!(RedundancyScheme::lrc(10, 6, 2).unwrap().loss_threshold().unwrap(), 0.143);
        assert_eq!(
            RedundancyScheme::xorbas(16, 12, 2).unwrap().loss_threshold().unwrap(),
            0.138
        );
        assert_eq!(RedundancyScheme::rs(9, 6).unwrap().loss_threshold().unwrap(), 1.0);
        assert_matches!(
            RedundancyScheme::lrc(12, 6, 2).unwrap().loss_threshold(),
            Err(Error::UnsupportedThreshold { n: 12, k: 6 })
        );
    }

    #[test]
    fn test_repair_traffic() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        assert_eq!(rs.repair_traffic(false, 9), 6.0);
        // 3 racks, 3 blocks each: 2 same-rack helpers
        assert_eq!(rs.repair_traffic(true, 3), 4.0);

        let lrc = RedundancyScheme::lrc(10, 6, 2).unwrap();
        // (2 * 6 + 8 * 3) / 10
        assert!((lrc.repair_traffic(false, 10) - 3.6).abs() < 1e-12);
        // 10 blocks on 2 racks saves 4 blocks, floored at zero
        assert_eq!(lrc.repair_traffic(true, 2), 0.0);
    }

    // =========================================================================
    // Repairability
    // =========================================================================

    #[test]
    fn test_rs_repairable() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        assert!(rs.is_repairable(&blocks(&[N, N, N, N, N, N, U, L, S])).unwrap());
        assert!(!rs.is_repairable(&blocks(&[N, N, N, N, N, U, U, L, S])).unwrap());
        assert!(!rs.is_repairable(&StripeState::Lost).unwrap());
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        assert_matches!(
            rs.is_repairable(&StripeState::healthy(8)),
            Err(Error::StateLength { expected: 9, actual: 8 })
        );
    }

    #[test]
    fn test_xorbas_single_parity_loss() {
        let xorbas = RedundancyScheme::xorbas(10, 6, 2).unwrap();
        let lrc = RedundancyScheme::lrc(10, 6, 2).unwrap();
        // group 0 lost all data blocks; a single missing global parity is
        // rebuilt from the parity group first
        let state = blocks(&[L, L, L, N, N, N, N, N, L, N]);
        assert!(!lrc.is_repairable(&state).unwrap());
        assert!(xorbas.is_repairable(&state).unwrap());
    }

    // =========================================================================
    // Single Repair
    // =========================================================================

    #[test]
    fn test_rs_repair() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        let mut state = blocks(&[N, N, U, L, S, N, N, N, N]);
        assert_eq!(rs.repair(&mut state, 3).unwrap(), 6.0);
        assert_eq!(state.block(3), Some(N));
        assert_matches!(rs.repair(&mut state, 0), Err(Error::BlockNotDamaged { index: 0 }));
    }

    #[test]
    fn test_repair_unrepairable_fails() {
        let rs = RedundancyScheme::rs(4, 2).unwrap();
        let mut state = blocks(&[N, L, L, L]);
        assert_matches!(rs.repair(&mut state, 1), Err(Error::NotRepairable { .. }));
        assert_matches!(
            rs.repair(&mut StripeState::Lost, 0),
            Err(Error::NotRepairable { .. })
        );
    }

    #[test]
    fn test_lrc_repair_costs() {
        let lrc = RedundancyScheme::lrc(10, 6, 2).unwrap();
        // one loss in group 0
        let mut state = blocks(&[L, N, N, N, N, N, N, N, N, N]);
        assert_eq!(lrc.repair(&mut state, 0).unwrap(), 3.0);

        // two losses in group 0: normal cost
        let mut state = blocks(&[L, L, N, N, N, N, N, N, N, N]);
        assert_eq!(lrc.repair(&mut state, 0).unwrap(), 6.0);

        // global parity always pays the normal cost
        let mut state = blocks(&[N, N, N, N, N, N, N, N, L, N]);
        assert_eq!(lrc.repair(&mut state, 8).unwrap(), 6.0);
    }

    #[test]
    fn test_xorbas_parity_repair_is_optimal() {
        let xorbas = RedundancyScheme::xorbas(10, 6, 2).unwrap();
        let mut state = blocks(&[N, N, N, N, N, N, N, N, L, N]);
        assert_eq!(xorbas.repair(&mut state, 8).unwrap(), 3.0);
    }

    #[test]
    fn test_msr_repair_needs_d_helpers() {
        let msr = RedundancyScheme::msr(14, 10, 12).unwrap();
        let mut state = StripeState::healthy(14);
        if let Some(b) = state.blocks_mut() {
            b[1] = U;
            b[2] = S;
        }
        // 12 available
        assert_eq!(msr.repair(&mut state, 2).unwrap(), 4.0);

        if let Some(b) = state.blocks_mut() {
            b[3] = L;
            b[4] = L;
        }
        // 11 available
        assert_eq!(msr.repair(&mut state, 3).unwrap(), 10.0);
    }

    // =========================================================================
    // Batch Repair
    // =========================================================================

    #[test]
    fn test_rs_parallel_repair() {
        let rs = RedundancyScheme::rs(9, 6).unwrap();
        let mut state = blocks(&[N, N, U, L, S, N, N, N, N]);
        // two lost blocks: k + 2 - 1
        assert_eq!(rs.parallel_repair(&mut state, true).unwrap(), 7.0);
        assert_eq!(state.block(2), Some(U));
        // only the unavailable block left
        assert_eq!(rs.parallel_repair(&mut state, false).unwrap(), 6.0);
        assert_eq!(rs.parallel_repair(&mut state, false).unwrap(), 0.0);
    }

    #[test]
    fn test_lrc_parallel_single_global_parity() {
        let lrc = RedundancyScheme::lrc(10, 6, 2).unwrap();
        let mut state = blocks(&[N, N, N, N, N, N, N, N, N, L]);
        assert_eq!(lrc.parallel_repair(&mut state, false).unwrap(), 6.0);

        let mut state = blocks(&[N, N, N, N, N, N, N, L, N, N]);
        assert_eq!(lrc.parallel_repair(&mut state, false).unwrap(), 3.0);
    }

    #[test]
    fn test_msr_parallel_repair() {
        let msr = RedundancyScheme::msr(14, 10, 12).unwrap();
        let mut state = StripeState::healthy(14);
        if let Some(b) = state.blocks_mut() {
            b[0] = L;
        }
        assert_eq!(msr.parallel_repair(&mut state, false).unwrap(), 4.0);

        if let Some(b) = state.blocks_mut() {
            b[0] = L;
            b[1] = U;
        }
        assert_eq!(msr.parallel_repair(&mut state, false).unwrap(), 11.0);
    }
}
