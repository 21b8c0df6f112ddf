//! Locally Repairable Code decoding rules
//!
//! Block layout for `LRC(n, k, ll)` with one local parity per group:
//!
//! ```text
//! [ data group 0 | data group 1 | ... | local parities (ll) | global parities (m1) ]
//! ```
//!
//! Local group `x` is `data[x*b..(x+1)*b]` plus `local[x]`, with `b = k / ll`.

use super::state::BlockState;

/// Local parity blocks per group
pub(crate) const LOCAL_PARITY: usize = 1;

/// Data blocks per local group
pub(crate) fn group_width(k: usize, ll: usize) -> usize {
    k / ll
}

/// Global parity count
pub(crate) fn global_parity(n: usize, k: usize, ll: usize) -> usize {
    n - k - ll * LOCAL_PARITY
}

/// Blocks of local group `x`: its data blocks followed by its local parity
fn local_group(blocks: &[BlockState], k: usize, ll: usize, x: usize) -> Vec<BlockState> {
    let b = group_width(k, ll);
    let mut group = blocks[x * b..(x + 1) * b].to_vec();
    let parity_start = k + x * LOCAL_PARITY;
    group.extend_from_slice(&blocks[parity_start..parity_start + LOCAL_PARITY]);
    group
}

/// Local group owning the block, `None` for global parities
pub(crate) fn group_of(index: usize, k: usize, ll: usize) -> Option<usize> {
    let b = group_width(k, ll);
    if index < k {
        Some(index / b)
    } else if index < k + ll * LOCAL_PARITY {
        Some((index - k) / LOCAL_PARITY)
    } else {
        None
    }
}

/// Normal blocks in the local group holding `index` (0 for a global parity)
pub(crate) fn group_normal_count(blocks: &[BlockState], k: usize, ll: usize, index: usize) -> usize {
    match group_of(index, k, ll) {
        Some(x) => local_group(blocks, k, ll, x)
            .iter()
            .filter(|s| s.is_normal())
            .count(),
        None => 0,
    }
}

/// Two-level decodability check.
///
/// A group with at most one loss is fixed by its local parity. Every other
/// group contributes its local equation and its losses to the global system,
/// which must have at least as many equations as unknowns.
pub(crate) fn is_decodable(blocks: &[BlockState], n: usize, k: usize, ll: usize) -> bool {
    let avails = blocks.iter().filter(|s| s.is_normal()).count();
    if avails == n {
        return true;
    }
    if avails < k {
        return false;
    }

    let m1 = global_parity(n, k, ll);
    let mut equations = 0;
    let mut unknowns = 0;
    for x in 0..ll {
        let group = local_group(blocks, k, ll, x);
        let loss = group.iter().filter(|s| !s.is_normal()).count();
        if loss > LOCAL_PARITY {
            equations += LOCAL_PARITY;
            unknowns += loss;
        }
    }

    let globals = &blocks[n - m1..];
    equations += m1;
    unknowns += m1 - globals.iter().filter(|s| s.is_normal()).count();

    equations >= unknowns
}

/// Damaged blocks among all parities (local and global)
pub(crate) fn parity_missing(blocks: &[BlockState], k: usize) -> usize {
    blocks[k..].iter().filter(|s| !s.is_normal()).count()
}

/// XORBAS view: the combined parity group can rebuild a single missing
/// parity on its own, so that slot is treated as normal before decoding.
pub(crate) fn with_parity_group_completed(blocks: &[BlockState], k: usize) -> Vec<BlockState> {
    let mut view = blocks.to_vec();
    if parity_missing(blocks, k) == 1 {
        if let Some(slot) = view[k..].iter_mut().find(|s| !s.is_normal()) {
            *slot = BlockState::Normal;
        }
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    use BlockState::{LostDurability as L, Normal as N, Unavailable as U};

    #[test]
    fn test_group_of_layout() {
        // LRC(10, 6, 2): data 0..6, local parities 6..8, globals 8..10
        assert_eq!(group_of(0, 6, 2), Some(0));
        assert_eq!(group_of(2, 6, 2), Some(0));
        assert_eq!(group_of(3, 6, 2), Some(1));
        assert_eq!(group_of(6, 6, 2), Some(0));
        assert_eq!(group_of(7, 6, 2), Some(1));
        assert_eq!(group_of(8, 6, 2), None);
        assert_eq!(global_parity(10, 6, 2), 2);
    }

    #[test]
    fn test_single_loss_per_group_is_local() {
        let blocks = vec![L, N, N, N, U, N, N, N, N, N];
        assert!(is_decodable(&blocks, 10, 6, 2));
    }

    #[test]
    fn test_too_many_losses() {
        // 5 losses exceed the 4 parities
        let blocks = vec![L, L, L, L, L, N, N, N, N, N];
        assert!(!is_decodable(&blocks, 10, 6, 2));
    }

    #[test]
    fn test_global_equations_cover_group_overflow() {
        // group 0 has 3 losses: 1 local + 2 global equations
        let blocks = vec![L, L, N, N, N, N, L, N, N, N];
        assert!(is_decodable(&blocks, 10, 6, 2));
        // losing a global parity as well leaves one equation short
        let blocks = vec![L, L, N, N, N, N, L, N, L, N];
        assert!(!is_decodable(&blocks, 10, 6, 2));
    }

    #[test]
    fn test_parity_group_completion() {
        let blocks = vec![N, N, N, N, N, N, N, N, L, N];
        let view = with_parity_group_completed(&blocks, 6);
        assert!(view.iter().all(|s| s.is_normal()));

        let blocks = vec![N, N, N, N, N, N, L, N, L, N];
        let view = with_parity_group_completed(&blocks, 6);
        assert_eq!(view, blocks);
    }
}
