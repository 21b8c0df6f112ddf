//! Property-Based Tests for the Stripe Code Model
//!
//! Uses proptest to check the repair model over arbitrary block-state
//! vectors.
//!
//! # Test Properties
//!
//! 1. **MDS Decodability**: repairable ⇔ available ≥ k
//! 2. **Batch Idempotence**: a second batch repair costs nothing
//! 3. **Single Repair**: exactly one more block becomes normal
//! 4. **Locality**: one loss per local group is always an optimal repair

#![cfg(test)]

use proptest::prelude::*;

use super::scheme::RedundancyScheme;
use super::state::{BlockState, StripeState};

// =============================================================================
// Property Strategies
// =============================================================================

fn block_state_strategy() -> impl Strategy<Value = BlockState> {
    prop_oneof![
        3 => Just(BlockState::Normal),
        1 => Just(BlockState::Unavailable),
        1 => Just(BlockState::LostDurability),
        1 => Just(BlockState::LostLatent),
    ]
}

/// Strategy for valid MDS (n, k) pairs
fn mds_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=16).prop_flat_map(|n| (Just(n), 1usize..n))
}

/// MDS scheme plus a state vector of matching width
fn mds_scheme_and_state() -> impl Strategy<Value = (RedundancyScheme, Vec<BlockState>)> {
    prop_oneof![
        mds_config_strategy().prop_map(|(n, k)| RedundancyScheme::Rs { n, k }),
        Just(RedundancyScheme::Msr { n: 14, k: 10, d: 12 }),
        Just(RedundancyScheme::Mbr { n: 9, k: 6, d: 7 }),
    ]
    .prop_flat_map(|scheme| {
        let n = scheme.n();
        (
            Just(scheme),
            prop::collection::vec(block_state_strategy(), n),
        )
    })
}

/// Any scheme family plus a state vector of matching width
fn any_scheme_and_state() -> impl Strategy<Value = (RedundancyScheme, Vec<BlockState>)> {
    prop_oneof![
        Just(RedundancyScheme::Rs { n: 9, k: 6 }),
        Just(RedundancyScheme::Rs { n: 14, k: 10 }),
        Just(RedundancyScheme::Lrc { n: 10, k: 6, ll: 2 }),
        Just(RedundancyScheme::Lrc { n: 16, k: 12, ll: 3 }),
        Just(RedundancyScheme::Xorbas { n: 16, k: 10, ll: 2 }),
        Just(RedundancyScheme::Msr { n: 14, k: 10, d: 12 }),
        Just(RedundancyScheme::Mbr { n: 9, k: 6, d: 6 }),
    ]
    .prop_flat_map(|scheme| {
        let n = scheme.n();
        (
            Just(scheme),
            prop::collection::vec(block_state_strategy(), n),
        )
    })
}

// =============================================================================
// Decodability Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: For MDS codes, repairable iff at least k blocks are readable.
    #[test]
    fn prop_mds_repairable_iff_k_available(
        (scheme, blocks) in mds_scheme_and_state(),
    ) {
        let available = blocks.iter().filter(|b| b.is_normal()).count();
        let state = StripeState::Blocks(blocks);
        prop_assert_eq!(scheme.is_repairable(&state)?, available >= scheme.k());
    }

    /// Property: The all-normal and all-lost extremes behave for every family.
    #[test]
    fn prop_extremes((scheme, _blocks) in any_scheme_and_state()) {
        let n = scheme.n();
        prop_assert!(scheme.is_repairable(&StripeState::healthy(n))?);
        let dead = StripeState::Blocks(vec![BlockState::LostDurability; n]);
        prop_assert!(!scheme.is_repairable(&dead)?);
        prop_assert!(!scheme.is_repairable(&StripeState::Lost)?);
    }

    /// Property: Checking repairability never mutates the state.
    #[test]
    fn prop_is_repairable_side_effect_free((scheme, blocks) in any_scheme_and_state()) {
        let state = StripeState::Blocks(blocks);
        let before = state.clone();
        let first = scheme.is_repairable(&state)?;
        let second = scheme.is_repairable(&state)?;
        prop_assert_eq!(first, second);
        prop_assert_eq!(state, before);
    }
}

// =============================================================================
// Repair Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: A second batch repair costs 0 and leaves every block normal.
    #[test]
    fn prop_parallel_repair_idempotent((scheme, blocks) in any_scheme_and_state()) {
        let mut state = StripeState::Blocks(blocks);
        prop_assume!(scheme.is_repairable(&state)?);

        scheme.parallel_repair(&mut state, false)?;
        prop_assert_eq!(scheme.parallel_repair(&mut state, false)?, 0.0);
        prop_assert_eq!(state.available_count(), scheme.n());
    }

    /// Property: Single repair adds exactly one normal block.
    #[test]
    fn prop_single_repair_adds_one((scheme, blocks) in any_scheme_and_state()) {
        let mut state = StripeState::Blocks(blocks);
        prop_assume!(scheme.is_repairable(&state)?);
        let damaged = state
            .blocks()
            .and_then(|b| b.iter().position(|s| !s.is_normal()));
        prop_assume!(damaged.is_some());
        let index = damaged.unwrap_or_default();

        let before = state.available_count();
        let cost = scheme.repair(&mut state, index)?;
        prop_assert_eq!(state.available_count(), before + 1);
        prop_assert!(cost > 0.0);
        prop_assert!(cost <= scheme.repair_cost());
    }

    /// Property: Batch repair cost is bounded by the normal cost plus uploads.
    #[test]
    fn prop_parallel_cost_bounds((scheme, blocks) in any_scheme_and_state()) {
        let damaged = blocks.iter().filter(|b| !b.is_normal()).count();
        let mut state = StripeState::Blocks(blocks);
        prop_assume!(scheme.is_repairable(&state)?);

        let cost = scheme.parallel_repair(&mut state, false)?;
        if damaged == 0 {
            prop_assert_eq!(cost, 0.0);
        } else {
            prop_assert!(cost >= scheme.optimal_repair_cost());
            prop_assert!(cost <= scheme.repair_cost() + damaged as f64 - 1.0);
        }
    }
}

// =============================================================================
// Locality Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: A loss confined to one local group, within its local parity
    /// budget, is always repaired at the optimal cost.
    #[test]
    fn prop_lrc_local_loss_is_optimal(
        group in 0usize..2,
        offset in 0usize..4,
        kind in prop_oneof![
            Just(BlockState::Unavailable),
            Just(BlockState::LostDurability),
            Just(BlockState::LostLatent),
        ],
    ) {
        // LRC(10, 6, 2): group x holds data 3x..3x+3 and local parity 6+x
        let scheme = RedundancyScheme::Lrc { n: 10, k: 6, ll: 2 };
        let index = if offset < 3 { group * 3 + offset } else { 6 + group };

        let mut blocks = vec![BlockState::Normal; 10];
        blocks[index] = kind;
        let mut state = StripeState::Blocks(blocks.clone());
        prop_assert_eq!(scheme.repair(&mut state, index)?, scheme.optimal_repair_cost());

        let mut state = StripeState::Blocks(blocks);
        prop_assert_eq!(scheme.parallel_repair(&mut state, false)?, scheme.optimal_repair_cost());
    }
}
