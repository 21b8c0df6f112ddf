//! Stripe Block States
//!
//! A stripe is tracked as a vector of `n` block states, or as the terminal
//! [`StripeState::Lost`] sentinel once it can no longer be decoded.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Block State
// =============================================================================

/// State of a single block within a stripe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Block is readable
    Normal,
    /// Block is intact but its host is temporarily down
    Unavailable,
    /// Block was destroyed by a disk or machine loss
    LostDurability,
    /// Block was destroyed by a latent sector error
    LostLatent,
}

impl BlockState {
    pub fn is_normal(self) -> bool {
        matches!(self, BlockState::Normal)
    }

    /// True for both durability and latent losses
    pub fn is_lost(self) -> bool {
        matches!(self, BlockState::LostDurability | BlockState::LostLatent)
    }

    /// The data still exists somewhere, even if it can't be read right now
    pub fn is_durable(self) -> bool {
        matches!(self, BlockState::Normal | BlockState::Unavailable)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            BlockState::Normal => "1",
            BlockState::Unavailable => "0",
            BlockState::LostDurability => "-1",
            BlockState::LostLatent => "-2",
        };
        write!(f, "{}", code)
    }
}

// =============================================================================
// Stripe State
// =============================================================================

/// Per-stripe state vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripeState {
    /// Live stripe with one entry per block
    Blocks(Vec<BlockState>),
    /// Stripe is permanently undurable; never reverts
    Lost,
}

impl StripeState {
    /// All blocks normal
    pub fn healthy(n: usize) -> Self {
        StripeState::Blocks(vec![BlockState::Normal; n])
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, StripeState::Lost)
    }

    pub fn blocks(&self) -> Option<&[BlockState]> {
        match self {
            StripeState::Blocks(blocks) => Some(blocks),
            StripeState::Lost => None,
        }
    }

    pub fn blocks_mut(&mut self) -> Option<&mut [BlockState]> {
        match self {
            StripeState::Blocks(blocks) => Some(blocks),
            StripeState::Lost => None,
        }
    }

    /// State of one block, `None` for a lost stripe or an out-of-range index
    pub fn block(&self, index: usize) -> Option<BlockState> {
        self.blocks().and_then(|b| b.get(index).copied())
    }

    /// Number of blocks in the given state
    pub fn count(&self, state: BlockState) -> usize {
        self.blocks()
            .map(|b| b.iter().filter(|s| **s == state).count())
            .unwrap_or(0)
    }

    /// Readable blocks
    pub fn available_count(&self) -> usize {
        self.count(BlockState::Normal)
    }

    /// Blocks whose data still exists (normal or unavailable)
    pub fn durable_count(&self) -> usize {
        self.blocks()
            .map(|b| b.iter().filter(|s| s.is_durable()).count())
            .unwrap_or(0)
    }

    /// Copy with every unavailable block treated as normal.
    ///
    /// Used to decide durability: an unavailable block will come back.
    pub fn as_durable_view(&self) -> StripeState {
        match self {
            StripeState::Blocks(blocks) => StripeState::Blocks(
                blocks
                    .iter()
                    .map(|s| match s {
                        BlockState::Unavailable => BlockState::Normal,
                        other => *other,
                    })
                    .collect(),
            ),
            StripeState::Lost => StripeState::Lost,
        }
    }
}

impl fmt::Display for StripeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripeState::Blocks(blocks) => {
                write!(f, "[")?;
                for (i, b) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", b)?;
                }
                write!(f, "]")
            }
            StripeState::Lost => write!(f, "lost"),
        }
    }
}

/// Marks every damaged block normal and returns the repaired indices.
///
/// With `only_lost`, unavailable blocks are left untouched.
pub(crate) fn restore_blocks(blocks: &mut [BlockState], only_lost: bool) -> Vec<usize> {
    let mut repaired = Vec::new();
    for (i, block) in blocks.iter_mut().enumerate() {
        let damaged = block.is_lost() || (!only_lost && *block == BlockState::Unavailable);
        if damaged {
            *block = BlockState::Normal;
            repaired.push(i);
        }
    }
    repaired
}
