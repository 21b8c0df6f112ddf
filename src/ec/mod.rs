//! Stripe Code Model
//!
//! Pure repair model for erasure-coded stripes. Given a stripe's block-state
//! vector it decides whether the stripe can still be decoded and what a repair
//! costs in blocks transferred.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stripe Code Model                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │   StripeState ──▶ RedundancyScheme::{is_repairable, repair,              │
//! │                                      parallel_repair, repair_traffic}    │
//! │                          │                                               │
//! │         ┌────────────────┼──────────────────┐                            │
//! │         ▼                ▼                  ▼                            │
//! │   MDS (RS)        Locality (LRC,      Regenerating (MSR, MBR)            │
//! │                    XORBAS)                                               │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Block States
//!
//! | State            | Meaning                                  |
//! |------------------|------------------------------------------|
//! | `Normal`         | readable                                 |
//! | `Unavailable`    | intact, host temporarily down            |
//! | `LostDurability` | destroyed by a disk or machine loss      |
//! | `LostLatent`     | destroyed by a latent sector error       |
//!
//! # Usage
//!
//! ```rust
//! use durasim::ec::{BlockState, RedundancyScheme, StripeState};
//!
//! let scheme: RedundancyScheme = "RS_9_6".parse().unwrap();
//! let mut state = StripeState::healthy(9);
//! if let Some(blocks) = state.blocks_mut() {
//!     blocks[0] = BlockState::LostDurability;
//! }
//! assert!(scheme.is_repairable(&state).unwrap());
//! assert_eq!(scheme.repair(&mut state, 0).unwrap(), 6.0);
//! ```

mod lrc;
mod regenerating;
pub mod scheme;
pub mod state;

#[cfg(test)]
mod proptest;

pub use scheme::RedundancyScheme;
pub use state::{BlockState, StripeState};
