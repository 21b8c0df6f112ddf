//! durasim - Erasure-Coded Storage Durability Simulator
//!
//! Monte Carlo simulator estimating the probability of data loss and of
//! unavailability for a datacenter storing erasure-coded stripes. Failures,
//! recoveries, latent sector errors, scrubs and planned upgrades are drawn
//! from configurable generators over a rack/machine/disk hierarchy.
//!
//! # Architecture
//!
//! ```text
//! SimulationConfig ─▶ Topology + Placement
//!                          │
//!                      Timeline (generators)
//!                     ┌────┴─────┐
//!               EventQueue   DurationQueue
//!                    │            │
//!              EventHandler  OverlapAnalyzer
//!                    │            │
//!             EventRunReport  DurationRunReport
//! ```
//!
//! # Modules
//!
//! - [`bandwidth`] - FIFO cross-rack recovery bandwidth ledger
//! - [`config`] - YAML run configuration
//! - [`duration`] - Outage intervals and overlap analysis
//! - [`ec`] - Redundancy schemes and stripe block states
//! - [`error`] - Error types
//! - [`event`] - Simulation events and the event queue
//! - [`failure`] - Failure and recovery time generators
//! - [`handler`] - Event-driven stripe state machine
//! - [`hardware`] - Topology and stripe placement
//! - [`metrics`] - Prometheus text export
//! - [`report`] - Run reports and result sinks
//! - [`simulation`] - One Monte Carlo iteration
//! - [`timeline`] - Walks the topology to generate events and durations

pub mod bandwidth;
pub mod config;
pub mod duration;
pub mod ec;
pub mod error;
pub mod event;
pub mod failure;
pub mod handler;
pub mod hardware;
pub mod metrics;
pub mod report;
pub mod simulation;
pub mod timeline;

// Re-export commonly used types
pub use config::SimulationConfig;
pub use ec::{BlockState, RedundancyScheme, StripeState};
pub use error::{Error, Result};
pub use hardware::{Placement, Topology, UnitId};
pub use metrics::RunMetrics;
pub use report::{EventRunReport, DurationRunReport, JsonLinesSink, ResultSink, RunMode, RunRecord, RunReport};
pub use simulation::Simulation;
