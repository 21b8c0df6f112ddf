//! Run Reports and Result Sinks
//!
//! Serializable results of one simulation run, plus the [`ResultSink`] seam
//! the binary writes them through.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::hardware::UnitId;

// =============================================================================
// Loss Attribution
// =============================================================================

/// Component whose failure made a stripe undecodable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "component", content = "id")]
pub enum LossCause {
    Machine(UnitId),
    Disk(UnitId),
    /// Latent sector error on the given disk
    LatentError(UnitId),
}

impl fmt::Display for LossCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossCause::Machine(id) => write!(f, "machine {}", id),
            LossCause::Disk(id) => write!(f, "disk {}", id),
            LossCause::LatentError(id) => write!(f, "LSE {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StripeLoss {
    pub stripe: usize,
    pub time: f64,
    pub cause: LossCause,
}

/// Lost stripes grouped by cause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossDetails {
    pub by_latent_error: u64,
    pub by_disk: u64,
    pub by_machine: u64,
    /// Distinct loss timestamps among disk-caused losses
    pub disk_loss_events: u64,
    /// Distinct loss timestamps among machine-caused losses
    pub machine_loss_events: u64,
}

impl LossDetails {
    pub fn from_losses(losses: &[StripeLoss]) -> Self {
        let mut details = LossDetails::default();
        let mut disk_times: Vec<f64> = Vec::new();
        let mut machine_times: Vec<f64> = Vec::new();
        for loss in losses {
            match loss.cause {
                LossCause::LatentError(_) => details.by_latent_error += 1,
                LossCause::Disk(_) => {
                    details.by_disk += 1;
                    if !disk_times.contains(&loss.time) {
                        disk_times.push(loss.time);
                    }
                }
                LossCause::Machine(_) => {
                    details.by_machine += 1;
                    if !machine_times.contains(&loss.time) {
                        machine_times.push(loss.time);
                    }
                }
            }
        }
        details.disk_loss_events = disk_times.len() as u64;
        details.machine_loss_events = machine_times.len() as u64;
        details
    }
}

// =============================================================================
// Event Mode
// =============================================================================

/// Interval during which a stripe could not be decoded.
/// `end` is `None` while still open at the end of the mission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnavailabilityWindow {
    pub start: f64,
    pub end: Option<f64>,
}

/// Repairs that waited for cross-rack bandwidth
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queued: usize,
    pub avg_wait: f64,
}

/// Event handler bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerCounters {
    pub anomalous_available: u64,
    pub latent_failures: u64,
    pub scrubs: u64,
    pub scrub_repairs: u64,
    pub disk_failures: u64,
    pub disk_repairs: u64,
    pub machine_failures: u64,
    pub machine_repairs: u64,
    pub permanent_machine_failures: u64,
    pub short_temp_machine_failures: u64,
    pub long_temp_machine_failures: u64,
    pub machine_failures_due_to_rack: u64,
    pub eager_machine_repairs: u64,
    pub eager_slice_repairs: u64,
    pub skipped_latent: u64,
    pub empty_installments: u64,
    pub repairs: u64,
    pub optimal_repairs: u64,
    /// MB moved by all repairs
    pub repair_transfer_mb: f64,
    /// MB/hour
    pub max_recovery_bandwidth: f64,
    pub events_handled: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRunReport {
    pub undurable_count: u64,
    pub unavailable_count: u64,
    pub loss_details: LossDetails,
    pub losses: Vec<StripeLoss>,
    /// Probability of data loss
    pub pdl: f64,
    /// Bytes lost per TB of active storage
    pub nomdl: f64,
    /// Hours, system view
    pub mttr: f64,
    /// Hours, system view
    pub mtbf: f64,
    /// Probability of unavailability, system view
    pub pua: f64,
    /// Probability of unavailability, stripe view
    pub pus: f64,
    /// Total repair transfer in TiB
    pub trt: f64,
    pub queue: Option<QueueStatistics>,
    pub counters: HandlerCounters,
    pub windows: BTreeMap<usize, Vec<UnavailabilityWindow>>,
}

// =============================================================================
// Duration Mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationRunReport {
    pub durations: usize,
    pub concurrent_count: usize,
    pub lost_concurrent_count: usize,
    pub lost_count: u64,
    pub pdl: f64,
    /// Lost stripes over the stripes stored at the end of the mission
    pub pdlt: f64,
    pub unavailable_count: u64,
    pub pua: f64,
    /// Unavailability weighted by the number of stripes affected
    pub puaw: f64,
}

// =============================================================================
// Run Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Stateful event-driven simulation
    Events,
    /// Interval overlap analysis
    Durations,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Events => write!(f, "events"),
            RunMode::Durations => write!(f, "durations"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunReport {
    Events(EventRunReport),
    Durations(DurationRunReport),
}

/// One Monte Carlo iteration as written to the output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub iteration: usize,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
    pub report: RunReport,
}

impl RunRecord {
    pub fn new(iteration: usize, seed: u64, mode: RunMode, started_at: DateTime<Utc>, report: RunReport) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            iteration,
            seed,
            started_at,
            mode,
            report,
        }
    }
}

/// Destination for finished runs
pub trait ResultSink {
    fn record(&mut self, record: &RunRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn record(&mut self, record: &RunRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
