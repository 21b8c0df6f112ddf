//! Simulation Configuration
//!
//! A run is described by a single YAML document. Every knob except the
//! redundancy scheme has a default, so a minimal file only names what
//! differs from the reference cluster.
//!
//! Units: time in hours, storage in PB (active data) and TB (disks), chunk
//! size in MB, bandwidth in MB/hour.
//!
//! # Example
//!
//! ```
//! use durasim::config::SimulationConfig;
//!
//! let config = SimulationConfig::from_yaml_str(
//!     r#"
//! redundancy: RS_9_6
//! total_time: 8760
//! rack_count: 12
//! disk:
//!   failure: { kind: weibull, lambda: 100000, beta: 1.1 }
//!   recovery: { kind: constant, freq: 0.5 }
//! "#,
//! )
//! .unwrap();
//! assert_eq!(config.redundancy.n(), 9);
//! assert!(config.total_slices() > 0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ec::RedundancyScheme;
use crate::error::{Error, Result};
use crate::event::CheckStyle;
use crate::failure::{GeneratorSpec, UnitGenerators};
use crate::hardware::PlacementStrategy;

const MB_PER_PB: f64 = 1_073_741_824.0; // 2^30
const BYTES_PER_TB: f64 = 1e12;
const BYTES_PER_MB: f64 = 1_048_576.0; // 2^20

/// Tolerance when matching event times against scheduled times
pub const TIME_EPSILON: f64 = 1e-9;

// =============================================================================
// Configuration Sections
// =============================================================================

/// Full run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Mission time in hours
    #[serde(default = "default_total_time")]
    pub total_time: f64,

    /// Active (pre-encoding) data in PB
    #[serde(default = "default_total_active_storage")]
    pub total_active_storage: f64,

    /// Block size in MB
    #[serde(default = "default_chunk_size")]
    pub chunk_size: f64,

    /// Raw disk size in manufacturer TB (10^12 bytes)
    #[serde(default = "default_disk_capacity")]
    pub disk_capacity: f64,

    #[serde(default = "default_rack_count")]
    pub rack_count: usize,

    #[serde(default = "default_machines_per_rack")]
    pub machines_per_rack: usize,

    #[serde(default = "default_disks_per_machine")]
    pub disks_per_machine: usize,

    /// Erasure code, e.g. `RS_9_6` or `LRC_10_6_2`
    pub redundancy: RedundancyScheme,

    /// Group a stripe's blocks onto `distinct_racks` racks instead of one per rack
    #[serde(default)]
    pub hierarchical: bool,

    #[serde(default)]
    pub distinct_racks: Option<usize>,

    /// Recovery bandwidth each rack can spend on cross-rack repair (MB/hour)
    #[serde(default = "default_cross_rack_bandwidth")]
    pub recovery_bandwidth_cross_rack: f64,

    /// Per-machine network bandwidth (MB/hour)
    #[serde(default = "default_node_bandwidth")]
    pub node_bandwidth: f64,

    /// Repair every damaged block of a stripe when repairing any of them
    #[serde(default)]
    pub parallel_repair: bool,

    /// Defer repair until the threshold is crossed, then repair in one batch
    #[serde(default)]
    pub lazy_recovery: bool,

    /// Repair once durable blocks drop to this count. Defaults to `n - 1`.
    #[serde(default)]
    pub recovery_threshold: Option<usize>,

    /// Unavailable blocks count towards the recovery threshold
    #[serde(default)]
    pub availability_counts_for_recovery: bool,

    /// Only repair eagerly (threshold `n - 1`) while the degraded fraction is high
    #[serde(default)]
    pub lazy_only_available: bool,

    /// Fraction of stripes that may be degraded before `lazy_only_available` kicks in
    #[serde(default = "default_max_degraded_slices")]
    pub max_degraded_slices: f64,

    /// Repairs never wait for shared cross-rack bandwidth
    #[serde(default)]
    pub queue_disable: bool,

    /// Chunks per eager-recovery installment
    #[serde(default = "default_installment_size")]
    pub installment_size: usize,

    /// Threshold used by eager recovery as a function of elapsed downtime
    #[serde(default)]
    pub lazy_threshold_schedule: Vec<ThresholdStep>,

    /// Overrides the stripe count derived from active storage
    #[serde(default)]
    pub total_slices: Option<u64>,

    /// Overrides the derived disk repair time (hours)
    #[serde(default)]
    pub disk_repair_time: Option<f64>,

    /// Overrides the derived machine repair time (hours)
    #[serde(default)]
    pub node_repair_time: Option<f64>,

    /// Growth of the stripe population over the mission
    #[serde(default)]
    pub scaling: Vec<ScalingStep>,

    #[serde(default)]
    pub rack: RackConfig,

    #[serde(default)]
    pub machine: MachineConfig,

    #[serde(default)]
    pub disk: UnitGenerators,

    #[serde(default)]
    pub upgrades: Option<UpgradeConfig>,
}

/// Rack-level generators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RackConfig {
    #[serde(flatten)]
    pub generators: UnitGenerators,

    /// Generate rack outages but leave them out of the simulation
    #[serde(default)]
    pub fast_forward: bool,
}

/// Machine-level generators and failure classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(flatten)]
    pub generators: UnitGenerators,

    /// Fraction of machine failures that are permanent
    #[serde(default = "default_fail_fraction")]
    pub fail_fraction: f64,

    /// Downtime (hours) after which a transient failure counts as long
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout: f64,

    #[serde(default)]
    pub fast_forward: bool,

    /// Start eager recovery when a transient failure outlasts `fail_timeout`
    #[serde(default)]
    pub eager_recovery: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            generators: UnitGenerators::default(),
            fail_fraction: default_fail_fraction(),
            fail_timeout: default_fail_timeout(),
            fast_forward: false,
            eager_recovery: false,
        }
    }
}

/// One row of the eager-recovery threshold schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdStep {
    /// Elapsed hours since the original failure
    pub after: f64,
    pub threshold: usize,
}

/// One linear segment of the stripe population: `slices + rate * (t - start)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingStep {
    pub start: f64,
    pub end: f64,
    pub slices: u64,
    #[serde(default)]
    pub rate: f64,
}

/// Planned maintenance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub soft: Option<SoftUpgrade>,
    #[serde(default)]
    pub hard: Option<HardUpgrade>,
}

/// Rolling restarts of machines in batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftUpgrade {
    /// Hours between rollings
    pub freq: f64,
    #[serde(default = "default_machines_per_batch")]
    pub machines_per_batch: usize,
    /// Hours each batch is offline
    pub downtime: f64,
    pub check_style: CheckStyle,
}

/// Disk replacement campaigns that change disk failure behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardUpgrade {
    /// Hours between campaigns
    pub freq: f64,
    #[serde(default = "default_hard_check_style")]
    pub check_style: CheckStyle,
    #[serde(default)]
    pub disk_failure: Option<GeneratorSpec>,
    #[serde(default)]
    pub latent_error: Option<GeneratorSpec>,
}

// =============================================================================
// Default Values
// =============================================================================

fn default_total_time() -> f64 {
    87_600.0 // ten years
}

fn default_total_active_storage() -> f64 {
    1.0
}

fn default_chunk_size() -> f64 {
    256.0
}

fn default_disk_capacity() -> f64 {
    4.0
}

fn default_rack_count() -> usize {
    32
}

fn default_machines_per_rack() -> usize {
    16
}

fn default_disks_per_machine() -> usize {
    4
}

fn default_cross_rack_bandwidth() -> f64 {
    450_000.0 // 125 MB/s
}

fn default_node_bandwidth() -> f64 {
    450_000.0
}

fn default_max_degraded_slices() -> f64 {
    0.1
}

fn default_installment_size() -> usize {
    1000
}

fn default_fail_fraction() -> f64 {
    0.008
}

fn default_fail_timeout() -> f64 {
    0.25
}

fn default_machines_per_batch() -> usize {
    1
}

fn default_hard_check_style() -> CheckStyle {
    CheckStyle::BatchLostEverywhere
}

// =============================================================================
// Loading and Validation
// =============================================================================

impl SimulationConfig {
    /// Reads and validates a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), scheme = %config.redundancy, "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: SimulationConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration as a whole
    pub fn validate(&self) -> Result<()> {
        let n = self.redundancy.n();
        // locality codes need a known loss threshold
        self.redundancy.loss_threshold()?;

        if !(self.total_time > 0.0 && self.total_time.is_finite()) {
            return Err(Error::Config("total_time must be positive".to_string()));
        }
        if self.total_active_storage <= 0.0 || self.chunk_size <= 0.0 || self.disk_capacity <= 0.0
        {
            return Err(Error::Config(
                "total_active_storage, chunk_size and disk_capacity must be positive".to_string(),
            ));
        }
        if self.rack_count == 0 || self.machines_per_rack == 0 || self.disks_per_machine == 0 {
            return Err(Error::Config("topology must have at least one disk".to_string()));
        }
        if self.recovery_bandwidth_cross_rack <= 0.0 {
            return Err(Error::Config(
                "recovery_bandwidth_cross_rack must be positive".to_string(),
            ));
        }

        // Placement
        if self.hierarchical {
            let racks = self.distinct_racks.ok_or_else(|| {
                Error::Config("hierarchical placement needs distinct_racks".to_string())
            })?;
            if racks == 0 || racks > n {
                return Err(Error::Config(format!(
                    "distinct_racks must be in [1, {}], got {}",
                    n, racks
                )));
            }
            if racks > self.rack_count {
                return Err(Error::Config(format!(
                    "distinct_racks {} exceeds rack_count {}",
                    racks, self.rack_count
                )));
            }
            let per_rack = n.div_ceil(racks);
            if per_rack > self.machines_per_rack {
                return Err(Error::Config(format!(
                    "{} blocks per rack need as many machines, racks have {}",
                    per_rack, self.machines_per_rack
                )));
            }
        } else if self.rack_count < n {
            return Err(Error::Config(format!(
                "spread placement needs at least {} racks, got {}",
                n, self.rack_count
            )));
        }
        self.check_space()?;

        // Repair policy
        if let Some(threshold) = self.recovery_threshold {
            if threshold >= n {
                return Err(Error::Config(format!(
                    "recovery_threshold must be below n = {}",
                    n
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.max_degraded_slices) {
            return Err(Error::Config("max_degraded_slices must be in [0, 1]".to_string()));
        }
        if self.installment_size == 0 {
            return Err(Error::Config("installment_size must be positive".to_string()));
        }
        if self
            .lazy_threshold_schedule
            .windows(2)
            .any(|w| w[1].after < w[0].after)
        {
            return Err(Error::Config(
                "lazy_threshold_schedule must be sorted by elapsed time".to_string(),
            ));
        }
        for time in [self.disk_repair_time, self.node_repair_time].into_iter().flatten() {
            if time < 0.0 || !time.is_finite() {
                return Err(Error::Config("repair time overrides must be non-negative".to_string()));
            }
        }

        self.validate_scaling()?;

        // Generators
        self.rack.generators.validate()?;
        self.rack.generators.require_pair("rack")?;
        self.machine.generators.validate()?;
        self.machine.generators.require_pair("machine")?;
        self.disk.validate()?;
        self.disk.require_pair("disk")?;
        if !(0.0..=1.0).contains(&self.machine.fail_fraction) {
            return Err(Error::Config("machine fail_fraction must be in [0, 1]".to_string()));
        }
        if self.machine.fail_timeout < 0.0 {
            return Err(Error::Config("machine fail_timeout must be non-negative".to_string()));
        }

        if let Some(upgrades) = &self.upgrades {
            upgrades.validate()?;
        }

        Ok(())
    }

    fn check_space(&self) -> Result<()> {
        let capacity = self.max_chunks_per_disk() as f64 * self.disk_count() as f64;
        let needed = self.max_total_slices() as f64 * self.redundancy.n() as f64;
        if needed > capacity {
            return Err(Error::Config(format!(
                "{} blocks do not fit on {} disks of {} chunks",
                needed,
                self.disk_count(),
                self.max_chunks_per_disk()
            )));
        }
        Ok(())
    }

    fn validate_scaling(&self) -> Result<()> {
        if self.scaling.is_empty() {
            return Ok(());
        }
        let first = self.scaling[0];
        if first.start != 0.0 {
            return Err(Error::Config("scaling table must start at time 0".to_string()));
        }
        for step in &self.scaling {
            if step.end <= step.start || step.slices == 0 {
                return Err(Error::Config(format!(
                    "invalid scaling row [{}, {}, {}, {}]",
                    step.start, step.end, step.slices, step.rate
                )));
            }
        }
        if self.scaling.windows(2).any(|w| w[1].start != w[0].end) {
            return Err(Error::Config("scaling rows must be contiguous".to_string()));
        }
        let last = self.scaling[self.scaling.len() - 1];
        if (last.end - self.total_time).abs() > TIME_EPSILON {
            return Err(Error::Config(format!(
                "scaling table ends at {}, mission ends at {}",
                last.end, self.total_time
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Derived Values
    // =========================================================================

    pub fn disk_count(&self) -> usize {
        self.rack_count * self.machines_per_rack * self.disks_per_machine
    }

    /// Stripes needed to hold the active storage
    pub fn total_slices(&self) -> u64 {
        self.total_slices.unwrap_or_else(|| {
            (self.total_active_storage * MB_PER_PB
                / (self.redundancy.k() as f64 * self.chunk_size))
                .ceil() as u64
        })
    }

    /// Chunk slots per disk
    pub fn max_chunks_per_disk(&self) -> usize {
        let gib = self.disk_capacity * BYTES_PER_TB / MB_PER_PB;
        (gib * 1024.0 / self.chunk_size).floor() as usize
    }

    /// Fraction of raw disk space holding blocks
    pub fn disk_usage(&self) -> f64 {
        let raw_mb = self.disk_count() as f64 * self.disk_capacity * BYTES_PER_TB / BYTES_PER_MB;
        self.total_slices() as f64 * self.redundancy.n() as f64 * self.chunk_size / raw_mb
    }

    pub fn distinct_racks(&self) -> usize {
        if self.hierarchical {
            self.distinct_racks.unwrap_or(self.redundancy.n())
        } else {
            self.redundancy.n()
        }
    }

    pub fn placement_strategy(&self) -> PlacementStrategy {
        if self.hierarchical {
            PlacementStrategy::Hierarchical {
                distinct_racks: self.distinct_racks(),
            }
        } else {
            PlacementStrategy::Spread
        }
    }

    /// Hours to rebuild one failed disk over the aggregate cross-rack bandwidth
    pub fn disk_repair_time(&self) -> f64 {
        if let Some(time) = self.disk_repair_time {
            return time;
        }
        let traffic = self
            .redundancy
            .repair_traffic(self.hierarchical, self.distinct_racks());
        let used_mb = self.redundancy.storage_overhead() * self.total_active_storage * MB_PER_PB
            / self.disk_count() as f64;
        let aggregate = self.recovery_bandwidth_cross_rack * self.rack_count as f64;
        (traffic * used_mb / aggregate * 100.0).round() / 100.0
    }

    /// Hours to rebuild every disk of a failed machine
    pub fn node_repair_time(&self) -> f64 {
        self.node_repair_time
            .unwrap_or_else(|| self.disk_repair_time() * self.disks_per_machine as f64)
    }

    pub fn recovery_threshold(&self) -> usize {
        self.recovery_threshold
            .unwrap_or(self.redundancy.n() - 1)
    }

    /// Eager-recovery threshold after `elapsed` hours of downtime
    pub fn lazy_threshold(&self, elapsed: f64) -> usize {
        self.lazy_threshold_schedule
            .iter()
            .rev()
            .find(|step| step.after <= elapsed)
            .map(|step| step.threshold)
            .unwrap_or_else(|| self.recovery_threshold())
    }

    /// Scaling rows, or one flat row covering the mission
    pub fn scaling_table(&self) -> Vec<ScalingStep> {
        if self.scaling.is_empty() {
            vec![ScalingStep {
                start: 0.0,
                end: self.total_time,
                slices: self.total_slices(),
                rate: 0.0,
            }]
        } else {
            self.scaling.clone()
        }
    }

    /// Largest stripe population reached during the mission
    pub fn max_total_slices(&self) -> u64 {
        self.scaling_table()
            .iter()
            .map(|s| (s.slices as f64 + s.rate * (s.end - s.start)).ceil().max(0.0) as u64)
            .max()
            .unwrap_or(0)
    }

    /// Live stripe count at time `t`
    pub fn current_total_slices(&self, t: f64) -> u64 {
        if self.scaling.is_empty() {
            return self.total_slices();
        }
        self.scaling
            .iter()
            .find(|s| s.start <= t && t <= s.end)
            .map(|s| (s.slices as f64 + s.rate * (t - s.start)).ceil() as u64)
            .unwrap_or_else(|| self.max_total_slices())
    }

    /// Time-averaged stripe population
    pub fn avg_total_slices(&self) -> f64 {
        if self.scaling.is_empty() {
            return self.total_slices() as f64;
        }
        let total: f64 = self
            .scaling
            .iter()
            .map(|s| {
                let width = s.end - s.start;
                s.slices as f64 * width + s.rate * width * width / 2.0
            })
            .sum();
        (total / self.total_time * 100_000.0).round() / 100_000.0
    }

    /// Times of hard upgrade campaigns within the mission
    pub fn upgrade_times(&self) -> Vec<f64> {
        let freq = match self.upgrades.as_ref().and_then(|u| u.hard.as_ref()) {
            Some(hard) => hard.freq,
            None => return Vec::new(),
        };
        let mut times = Vec::new();
        let mut t = freq;
        while t < self.total_time {
            times.push(t);
            t += freq;
        }
        times
    }
}

impl UpgradeConfig {
    fn validate(&self) -> Result<()> {
        if let Some(soft) = &self.soft {
            if soft.freq <= 0.0 || soft.downtime <= 0.0 || soft.machines_per_batch == 0 {
                return Err(Error::Config(
                    "soft upgrade freq, downtime and machines_per_batch must be positive"
                        .to_string(),
                ));
            }
        }
        if let Some(hard) = &self.hard {
            if hard.freq <= 0.0 {
                return Err(Error::Config("hard upgrade freq must be positive".to_string()));
            }
            if !hard.check_style.is_system_wide() {
                return Err(Error::Config(format!(
                    "hard upgrades need a system-wide check style, got {}",
                    u8::from(hard.check_style)
                )));
            }
            for spec in [&hard.disk_failure, &hard.latent_error].into_iter().flatten() {
                spec.validate()?;
            }
        }
        Ok(())
    }
}
