//! Failure and Recovery Generators
//!
//! Each hardware unit owns a fixed set of generator slots (failure, recovery,
//! permanent recovery, latent error, scrub). A generator answers one question:
//! given the current time, when is the next event of this process?
//! `f64::INFINITY` means the process never fires again.
//!
//! Generators are built from a closed set of [`GeneratorSpec`] kinds and hold
//! per-unit state, so every unit gets its own instance.
//!
//! All times are in hours.

pub mod piecewise;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use piecewise::PiecewiseTable;

// =============================================================================
// Generator Definitions
// =============================================================================

/// Configured generator kind and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSpec {
    /// Three-parameter Weibull: location `gamma`, scale `lambda`, shape `beta`
    Weibull {
        #[serde(default)]
        gamma: f64,
        lambda: f64,
        beta: f64,
    },
    /// Normal distribution truncated below at `minval`
    Gaussian { mean: f64, stddev: f64, minval: f64 },
    /// Fixed period after the last reset
    Constant { freq: f64 },
    /// Uniform delay in `[0, freq)`, millihour resolution
    Uniform { freq: f64 },
    /// Never fires
    NoFailure,
    /// Detection delay uniform in `[0, gamma]` plus identification time `lambda`
    Real { gamma: f64, lambda: f64 },
    /// Next multiple of `gamma` (periodic checks such as scrubbing)
    Period { gamma: f64 },
    /// Empirical machine downtime table from GFS
    GfsAvailability,
    /// Second GFS downtime table
    GfsAvailability2,
    /// Custom empirical table
    Piecewise { values: Vec<f64>, weights: Vec<f64> },
    /// Replay of recorded event times from a file, one time in hours per line
    Trace { path: PathBuf },
}

impl GeneratorSpec {
    fn name(&self) -> &'static str {
        match self {
            GeneratorSpec::Weibull { .. } => "weibull",
            GeneratorSpec::Gaussian { .. } => "gaussian",
            GeneratorSpec::Constant { .. } => "constant",
            GeneratorSpec::Uniform { .. } => "uniform",
            GeneratorSpec::NoFailure => "no_failure",
            GeneratorSpec::Real { .. } => "real",
            GeneratorSpec::Period { .. } => "period",
            GeneratorSpec::GfsAvailability => "gfs_availability",
            GeneratorSpec::GfsAvailability2 => "gfs_availability2",
            GeneratorSpec::Piecewise { .. } => "piecewise",
            GeneratorSpec::Trace { .. } => "trace",
        }
    }

    /// Checks parameters without building the generator
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidGenerator {
            name: self.name().to_string(),
            reason: reason.to_string(),
        };
        match self {
            GeneratorSpec::Weibull { gamma, lambda, beta } => {
                if *lambda <= 0.0 || *beta <= 0.0 || *gamma < 0.0 {
                    return Err(invalid("lambda and beta must be positive, gamma non-negative"));
                }
            }
            GeneratorSpec::Gaussian {
                mean,
                stddev,
                minval,
            } => {
                if mean < stddev {
                    return Err(invalid("mean is smaller than stddev"));
                }
                if *minval > mean - stddev {
                    return Err(invalid("minval is above mean - stddev"));
                }
            }
            GeneratorSpec::Constant { freq } | GeneratorSpec::Uniform { freq } => {
                if *freq <= 0.0 {
                    return Err(invalid("freq must be positive"));
                }
            }
            GeneratorSpec::Real { gamma, lambda } => {
                if *gamma < 0.0 || *lambda < 0.0 {
                    return Err(invalid("gamma and lambda must be non-negative"));
                }
            }
            GeneratorSpec::Period { gamma } => {
                if *gamma <= 0.0 {
                    return Err(invalid("gamma must be positive"));
                }
            }
            GeneratorSpec::Piecewise { values, weights } => {
                PiecewiseTable::new(values, weights)?;
            }
            GeneratorSpec::NoFailure
            | GeneratorSpec::GfsAvailability
            | GeneratorSpec::GfsAvailability2
            | GeneratorSpec::Trace { .. } => {}
        }
        Ok(())
    }

    /// Builds a fresh generator instance
    pub fn build(&self) -> Result<Generator> {
        self.validate()?;
        let generator = match self {
            GeneratorSpec::Weibull { gamma, lambda, beta } => Generator::Weibull {
                gamma: *gamma,
                lambda: *lambda,
                beta: *beta,
                start: 0.0,
            },
            GeneratorSpec::Gaussian {
                mean,
                stddev,
                minval,
            } => Generator::Gaussian {
                mean: *mean,
                stddev: *stddev,
                minval: *minval,
                start: 0.0,
            },
            GeneratorSpec::Constant { freq } => Generator::Constant {
                freq: *freq,
                previous: 0.0,
            },
            GeneratorSpec::Uniform { freq } => Generator::Uniform { freq: *freq },
            GeneratorSpec::NoFailure => Generator::NoFailure,
            GeneratorSpec::Real { gamma, lambda } => Generator::Real {
                gamma: *gamma,
                lambda: *lambda,
            },
            GeneratorSpec::Period { gamma } => Generator::Period { gamma: *gamma },
            GeneratorSpec::GfsAvailability => Generator::Piecewise {
                table: Arc::new(PiecewiseTable::gfs_availability()),
                previous: 0.0,
            },
            GeneratorSpec::GfsAvailability2 => Generator::Piecewise {
                table: Arc::new(PiecewiseTable::gfs_availability2()),
                previous: 0.0,
            },
            GeneratorSpec::Piecewise { values, weights } => Generator::Piecewise {
                table: Arc::new(PiecewiseTable::new(values, weights)?),
                previous: 0.0,
            },
            GeneratorSpec::Trace { path } => Generator::trace(load_trace(path)?),
        };
        Ok(generator)
    }
}

fn load_trace(path: &Path) -> Result<Vec<f64>> {
    let content = std::fs::read_to_string(path)?;
    let mut times = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.parse::<f64>().map_err(|_| Error::InvalidGenerator {
                name: "trace".to_string(),
                reason: format!("{}: bad time '{}'", path.display(), l),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    times.sort_by(f64::total_cmp);
    Ok(times)
}

// =============================================================================
// Generator
// =============================================================================

/// Stateful event-time generator
#[derive(Debug, Clone)]
pub enum Generator {
    Weibull {
        gamma: f64,
        lambda: f64,
        beta: f64,
        start: f64,
    },
    Gaussian {
        mean: f64,
        stddev: f64,
        minval: f64,
        start: f64,
    },
    Constant {
        freq: f64,
        previous: f64,
    },
    Uniform {
        freq: f64,
    },
    NoFailure,
    Real {
        gamma: f64,
        lambda: f64,
    },
    Period {
        gamma: f64,
    },
    Piecewise {
        table: Arc<PiecewiseTable>,
        previous: f64,
    },
    Trace {
        times: Arc<Vec<f64>>,
        cursor: usize,
    },
}

impl Generator {
    /// Replays the given times in order
    pub fn trace(mut times: Vec<f64>) -> Self {
        times.sort_by(f64::total_cmp);
        Generator::Trace {
            times: Arc::new(times),
            cursor: 0,
        }
    }

    /// Restarts the process at `current`: the unit was just renewed
    pub fn reset(&mut self, current: f64) {
        match self {
            Generator::Weibull { start, .. } | Generator::Gaussian { start, .. } => {
                *start = current
            }
            Generator::Constant { previous, .. } | Generator::Piecewise { previous, .. } => {
                *previous = current
            }
            Generator::Uniform { .. }
            | Generator::NoFailure
            | Generator::Real { .. }
            | Generator::Period { .. }
            | Generator::Trace { .. } => {}
        }
    }

    /// Time of the next event at or after `current`
    pub fn generate_next_event<R: Rng + ?Sized>(&mut self, current: f64, rng: &mut R) -> Result<f64> {
        if current.is_nan() || current < 0.0 {
            return Err(Error::InvalidTimestamp(current));
        }

        let next = match self {
            Generator::Weibull {
                gamma,
                lambda,
                beta,
                start,
            } => {
                let age = current - *start;
                if age < 0.0 {
                    return Err(Error::InvalidTimestamp(current));
                }
                // Conditional on surviving to `age`:
                // -ln(1 - R) = (age/λ)^β - ln(1 - r)
                let r: f64 = rng.gen();
                let hazard = (age / *lambda).powf(*beta) - (1.0 - r).ln();
                round2(*lambda * hazard.powf(1.0 / *beta) + *gamma + *start)
            }
            Generator::Gaussian {
                mean,
                stddev,
                minval,
                start,
            } => {
                let mut value = f64::NEG_INFINITY;
                while value < *minval {
                    value = standard_normal(rng) * *stddev + *mean;
                }
                if *start + value < current {
                    *start = current;
                    current
                } else {
                    *start + value
                }
            }
            Generator::Constant { freq, previous } => {
                if *previous + *freq < current {
                    *previous = current;
                    current
                } else {
                    *previous + *freq
                }
            }
            Generator::Uniform { freq } => {
                let steps = ((*freq * 1000.0) as u64).max(1);
                current + rng.gen_range(0..steps) as f64 / 1000.0
            }
            Generator::NoFailure => f64::INFINITY,
            Generator::Real { gamma, lambda } => {
                round2(current + rng.gen_range(0.0..=*gamma) + *lambda)
            }
            Generator::Period { gamma } => (current / *gamma).ceil() * *gamma,
            Generator::Piecewise { table, previous } => {
                let value = table.sample(rng);
                if *previous + value <= current {
                    *previous = current;
                    current
                } else {
                    *previous + value
                }
            }
            Generator::Trace { times, cursor } => {
                while *cursor < times.len() && times[*cursor] < current {
                    *cursor += 1;
                }
                match times.get(*cursor) {
                    Some(t) => {
                        *cursor += 1;
                        *t
                    }
                    None => f64::INFINITY,
                }
            }
        };

        if next.is_nan() || next < 0.0 {
            return Err(Error::InvalidTimestamp(next));
        }
        Ok(next)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Box-Muller draw from N(0, 1)
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// =============================================================================
// Generator Slots
// =============================================================================

/// Generator specs for one hardware level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitGenerators {
    pub failure: Option<GeneratorSpec>,
    pub recovery: Option<GeneratorSpec>,
    /// Machines only: detection and replacement after a permanent failure
    pub permanent_recovery: Option<GeneratorSpec>,
    /// Disks only
    pub latent_error: Option<GeneratorSpec>,
    /// Disks only
    pub scrub: Option<GeneratorSpec>,
}

impl UnitGenerators {
    pub fn validate(&self) -> Result<()> {
        for spec in [
            &self.failure,
            &self.recovery,
            &self.permanent_recovery,
            &self.latent_error,
            &self.scrub,
        ]
        .into_iter()
        .flatten()
        {
            spec.validate()?;
        }
        Ok(())
    }

    /// A unit with a failure process must also be able to recover
    pub fn require_pair(&self, level: &str) -> Result<()> {
        if self.failure.is_some() && self.recovery.is_none() {
            return Err(Error::Config(format!(
                "{} has a failure generator but no recovery generator",
                level
            )));
        }
        if self.latent_error.is_some() && self.scrub.is_none() {
            return Err(Error::Config(format!(
                "{} has a latent error generator but no scrub generator",
                level
            )));
        }
        Ok(())
    }

    /// Fresh per-unit instances
    pub fn instantiate(&self) -> Result<GeneratorSlots> {
        let build = |spec: &Option<GeneratorSpec>| spec.as_ref().map(|s| s.build()).transpose();
        Ok(GeneratorSlots {
            failure: build(&self.failure)?,
            recovery: build(&self.recovery)?,
            permanent_recovery: build(&self.permanent_recovery)?,
            latent_error: build(&self.latent_error)?,
            scrub: build(&self.scrub)?,
        })
    }
}

/// Live generators attached to one unit
#[derive(Debug, Clone, Default)]
pub struct GeneratorSlots {
    pub failure: Option<Generator>,
    pub recovery: Option<Generator>,
    pub permanent_recovery: Option<Generator>,
    pub latent_error: Option<Generator>,
    pub scrub: Option<Generator>,
}
