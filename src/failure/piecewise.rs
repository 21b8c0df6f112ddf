//! Piecewise empirical distributions
//!
//! A table of `values` boundaries with one weight per segment. A draw picks a
//! segment by weight, then a uniform point inside it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Machine unavailability durations (hours) observed in GFS
pub const GFS_AVAILABILITY_VALUES: [f64; 7] = [0.1, 0.25, 0.5, 1.0, 6.0, 24.0, 144.0];
pub const GFS_AVAILABILITY_WEIGHTS: [f64; 6] = [0.91, 0.083, 0.0047, 0.001, 0.00075, 0.0006];

/// Second GFS availability table with a heavier tail
pub const GFS_AVAILABILITY2_VALUES: [f64; 9] = [0.1, 0.16, 0.66, 1.6, 6.6, 16.0, 32.0, 48.0, 166.0];
pub const GFS_AVAILABILITY2_WEIGHTS: [f64; 8] = [0.6, 0.2, 0.05, 0.05, 0.02, 0.07, 0.001, 0.009];

/// Normalized segment table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseTable {
    values: Vec<f64>,
    /// Cumulative weight at the end of each segment, last entry is 1
    cumulative: Vec<f64>,
}

impl PiecewiseTable {
    pub fn new(values: &[f64], weights: &[f64]) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidGenerator {
            name: "piecewise".to_string(),
            reason,
        };

        if values.len() < 2 || weights.len() + 1 != values.len() {
            return Err(invalid(format!(
                "{} boundaries need {} weights, got {}",
                values.len(),
                values.len().saturating_sub(1),
                weights.len()
            )));
        }
        if values.windows(2).any(|w| w[1] < w[0]) {
            return Err(invalid("boundaries must be non-decreasing".to_string()));
        }
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(invalid("weights must be finite and non-negative".to_string()));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(invalid("weights sum to zero".to_string()));
        }

        Ok(Self::from_const(values, weights))
    }

    pub fn gfs_availability() -> Self {
        Self::from_const(&GFS_AVAILABILITY_VALUES, &GFS_AVAILABILITY_WEIGHTS)
    }

    pub fn gfs_availability2() -> Self {
        Self::from_const(&GFS_AVAILABILITY2_VALUES, &GFS_AVAILABILITY2_WEIGHTS)
    }

    /// Builds from a table already known to be well formed
    fn from_const(values: &[f64], weights: &[f64]) -> Self {
        let total: f64 = weights.iter().sum();
        let mut acc = 0.0;
        let mut cumulative: Vec<f64> = weights
            .iter()
            .map(|w| {
                acc += w / total;
                acc
            })
            .collect();
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }
        Self {
            values: values.to_vec(),
            cumulative,
        }
    }

    /// One draw from the table
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let pick: f64 = rng.gen();
        let segment = self
            .cumulative
            .iter()
            .position(|c| pick <= *c)
            .unwrap_or(self.cumulative.len() - 1);
        let lo = self.values[segment];
        let hi = self.values[segment + 1];
        lo + rng.gen::<f64>() * (hi - lo)
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gfs_tables_are_normalized() {
        for table in [
            PiecewiseTable::gfs_availability(),
            PiecewiseTable::gfs_availability2(),
        ] {
            assert_eq!(table.cumulative.last().copied(), Some(1.0));
            assert!(table.cumulative.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_samples_stay_in_range() {
        let table = PiecewiseTable::gfs_availability();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let v = table.sample(&mut rng);
            assert!(v >= table.min() && v <= table.max());
        }
    }

    #[test]
    fn test_mass_in_first_segment() {
        let table = PiecewiseTable::gfs_availability();
        let mut rng = StdRng::seed_from_u64(9);
        let short = (0..10_000)
            .filter(|_| table.sample(&mut rng) <= 0.25)
            .count();
        // ~91% of the mass sits in [0.1, 0.25]
        assert!(short > 8_800 && short < 9_400, "short = {}", short);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(PiecewiseTable::new(&[1.0], &[]).is_err());
        assert!(PiecewiseTable::new(&[1.0, 2.0], &[0.5, 0.5]).is_err());
        assert!(PiecewiseTable::new(&[2.0, 1.0], &[1.0]).is_err());
        assert!(PiecewiseTable::new(&[1.0, 2.0], &[0.0]).is_err());
        assert!(PiecewiseTable::new(&[1.0, 2.0, 3.0], &[1.0, 3.0]).is_ok());
    }
}
