//! Validated parameter ranges and probability guards for simulator configs.
//!
//! Purpose
//! -------
//! Most simulator knobs accept either a fixed value or a `[min, max]` range
//! from which a per-replicate value is drawn. This module provides the single
//! validated container for that pattern, [`ParamRange`], plus a probability
//! guard shared by every config struct.
//!
//! Key behaviors
//! -------------
//! - [`ParamRange::new`] rejects non-finite bounds and `min > max` at
//!   construction, so samplers never need to re-check.
//! - [`ParamRange::fixed`] builds the degenerate range `min == max`; sampling
//!   it returns the value without consuming randomness.
//! - [`ParamRange::sample`] draws uniformly; [`ParamRange::sample_log_uniform`]
//!   draws uniformly on the log scale (requires `min > 0`).
//!
//! Invariants & assumptions
//! ------------------------
//! - `min <= max` and both bounds are finite for every constructed range.
//! - Non-negativity is opt-in via [`ParamRange::non_negative`] because a few
//!   parameters (e.g. log-sampling slopes) are legitimately negative.
//!
//! Conventions
//! -----------
//! - Ranges are closed intervals. Uniform draws use `gen_range(min..=max)`.
//! - Parameter names are `&'static str` and appear verbatim in errors.
//!
//! Testing notes
//! -------------
//! - Unit tests cover construction failures, fixed-value sampling without
//!   RNG consumption, and that draws stay inside the bounds.
use crate::simulation::errors::{SimError, SimResult};
use rand::{distributions::Distribution, Rng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Poisson};

/// ParamRange — a validated closed interval `[min, max]`.
///
/// Fields
/// ------
/// - `name`: parameter name used in error messages and settings records.
/// - `min`, `max`: finite bounds with `min <= max`.
///
/// Notes
/// -----
/// - `min == max` is a fixed value; this is how scalar configuration knobs
///   and the "all bounds collapse" edge case are represented.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// Parameter name used in errors.
    #[serde(skip, default = "unnamed")]
    pub name: &'static str,
    /// Lower bound.
    pub min: f64,
    /// Upper bound (>= `min`).
    pub max: f64,
}

fn unnamed() -> &'static str {
    "unnamed"
}

impl ParamRange {
    /// Construct a validated range.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidRange` when either bound is non-finite or
    ///   `min > max`.
    pub fn new(name: &'static str, min: f64, max: f64) -> SimResult<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(SimError::InvalidRange {
                name,
                min,
                max,
                reason: "Range bounds must be finite.",
            });
        }
        if min > max {
            return Err(SimError::InvalidRange {
                name,
                min,
                max,
                reason: "Range must satisfy min <= max.",
            });
        }
        Ok(ParamRange { name, min, max })
    }

    /// Construct a degenerate range holding a single value.
    pub fn fixed(name: &'static str, value: f64) -> SimResult<Self> {
        ParamRange::new(name, value, value)
    }

    /// Construct a range and additionally require `min >= 0`.
    pub fn non_negative(name: &'static str, min: f64, max: f64) -> SimResult<Self> {
        let range = ParamRange::new(name, min, max)?;
        if range.min < 0.0 {
            return Err(SimError::InvalidRange {
                name,
                min,
                max,
                reason: "Range must be non-negative.",
            });
        }
        Ok(range)
    }

    /// Construct a range whose bounds are both probabilities.
    pub fn probability(name: &'static str, min: f64, max: f64) -> SimResult<Self> {
        let range = ParamRange::non_negative(name, min, max)?;
        if range.max > 1.0 {
            return Err(SimError::InvalidRange {
                name,
                min,
                max,
                reason: "Probability range must lie within [0, 1].",
            });
        }
        Ok(range)
    }

    /// `true` when `min == max`.
    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// Midpoint of the interval.
    pub fn mid(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Draw uniformly from `[min, max]`. Fixed ranges consume no randomness.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.is_fixed() {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    /// Draw log-uniformly from `[min, max]`.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidRange` when `min <= 0` (log scale undefined).
    pub fn sample_log_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> SimResult<f64> {
        if self.min <= 0.0 {
            return Err(SimError::InvalidRange {
                name: self.name,
                min: self.min,
                max: self.max,
                reason: "Log-uniform sampling requires min > 0.",
            });
        }
        if self.is_fixed() {
            return Ok(self.min);
        }
        let log_draw = rng.gen_range(self.min.ln()..=self.max.ln());
        Ok(log_draw.exp())
    }

    /// Draw an integer uniformly from `[ceil(min), floor(max)]`.
    pub fn sample_count<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let lo = self.min.max(0.0).ceil() as usize;
        let hi = (self.max.max(0.0).floor() as usize).max(lo);
        if lo == hi {
            return lo;
        }
        rng.gen_range(lo..=hi)
    }

    /// `true` when `value` lies inside the closed interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Validate that `value` is a finite probability in `[0, 1]`.
///
/// Errors
/// ------
/// - `SimError::InvalidProbability` otherwise.
pub fn check_probability(name: &'static str, value: f64) -> SimResult<f64> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(SimError::InvalidProbability { name, value });
    }
    Ok(value)
}

/// Validate that `value` is finite and strictly positive.
pub fn check_positive(name: &'static str, value: f64) -> SimResult<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SimError::InvalidParameter {
            name,
            value,
            reason: "Parameter must be finite and > 0.",
        });
    }
    Ok(value)
}

/// Mean/variance to Gamma `(shape, rate)`.
///
/// A Gamma with mean `m` and variance `v` has `shape = m² / v`,
/// `rate = m / v`.
pub fn gamma_shape_rate(mean: f64, variance: f64) -> (f64, f64) {
    (mean * mean / variance, mean / variance)
}

/// Draw a Poisson count; a zero (or negative) mean yields 0 without
/// consuming randomness.
pub fn poisson_count<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> SimResult<u64> {
    if mean <= 0.0 {
        return Ok(0);
    }
    let draw: f64 = Poisson::new(mean)?.sample(rng);
    Ok(draw as u64)
}

/// Draw from a Gamma parametrized by mean and variance.
pub fn gamma_draw<R: Rng + ?Sized>(mean: f64, variance: f64, rng: &mut R) -> SimResult<f64> {
    let (shape, rate) = gamma_shape_rate(mean, variance);
    Ok(Gamma::new(shape, rate)?.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Construction failures for malformed ranges.
    // - Sampling inside bounds and fixed-value behavior.
    //
    // They intentionally DO NOT cover:
    // - How each simulator consumes its ranges; that is tested in the
    //   rate-process, birth-death and preservation modules.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Ensure `ParamRange::new` rejects min > max and non-finite bounds.
    //
    // Given
    // -----
    // - (0.3, 0.1) and (0.0, inf).
    //
    // Expect
    // ------
    // - Both return `SimError::InvalidRange` carrying the parameter name.
    fn paramrange_rejects_inverted_and_nonfinite_bounds() {
        // Arrange / Act
        let inverted = ParamRange::new("rangeL", 0.3, 0.1);
        let infinite = ParamRange::new("rangeM", 0.0, f64::INFINITY);

        // Assert
        assert!(matches!(inverted, Err(SimError::InvalidRange { name: "rangeL", .. })));
        assert!(matches!(infinite, Err(SimError::InvalidRange { name: "rangeM", .. })));
    }

    #[test]
    // Purpose
    // -------
    // Verify that a fixed range returns its value without touching the RNG.
    //
    // Given
    // -----
    // - `ParamRange::fixed("x", 0.2)` and two RNGs with the same seed.
    //
    // Expect
    // ------
    // - The sample equals 0.2 and the RNG stream is unchanged afterwards.
    fn paramrange_fixed_consumes_no_randomness() {
        // Arrange
        let range = ParamRange::fixed("x", 0.2).unwrap();
        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);

        // Act
        let value = range.sample(&mut rng_a);

        // Assert
        assert_eq!(value, 0.2);
        assert_eq!(rng_a.gen::<u64>(), rng_b.gen::<u64>());
    }

    #[test]
    // Purpose
    // -------
    // Check that uniform and log-uniform draws stay inside the interval.
    //
    // Given
    // -----
    // - Range [0.05, 0.25] and 500 draws of each kind.
    //
    // Expect
    // ------
    // - Every draw satisfies `contains`.
    fn paramrange_draws_stay_in_bounds() {
        // Arrange
        let range = ParamRange::new("rangeL", 0.05, 0.25).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        // Act / Assert
        for _ in 0..500 {
            assert!(range.contains(range.sample(&mut rng)));
            let log_draw = range.sample_log_uniform(&mut rng).unwrap();
            assert!(log_draw >= range.min - 1e-12 && log_draw <= range.max + 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure probability validation rejects out-of-range values.
    //
    // Given
    // -----
    // - Values -0.1, 1.5 and NaN, plus a valid 0.5.
    //
    // Expect
    // ------
    // - Invalid values error; 0.5 passes through.
    fn check_probability_guards_unit_interval() {
        assert!(check_probability("p", -0.1).is_err());
        assert!(check_probability("p", 1.5).is_err());
        assert!(check_probability("p", f64::NAN).is_err());
        assert_eq!(check_probability("p", 0.5).unwrap(), 0.5);
    }
}
