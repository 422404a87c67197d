//! Rate process — time-varying birth/death rates, shift events and pulses.
//!
//! Purpose
//! -------
//! Generate, for one replicate, the schedule that drives the birth–death
//! simulator: a piecewise-constant [`RateRegime`] covering `[0, root_age]`,
//! the death-rate model (piecewise or diversity-dependent equilibrium), and
//! the list of [`Event`]s (rate shifts, mass extinctions, mass speciations).
//!
//! Key behaviors
//! -------------
//! - Birth and death shift counts are drawn independently from
//!   `Poisson(poi_l)` / `Poisson(poi_m)`; shift ages are uniform on
//!   `(0, root_age)`; each segment's rate is redrawn within the configured
//!   bounds, uniformly or log-uniformly.
//! - With probability `p_constant_bd` no shifts are drawn. Fixed birth and
//!   death ranges force the same constant regime. A redrawn rate equal to
//!   the previous one is not a shift.
//! - With probability `p_equilibrium` the death rate becomes
//!   diversity-dependent: `μ(N) = λ(t) · N / K`, a logistic approach to a
//!   carrying capacity `K`.
//! - Mass-extinction and mass-speciation pulse counts are
//!   `Poisson(p · root_age)` with the per-Myr probability `p` drawn from its
//!   range; pulses are suppressed when the equilibrium and constant-rate
//!   regimes are both active in the same replicate.
//!
//! Invariants & assumptions
//! ------------------------
//! - Segments are contiguous, ordered from the root to the present, and cover
//!   `[0, root_age]` exactly.
//! - Segment birth rates lie in `range_l`, death rates in `range_m`.
//! - Events are sorted from oldest to youngest.
//! - Collapsed bounds (`min == max` for both rates) produce a single
//!   constant-rate segment and no shift events, whatever `poi_l` / `poi_m`;
//!   with zero pulse probabilities the event list is empty.
//! - Every emitted rate shift has a magnitude other than 1.
//!
//! Conventions
//! -----------
//! - Ages are in Myr before present.
//! - A rate shift's magnitude is the ratio new rate / previous rate; a pulse
//!   magnitude is the fraction of living lineages killed (extinction) or
//!   split (speciation).
//!
//! Testing notes
//! -------------
//! - Unit tests check contiguity and coverage of the regime, rate bounds, the
//!   collapsed-bounds edge case, and pulse suppression.
use crate::simulation::{
    errors::{SimError, SimResult},
    ranges::{check_positive, check_probability, poisson_count, ParamRange},
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// RateProcessConfig — configuration of the diversification rate process.
///
/// Fields
/// ------
/// - `range_l`, `range_m`: bounds for birth / death rates (per lineage per Myr).
/// - `log_uniform_rates`: draw rates log-uniformly instead of uniformly.
/// - `poi_l`, `poi_m`: expected number of birth / death rate shifts.
/// - `p_mass_extinction`, `p_mass_speciation`: per-Myr pulse probability
///   ranges, one value drawn per replicate.
/// - `mass_extinction_magnitude`: fraction of living lineages killed.
/// - `mass_speciation_magnitude`: fraction of living lineages that split.
/// - `p_equilibrium`: probability of the diversity-dependent death regime.
/// - `p_constant_bd`: probability of a shift-free regime (always shift-free
///   when both rate ranges are fixed).
/// - `carrying_capacity`: range for `K` in the equilibrium regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateProcessConfig {
    pub range_l: ParamRange,
    pub range_m: ParamRange,
    pub log_uniform_rates: bool,
    pub poi_l: f64,
    pub poi_m: f64,
    pub p_mass_extinction: ParamRange,
    pub p_mass_speciation: ParamRange,
    pub mass_extinction_magnitude: ParamRange,
    pub mass_speciation_magnitude: ParamRange,
    pub p_equilibrium: f64,
    pub p_constant_bd: f64,
    pub carrying_capacity: ParamRange,
}

impl Default for RateProcessConfig {
    /// Values used for the marine analysis: rates in [0.05, 0.25], four
    /// expected shifts each, rare pulses, half of the replicates in the
    /// equilibrium regime.
    fn default() -> Self {
        RateProcessConfig {
            range_l: ParamRange { name: "range_l", min: 0.05, max: 0.25 },
            range_m: ParamRange { name: "range_m", min: 0.05, max: 0.25 },
            log_uniform_rates: false,
            poi_l: 4.0,
            poi_m: 4.0,
            p_mass_extinction: ParamRange { name: "p_mass_extinction", min: 0.0, max: 0.01 },
            p_mass_speciation: ParamRange { name: "p_mass_speciation", min: 0.0, max: 0.001 },
            mass_extinction_magnitude: ParamRange {
                name: "mass_extinction_magnitude",
                min: 0.5,
                max: 0.95,
            },
            mass_speciation_magnitude: ParamRange {
                name: "mass_speciation_magnitude",
                min: 0.2,
                max: 0.5,
            },
            p_equilibrium: 0.5,
            p_constant_bd: 0.0,
            carrying_capacity: ParamRange { name: "carrying_capacity", min: 100.0, max: 1000.0 },
        }
    }
}

impl RateProcessConfig {
    /// Validate every field; called by [`RateProcess::new`].
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidRange` for negative or malformed ranges (ranges
    ///   deserialized from disk are re-validated here).
    /// - `SimError::InvalidProbability` for probabilities outside `[0, 1]`.
    /// - `SimError::InvalidParameter` for negative shift expectations.
    pub fn validate(&self) -> SimResult<()> {
        ParamRange::non_negative("range_l", self.range_l.min, self.range_l.max)?;
        ParamRange::non_negative("range_m", self.range_m.min, self.range_m.max)?;
        if self.log_uniform_rates && (self.range_l.min <= 0.0 || self.range_m.min <= 0.0) {
            return Err(SimError::InvalidRange {
                name: "range_l/range_m",
                min: self.range_l.min.min(self.range_m.min),
                max: self.range_l.max.max(self.range_m.max),
                reason: "Log-uniform rates require strictly positive lower bounds.",
            });
        }
        for (name, value) in [("poi_l", self.poi_l), ("poi_m", self.poi_m)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::InvalidParameter {
                    name,
                    value,
                    reason: "Expected shift count must be finite and >= 0.",
                });
            }
        }
        ParamRange::non_negative(
            "p_mass_extinction",
            self.p_mass_extinction.min,
            self.p_mass_extinction.max,
        )?;
        ParamRange::non_negative(
            "p_mass_speciation",
            self.p_mass_speciation.min,
            self.p_mass_speciation.max,
        )?;
        ParamRange::probability(
            "mass_extinction_magnitude",
            self.mass_extinction_magnitude.min,
            self.mass_extinction_magnitude.max,
        )?;
        ParamRange::probability(
            "mass_speciation_magnitude",
            self.mass_speciation_magnitude.min,
            self.mass_speciation_magnitude.max,
        )?;
        check_probability("p_equilibrium", self.p_equilibrium)?;
        check_probability("p_constant_bd", self.p_constant_bd)?;
        check_positive("carrying_capacity", self.carrying_capacity.min)?;
        ParamRange::new("carrying_capacity", self.carrying_capacity.min, self.carrying_capacity.max)?;
        Ok(())
    }
}

/// Which rate a shift event acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateTarget {
    Birth,
    Death,
}

/// Event — a rate shift or an instantaneous pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Rate change point; `magnitude` = new rate / previous rate.
    RateShift { age: f64, target: RateTarget, magnitude: f64 },
    /// Kills a fraction `magnitude` of living lineages.
    MassExtinction { age: f64, magnitude: f64 },
    /// Splits a fraction `magnitude` of living lineages.
    MassSpeciation { age: f64, magnitude: f64 },
}

impl Event {
    /// Age at which the event happens.
    pub fn age(&self) -> f64 {
        match *self {
            Event::RateShift { age, .. }
            | Event::MassExtinction { age, .. }
            | Event::MassSpeciation { age, .. } => age,
        }
    }

    /// `true` for mass extinction / speciation pulses.
    pub fn is_pulse(&self) -> bool {
        !matches!(self, Event::RateShift { .. })
    }
}

/// One contiguous piece of the rate regime, from `start` (older) to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSegment {
    pub start: f64,
    pub end: f64,
    pub birth: f64,
    pub death: f64,
}

/// RateRegime — contiguous segments ordered from the root to the present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRegime {
    segments: Vec<RateSegment>,
}

impl RateRegime {
    /// Segments, oldest first.
    pub fn segments(&self) -> &[RateSegment] {
        &self.segments
    }

    /// `(birth, death)` rates of the segment containing `age`.
    pub fn rates_at(&self, age: f64) -> (f64, f64) {
        let seg = self
            .segments
            .iter()
            .find(|s| age <= s.start && age >= s.end)
            .unwrap_or(&self.segments[self.segments.len() - 1]);
        (seg.birth, seg.death)
    }

    fn from_shifts(root_age: f64, birth: &[(f64, f64)], death: &[(f64, f64)]) -> RateRegime {
        // birth/death: (start_age, rate) oldest first, first start == root_age.
        let mut cuts: Vec<f64> = birth.iter().chain(death.iter()).map(|&(a, _)| a).collect();
        cuts.push(0.0);
        cuts.sort_by(|a, b| b.total_cmp(a));
        cuts.dedup();
        let rate_at = |shifts: &[(f64, f64)], age: f64| {
            shifts.iter().rev().find(|&&(start, _)| start >= age).map_or(shifts[0].1, |s| s.1)
        };
        let segments = cuts
            .windows(2)
            .map(|w| RateSegment {
                start: w[0],
                end: w[1],
                birth: rate_at(birth, w[0]),
                death: rate_at(death, w[0]),
            })
            .collect::<Vec<_>>();
        debug_assert!(segments.first().is_some_and(|s| s.start == root_age));
        RateRegime { segments }
    }
}

/// Death-rate model of a replicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeathModel {
    /// Death rates follow the regime segments.
    Piecewise,
    /// `μ(N) = λ(t) · N / K`.
    Equilibrium { carrying_capacity: f64 },
}

/// RateSchedule — everything the birth–death simulator needs for a replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSchedule {
    pub root_age: f64,
    pub regime: RateRegime,
    pub death_model: DeathModel,
    pub constant_rates: bool,
    /// Events sorted oldest to youngest.
    pub events: Vec<Event>,
}

impl RateSchedule {
    /// Instantaneous `(λ, μ)` at `age` given `n_living` lineages.
    pub fn rates(&self, age: f64, n_living: usize) -> (f64, f64) {
        let (birth, death) = self.regime.rates_at(age);
        match self.death_model {
            DeathModel::Piecewise => (birth, death),
            DeathModel::Equilibrium { carrying_capacity } => {
                (birth, birth * n_living as f64 / carrying_capacity)
            }
        }
    }

    /// Mass extinction / speciation pulses, oldest first.
    pub fn pulses(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_pulse())
    }

    /// Number of rate-shift events.
    pub fn n_shifts(&self) -> usize {
        self.events.iter().filter(|e| !e.is_pulse()).count()
    }
}

/// RateProcess — validated generator of per-replicate [`RateSchedule`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct RateProcess {
    config: RateProcessConfig,
}

impl RateProcess {
    /// Validate `config` and build the process.
    pub fn new(config: RateProcessConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(RateProcess { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &RateProcessConfig {
        &self.config
    }

    /// Draw a schedule for a clade of age `root_age`.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidParameter` when `root_age` is not finite and > 0.
    /// - Distribution construction errors from statrs (not expected with a
    ///   validated config).
    pub fn generate<R: Rng + ?Sized>(&self, root_age: f64, rng: &mut R) -> SimResult<RateSchedule> {
        check_positive("root_age", root_age)?;
        let cfg = &self.config;
        let drawn_constant = rng.gen_bool(cfg.p_constant_bd);
        let equilibrium = rng.gen_bool(cfg.p_equilibrium);
        // collapsed bounds leave nothing to shift to
        let constant_rates = drawn_constant || (cfg.range_l.is_fixed() && cfg.range_m.is_fixed());

        let (n_l, n_m) = if constant_rates {
            (0, 0)
        } else {
            (poisson_count(cfg.poi_l, rng)?, poisson_count(cfg.poi_m, rng)?)
        };
        let birth = self.draw_shifts(root_age, n_l as usize, &cfg.range_l, rng)?;
        let death = self.draw_shifts(root_age, n_m as usize, &cfg.range_m, rng)?;
        let regime = RateRegime::from_shifts(root_age, &birth, &death);

        let mut events = Vec::new();
        push_shift_events(&birth, RateTarget::Birth, &mut events);
        push_shift_events(&death, RateTarget::Death, &mut events);

        let death_model = if equilibrium {
            DeathModel::Equilibrium { carrying_capacity: cfg.carrying_capacity.sample(rng) }
        } else {
            DeathModel::Piecewise
        };

        if !(equilibrium && drawn_constant) {
            let p_me = cfg.p_mass_extinction.sample(rng);
            for _ in 0..poisson_count(p_me * root_age, rng)? {
                events.push(Event::MassExtinction {
                    age: rng.gen_range(0.0..root_age),
                    magnitude: cfg.mass_extinction_magnitude.sample(rng),
                });
            }
            let p_ms = cfg.p_mass_speciation.sample(rng);
            for _ in 0..poisson_count(p_ms * root_age, rng)? {
                events.push(Event::MassSpeciation {
                    age: rng.gen_range(0.0..root_age),
                    magnitude: cfg.mass_speciation_magnitude.sample(rng),
                });
            }
        }
        events.sort_by(|a, b| b.age().total_cmp(&a.age()));

        Ok(RateSchedule { root_age, regime, death_model, constant_rates, events })
    }

    fn draw_rate<R: Rng + ?Sized>(&self, range: &ParamRange, rng: &mut R) -> SimResult<f64> {
        if self.config.log_uniform_rates {
            range.sample_log_uniform(rng)
        } else {
            Ok(range.sample(rng))
        }
    }

    // (start_age, rate) pairs oldest first; the first start is the root.
    fn draw_shifts<R: Rng + ?Sized>(
        &self, root_age: f64, n_shifts: usize, range: &ParamRange, rng: &mut R,
    ) -> SimResult<Vec<(f64, f64)>> {
        let mut starts: Vec<f64> = (0..n_shifts).map(|_| rng.gen_range(0.0..root_age)).collect();
        starts.sort_by(|a, b| b.total_cmp(a));
        starts.dedup();
        let mut shifts = Vec::with_capacity(starts.len() + 1);
        shifts.push((root_age, self.draw_rate(range, rng)?));
        for start in starts {
            let rate = self.draw_rate(range, rng)?;
            if shifts.last().is_some_and(|&(_, previous)| previous == rate) {
                continue;
            }
            shifts.push((start, rate));
        }
        Ok(shifts)
    }
}

fn push_shift_events(shifts: &[(f64, f64)], target: RateTarget, events: &mut Vec<Event>) {
    for pair in shifts.windows(2) {
        let (previous, (age, rate)) = (pair[0].1, pair[1]);
        let magnitude = if previous > 0.0 { rate / previous } else { f64::INFINITY };
        events.push(Event::RateShift { age, target, magnitude });
    }
}
