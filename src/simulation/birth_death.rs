//! Birth–death simulator — lineage sets under a stochastic rate schedule.
//!
//! Purpose
//! -------
//! Grow and prune a set of lineages from `root_age` to the present under a
//! [`RateSchedule`], and retry whole replicates until the outcome satisfies
//! the configured species-count bounds.
//!
//! Key behaviors
//! -------------
//! - Time advances in discrete steps of `1 / scale` Myr. In each step every
//!   living lineage draws `u ~ U(0, 1)`: `u < λ·dt` speciates, otherwise
//!   `u < (λ + μ)·dt` goes extinct. Event ages are jittered uniformly inside
//!   the step.
//! - Mass-extinction / mass-speciation pulses are applied at the start of
//!   the step that contains them: each living lineage is independently
//!   killed (or split) with probability equal to the pulse magnitude.
//! - An attempt is abandoned as soon as the total lineage count exceeds
//!   `range_sp.max`, or when every lineage is extinct before the present
//!   ([`SimError::DegenerateTrajectory`]).
//! - [`BirthDeathSimulator::simulate`] retries up to `max_attempts` times and
//!   otherwise fails with [`SimError::SimulationBoundsError`].
//!
//! Invariants & assumptions
//! ------------------------
//! - For every lineage `origination >= extinction` (ages); extant lineages
//!   have `extinction = None`.
//! - Lineage ids are `0..n` in creation order; founders come first.
//! - An accepted set has `range_sp.min <= n <= range_sp.max`,
//!   `min_extant_sp <= n_extant <= max_extant_sp` and
//!   `n_extinct >= min_ex_sp`.
//! - Identical `(config, seed)` pairs reproduce identical lineage sets.
//!
//! Downstream usage
//! ----------------
//! - The accepted [`LineageSet`] feeds the geography and preservation stages;
//!   its [`LineageSet::range_through_diversity`] is the regression target.
use crate::simulation::{
    errors::{SimError, SimResult},
    ranges::{check_positive, ParamRange},
    rates::{Event, RateProcess, RateProcessConfig, RateSchedule},
    time_bins::TimeBinning,
};
use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// BirthDeathConfig — bounds and rates for the diversification step.
///
/// Fields
/// ------
/// - `s_species`: range of founder counts.
/// - `root_r`: range of root ages (Myr), one drawn per replicate.
/// - `range_sp`: accepted range of total lineages (extinct + extant).
/// - `min_ex_sp`: minimum number of extinct lineages.
/// - `min_extant_sp`, `max_extant_sp`: accepted range of extant lineages.
/// - `scale`: time steps per Myr.
/// - `max_attempts`: retry budget per replicate.
/// - `rates`: the [`RateProcessConfig`] driving the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthDeathConfig {
    pub s_species: ParamRange,
    pub root_r: ParamRange,
    pub range_sp: ParamRange,
    pub min_ex_sp: usize,
    pub min_extant_sp: usize,
    pub max_extant_sp: usize,
    pub scale: f64,
    pub max_attempts: usize,
    pub rates: RateProcessConfig,
}

impl Default for BirthDeathConfig {
    fn default() -> Self {
        BirthDeathConfig {
            s_species: ParamRange { name: "s_species", min: 100.0, max: 2000.0 },
            root_r: ParamRange { name: "root_r", min: 66.0, max: 66.0 },
            range_sp: ParamRange { name: "range_sp", min: 0.0, max: 30000.0 },
            min_ex_sp: 0,
            min_extant_sp: 100,
            max_extant_sp: usize::MAX,
            scale: 10.0,
            max_attempts: 1000,
            rates: RateProcessConfig::default(),
        }
    }
}

impl BirthDeathConfig {
    /// Validate bounds and the nested rate config.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidRange` for malformed count/age ranges or
    ///   `min_extant_sp > max_extant_sp`.
    /// - `SimError::InvalidParameter` for `scale <= 0`, zero founders or a
    ///   zero retry budget.
    pub fn validate(&self) -> SimResult<()> {
        ParamRange::non_negative("s_species", self.s_species.min, self.s_species.max)?;
        if self.s_species.max < 1.0 {
            return Err(SimError::InvalidParameter {
                name: "s_species",
                value: self.s_species.max,
                reason: "At least one founder lineage is required.",
            });
        }
        ParamRange::non_negative("root_r", self.root_r.min, self.root_r.max)?;
        check_positive("root_r", self.root_r.min)?;
        ParamRange::non_negative("range_sp", self.range_sp.min, self.range_sp.max)?;
        if self.min_extant_sp > self.max_extant_sp {
            return Err(SimError::InvalidRange {
                name: "min_extant_sp/max_extant_sp",
                min: self.min_extant_sp as f64,
                max: self.max_extant_sp as f64,
                reason: "Range must satisfy min <= max.",
            });
        }
        check_positive("scale", self.scale)?;
        if self.max_attempts == 0 {
            return Err(SimError::InvalidParameter {
                name: "max_attempts",
                value: 0.0,
                reason: "At least one attempt is required.",
            });
        }
        self.rates.validate()
    }
}

/// Lineage — one species lineage of a replicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: usize,
    /// Origination age (Myr before present).
    pub origination: f64,
    /// Extinction age; `None` when the lineage is extant.
    pub extinction: Option<f64>,
    /// Parent lineage; `None` for founders.
    pub parent: Option<usize>,
}

impl Lineage {
    /// Extinction age, 0 for extant lineages.
    pub fn end(&self) -> f64 {
        self.extinction.unwrap_or(0.0)
    }

    pub fn is_extant(&self) -> bool {
        self.extinction.is_none()
    }

    /// `true` when the lineage is alive at `age`.
    pub fn alive_at(&self, age: f64) -> bool {
        age <= self.origination && age >= self.end()
    }
}

/// LineageSet — the accepted outcome of one replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageSet {
    lineages: Vec<Lineage>,
    n_founders: usize,
    root_age: f64,
    schedule: RateSchedule,
    attempts: usize,
}

impl LineageSet {
    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    pub fn n_founders(&self) -> usize {
        self.n_founders
    }

    pub fn n_extant(&self) -> usize {
        self.lineages.iter().filter(|l| l.is_extant()).count()
    }

    pub fn n_extinct(&self) -> usize {
        self.len() - self.n_extant()
    }

    pub fn root_age(&self) -> f64 {
        self.root_age
    }

    /// Rate schedule the set was simulated under.
    pub fn schedule(&self) -> &RateSchedule {
        &self.schedule
    }

    /// Number of attempts the retry loop needed.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Number of lineages alive at `age`.
    pub fn living_at(&self, age: f64) -> usize {
        self.lineages.iter().filter(|l| l.alive_at(age)).count()
    }

    /// Summed lifespans of all lineages (Myr).
    pub fn total_branch_length(&self) -> f64 {
        self.lineages.iter().map(|l| l.origination - l.end()).sum()
    }

    /// Number of lineages whose lifespan overlaps each bin, youngest-first.
    ///
    /// A lineage counts for a bin when it spends a positive amount of time in
    /// it, or when it is extant and the bin touches the present.
    pub fn range_through_diversity(&self, binning: &TimeBinning) -> Array1<u32> {
        let mut counts = Array1::<u32>::zeros(binning.n_bins());
        for lineage in &self.lineages {
            for (b, count) in counts.iter_mut().enumerate() {
                let (young, _) = binning.bounds(b);
                let touches_present = lineage.is_extant() && young <= 0.0;
                if touches_present || binning.overlap(b, lineage.origination, lineage.end()) > 0.0 {
                    *count += 1;
                }
            }
        }
        counts
    }

    #[cfg(test)]
    pub(crate) fn from_parts(lineages: Vec<Lineage>, root_age: f64, schedule: RateSchedule) -> Self {
        let n_founders = lineages.iter().filter(|l| l.parent.is_none()).count();
        LineageSet { lineages, n_founders, root_age, schedule, attempts: 1 }
    }
}

/// BirthDeathSimulator — validated diversification simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct BirthDeathSimulator {
    config: BirthDeathConfig,
    process: RateProcess,
}

impl BirthDeathSimulator {
    /// Validate `config` and build the simulator.
    pub fn new(config: BirthDeathConfig) -> SimResult<Self> {
        config.validate()?;
        let process = RateProcess::new(config.rates.clone())?;
        Ok(BirthDeathSimulator { config, process })
    }

    pub fn config(&self) -> &BirthDeathConfig {
        &self.config
    }

    /// Simulate one accepted lineage set from a fresh stream seeded by `seed`.
    pub fn simulate(&self, seed: u64) -> SimResult<LineageSet> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.simulate_with_rng(&mut rng)
    }

    /// Simulate one accepted lineage set, drawing from `rng`.
    ///
    /// Errors
    /// ------
    /// - `SimError::SimulationBoundsError` when no attempt within
    ///   `max_attempts` satisfies the bounds. The last rejection reason is
    ///   carried along (a [`SimError::DegenerateTrajectory`] message when the
    ///   final attempt went extinct).
    /// - Distribution construction errors propagate immediately.
    pub fn simulate_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> SimResult<LineageSet> {
        let mut last_reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            let root_age = self.config.root_r.sample(rng);
            let n_founders = self.config.s_species.sample_count(rng).max(1);
            let schedule = self.process.generate(root_age, rng)?;
            match self.run_attempt(root_age, n_founders, &schedule, rng) {
                Ok(lineages) => match self.check_bounds(&lineages) {
                    Ok(()) => {
                        return Ok(LineageSet { lineages, n_founders, root_age, schedule, attempts: attempt });
                    }
                    Err(reason) => last_reason = reason,
                },
                Err(err @ SimError::DegenerateTrajectory { .. }) => last_reason = err.to_string(),
                Err(reason @ SimError::SimulationBoundsError { .. }) => last_reason = reason.to_string(),
                Err(other) => return Err(other),
            }
            debug!(attempt, reason = %last_reason, "rejected birth-death replicate");
        }
        Err(SimError::SimulationBoundsError { attempts: self.config.max_attempts, last_reason })
    }

    fn check_bounds(&self, lineages: &[Lineage]) -> Result<(), String> {
        let total = lineages.len();
        let extant = lineages.iter().filter(|l| l.is_extant()).count();
        let extinct = total - extant;
        if !self.config.range_sp.contains(total as f64) {
            return Err(format!(
                "{total} lineages outside [{}, {}]",
                self.config.range_sp.min, self.config.range_sp.max
            ));
        }
        if extant < self.config.min_extant_sp || extant > self.config.max_extant_sp {
            return Err(format!(
                "{extant} extant lineages outside [{}, {}]",
                self.config.min_extant_sp, self.config.max_extant_sp
            ));
        }
        if extinct < self.config.min_ex_sp {
            return Err(format!("{extinct} extinct lineages below {}", self.config.min_ex_sp));
        }
        Ok(())
    }

    fn run_attempt<R: Rng + ?Sized>(
        &self, root_age: f64, n_founders: usize, schedule: &RateSchedule, rng: &mut R,
    ) -> SimResult<Vec<Lineage>> {
        let max_total = self.config.range_sp.max;
        let dt = 1.0 / self.config.scale;
        let n_steps = (root_age * self.config.scale).ceil() as usize;

        let mut lineages: Vec<Lineage> = (0..n_founders)
            .map(|id| Lineage { id, origination: root_age, extinction: None, parent: None })
            .collect();
        let mut living: Vec<usize> = (0..n_founders).collect();
        let mut pulses = schedule.pulses().peekable();

        for step in 0..n_steps {
            let age = root_age - step as f64 * dt;
            if age <= 0.0 {
                break;
            }
            let step_len = dt.min(age);
            let next_age = age - step_len;

            while let Some(pulse) = pulses.next_if(|p| p.age() > next_age) {
                apply_pulse(pulse, &mut lineages, &mut living, rng);
            }

            let (birth, death) = schedule.rates(age, living.len());
            let p_birth = birth * step_len;
            let p_event = (birth + death) * step_len;
            let mut survivors = Vec::with_capacity(living.len());
            let mut born = Vec::new();
            for &id in &living {
                let u: f64 = rng.gen();
                let when = age - rng.gen::<f64>() * step_len;
                if u < p_birth {
                    born.push((id, when));
                    survivors.push(id);
                } else if u < p_event {
                    lineages[id].extinction = Some(when);
                } else {
                    survivors.push(id);
                }
            }
            for (parent, when) in born {
                survivors.push(push_daughter(&mut lineages, parent, when));
            }
            living = survivors;

            if living.is_empty() {
                return Err(SimError::DegenerateTrajectory { extinct_at: next_age });
            }
            if lineages.len() as f64 > max_total {
                return Err(SimError::SimulationBoundsError {
                    attempts: 1,
                    last_reason: format!("total lineages exceeded {max_total} at age {next_age:.2}"),
                });
            }
        }
        Ok(lineages)
    }
}

fn push_daughter(lineages: &mut Vec<Lineage>, parent: usize, when: f64) -> usize {
    let id = lineages.len();
    lineages.push(Lineage { id, origination: when, extinction: None, parent: Some(parent) });
    id
}

fn apply_pulse<R: Rng + ?Sized>(
    pulse: &Event, lineages: &mut Vec<Lineage>, living: &mut Vec<usize>, rng: &mut R,
) {
    match *pulse {
        Event::MassExtinction { age, magnitude } => {
            living.retain(|&id| {
                if rng.gen_bool(magnitude) {
                    lineages[id].extinction = Some(age);
                    false
                } else {
                    true
                }
            });
        }
        Event::MassSpeciation { age, magnitude } => {
            let parents: Vec<usize> = living.iter().copied().filter(|_| rng.gen_bool(magnitude)).collect();
            for parent in parents {
                living.push(push_daughter(lineages, parent, age));
            }
        }
        Event::RateShift { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Seed determinism.
    // - Acceptance bounds and lineage age ordering.
    // - Exhaustion of the retry budget.
    // - Range-through diversity counting.
    //
    // They intentionally DO NOT cover:
    // - Rate schedule generation (see `rates`).
    // -------------------------------------------------------------------------

    fn small_config() -> BirthDeathConfig {
        BirthDeathConfig {
            s_species: ParamRange::new("s_species", 10.0, 50.0).unwrap(),
            root_r: ParamRange::fixed("root_r", 30.0).unwrap(),
            range_sp: ParamRange::new("range_sp", 10.0, 10000.0).unwrap(),
            min_extant_sp: 5,
            max_attempts: 1000,
            ..BirthDeathConfig::default()
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify that identical seeds reproduce identical lineage sets.
    //
    // Given
    // -----
    // - The small test config and seed 42 used twice, seed 43 once.
    //
    // Expect
    // ------
    // - Equal sets for equal seeds; the other seed differs.
    fn simulate_is_deterministic_for_a_seed() {
        // Arrange
        let sim = BirthDeathSimulator::new(small_config()).unwrap();

        // Act
        let a = sim.simulate(42).unwrap();
        let b = sim.simulate(42).unwrap();
        let c = sim.simulate(43).unwrap();

        // Assert
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    // Purpose
    // -------
    // Check accepted sets honor every configured bound and age ordering.
    //
    // Given
    // -----
    // - 20 seeds under the small test config.
    //
    // Expect
    // ------
    // - Founders in [10, 50], total within range_sp, extant >= 5,
    //   origination >= extinction for every lineage.
    fn accepted_sets_respect_bounds() {
        let sim = BirthDeathSimulator::new(small_config()).unwrap();
        for seed in 0..20 {
            let set = sim.simulate(seed).unwrap();
            assert!((10..=50).contains(&set.n_founders()));
            assert!(set.len() >= 10 && set.len() <= 10000);
            assert!(set.n_extant() >= 5);
            for l in set.lineages() {
                assert!(l.origination >= l.end());
                assert!(l.origination <= 30.0);
                if let Some(p) = l.parent {
                    assert!(set.lineages()[p].origination >= l.origination);
                }
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure an unsatisfiable bound exhausts the budget with
    // `SimulationBoundsError`.
    //
    // Given
    // -----
    // - min_extant_sp larger than range_sp.max, 3 attempts.
    //
    // Expect
    // ------
    // - `SimulationBoundsError { attempts: 3, .. }`.
    fn unsatisfiable_bounds_exhaust_retry_budget() {
        // Arrange
        let config = BirthDeathConfig {
            range_sp: ParamRange::new("range_sp", 0.0, 60.0).unwrap(),
            min_extant_sp: 500,
            max_attempts: 3,
            ..small_config()
        };
        let sim = BirthDeathSimulator::new(config).unwrap();

        // Act
        let result = sim.simulate(1);

        // Assert
        assert!(matches!(result, Err(SimError::SimulationBoundsError { attempts: 3, .. })));
    }

    #[test]
    // Purpose
    // -------
    // Verify range-through diversity on a hand-built lineage set.
    //
    // Given
    // -----
    // - Bins [0, 10, 20, 30]; lineage 0 from 30 to extant, lineage 1 from 25
    //   to 12, lineage 2 from 8 to 2.
    //
    // Expect
    // ------
    // - Youngest-first counts [2, 2, 2].
    fn range_through_diversity_counts_overlaps() {
        // Arrange
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        let schedule = RateProcess::new(RateProcessConfig::default())
            .unwrap()
            .generate(30.0, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let lineages = vec![
            Lineage { id: 0, origination: 30.0, extinction: None, parent: None },
            Lineage { id: 1, origination: 25.0, extinction: Some(12.0), parent: Some(0) },
            Lineage { id: 2, origination: 8.0, extinction: Some(2.0), parent: Some(0) },
        ];
        let set = LineageSet::from_parts(lineages, 30.0, schedule);

        // Act
        let counts = set.range_through_diversity(&binning);

        // Assert
        assert_eq!(counts.to_vec(), vec![2, 2, 2]);
        assert_eq!(set.n_extant(), 1);
        assert_eq!(set.living_at(10.0), 1);
    }

    #[test]
    // Purpose
    // -------
    // Ensure invalid bounds fail at construction.
    fn new_rejects_inverted_extant_bounds() {
        let config = BirthDeathConfig { min_extant_sp: 10, max_extant_sp: 5, ..small_config() };
        assert!(matches!(BirthDeathSimulator::new(config), Err(SimError::InvalidRange { .. })));
    }
}
