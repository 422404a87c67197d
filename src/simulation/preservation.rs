//! Preservation model — fossil occurrences from a lineage set.
//!
//! Purpose
//! -------
//! Turn the lineages of one replicate into a simulated fossil record: per
//! `(lineage, area, bin)` occurrence counts, per `(area, bin)` locality
//! counts, the true diversity trajectory, and a provenance record of every
//! parameter drawn for the replicate.
//!
//! Key behaviors
//! -------------
//! - Per-replicate draws: `eta`, `p_gap`, size concentration, link strength,
//!   species-rate mean, singleton frequency, and the temporal model.
//! - Sampling intensity per `(l, a, b)`:
//!   `sp_l · area_a · eta_{l,a} · r_b · size_a · n_areas · t_{l,b} · occ_{l,a,b}
//!   · c2_{l,a,b} · gap_b`, with
//!   - `sp_l ~ Gamma(mean = sp_mean, var = sp_variance)`,
//!   - `area_a ~ Gamma(area_mean, area_variance) / area_mean`,
//!   - `eta_{l,a} ~ Gamma(shape = 1/eta, rate = 1/eta)` (mean 1),
//!   - `r_b` from the temporal model, `t_{l,b}` the lineage's time in the bin,
//!   - `occ` the geographic occupancy and `gap_b = 0` for gap bins.
//! - Temporal model, one per replicate: log-linear
//!   `intercept · exp(slope · elapsed + N(0, sd))`, or with probability
//!   `fraction_skyline_sampling` a skyline with `1 + Poisson(mean - 1)`
//!   epochs whose log-rates scatter around `ln(intercept)` with
//!   `sd_through_time_skyline`.
//! - A fraction `singletons_frequency` of lineages is marked rare; their
//!   intensities are rescaled to an expected total of one occurrence.
//! - Occurrence counts are `Poisson(intensity)`. Localities per
//!   `(area, bin)` are `1 + Binomial(n_occ - 1, p_new_locality)`; when a bin
//!   exceeds `maximum_localities_per_bin`, localities are scaled down and
//!   occurrences thinned binomially by the same fraction.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every occurrence lies in an area that exists at the bin midpoint and in
//!   a bin the lineage lived in.
//! - Gap bins carry no occurrences or localities.
//! - Per bin, total localities never exceed `maximum_localities_per_bin`;
//!   an `(area, bin)` cell has localities iff it has occurrences.
//! - `true_trajectory` depends only on the lineage set.
//!
//! Downstream usage
//! ----------------
//! - [`FossilRecord::occurrence_data`] is the sampling-only view consumed by
//!   feature extraction; the same view is built from empirical data.
use crate::simulation::{
    area_constraints::CarryingCapacity,
    birth_death::LineageSet,
    errors::{SimError, SimResult},
    geography::{simulate_geography, GeographyParams},
    ranges::{check_positive, check_probability, gamma_draw, poisson_count, ParamRange},
    rates::{Event, RateRegime},
    time_bins::{AreaTable, TimeBinning},
};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::{distributions::Distribution, Rng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, Gamma, Normal};

/// PreservationConfig — fossil-sampling parameters.
///
/// Range-valued fields are drawn once per replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreservationConfig {
    /// Area–species stochasticity (Gamma shape/rate `1/eta`).
    pub eta: ParamRange,
    /// Probability that a bin has no preservation at all.
    pub p_gap: ParamRange,
    /// Fixed per-lineage dispersal rate; `None` draws it from a Gamma.
    pub dispersal_rate: Option<f64>,
    pub max_dist: f64,
    pub disp_rate_mean: ParamRange,
    pub disp_rate_variance: f64,
    pub area_mean: f64,
    pub area_variance: f64,
    pub size_concentration_parameter: ParamRange,
    pub link_area_size_carrying_capacity: ParamRange,
    pub p_origination_a_slope_mean: f64,
    pub p_origination_a_slope_sd: f64,
    pub sp_mean: ParamRange,
    pub sp_variance: f64,
    /// Change in log-sampling rate per Myr (log-linear model).
    pub slope: ParamRange,
    /// Sampling rate at the oldest bin.
    pub intercept: ParamRange,
    pub sd_through_time: ParamRange,
    pub sd_through_time_skyline: f64,
    pub mean_n_epochs_skyline: f64,
    pub fraction_skyline_sampling: f64,
    pub maximum_localities_per_bin: usize,
    pub singletons_frequency: ParamRange,
    /// Probability that an occurrence founds a new locality.
    pub p_new_locality: f64,
}

impl Default for PreservationConfig {
    /// Values used for the marine analysis.
    fn default() -> Self {
        PreservationConfig {
            eta: ParamRange { name: "eta", min: 1.0, max: 1.75 },
            p_gap: ParamRange { name: "p_gap", min: 0.01, max: 0.75 },
            dispersal_rate: None,
            max_dist: 1.0,
            disp_rate_mean: ParamRange { name: "disp_rate_mean", min: 0.0, max: 0.5 },
            disp_rate_variance: 1.0,
            area_mean: 100.0,
            area_variance: 2.0,
            size_concentration_parameter: ParamRange {
                name: "size_concentration_parameter",
                min: 0.1,
                max: 3.0,
            },
            link_area_size_carrying_capacity: ParamRange {
                name: "link_area_size_carrying_capacity",
                min: 1.0,
                max: 10.0,
            },
            p_origination_a_slope_mean: 2.0,
            p_origination_a_slope_sd: 0.5,
            sp_mean: ParamRange { name: "sp_mean", min: 0.2, max: 0.5 },
            sp_variance: 2.0,
            slope: ParamRange { name: "slope", min: -0.01, max: 0.0 },
            intercept: ParamRange { name: "intercept", min: 0.1, max: 0.5 },
            sd_through_time: ParamRange { name: "sd_through_time", min: 0.001, max: 0.01 },
            sd_through_time_skyline: 3.0,
            mean_n_epochs_skyline: 11.0,
            fraction_skyline_sampling: 0.75,
            maximum_localities_per_bin: 350,
            singletons_frequency: ParamRange { name: "singletons_frequency", min: 0.0, max: 0.5 },
            p_new_locality: 0.5,
        }
    }
}

impl PreservationConfig {
    /// Validate every field.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidRange` / `InvalidProbability` / `InvalidParameter`
    ///   naming the offending field.
    pub fn validate(&self) -> SimResult<()> {
        ParamRange::non_negative("eta", self.eta.min, self.eta.max)?;
        check_positive("eta", self.eta.min)?;
        ParamRange::probability("p_gap", self.p_gap.min, self.p_gap.max)?;
        if let Some(d) = self.dispersal_rate {
            if !d.is_finite() || d < 0.0 {
                return Err(SimError::InvalidParameter {
                    name: "dispersal_rate",
                    value: d,
                    reason: "Dispersal rate must be finite and >= 0.",
                });
            }
        }
        if !self.max_dist.is_finite() || self.max_dist < 0.0 {
            return Err(SimError::InvalidParameter {
                name: "max_dist",
                value: self.max_dist,
                reason: "Maximum dispersal distance must be finite and >= 0.",
            });
        }
        ParamRange::non_negative("disp_rate_mean", self.disp_rate_mean.min, self.disp_rate_mean.max)?;
        check_positive("disp_rate_variance", self.disp_rate_variance)?;
        check_positive("area_mean", self.area_mean)?;
        check_positive("area_variance", self.area_variance)?;
        ParamRange::non_negative(
            "size_concentration_parameter",
            self.size_concentration_parameter.min,
            self.size_concentration_parameter.max,
        )?;
        check_positive("size_concentration_parameter", self.size_concentration_parameter.min)?;
        ParamRange::non_negative(
            "link_area_size_carrying_capacity",
            self.link_area_size_carrying_capacity.min,
            self.link_area_size_carrying_capacity.max,
        )?;
        if !self.p_origination_a_slope_mean.is_finite() {
            return Err(SimError::InvalidParameter {
                name: "p_origination_a_slope_mean",
                value: self.p_origination_a_slope_mean,
                reason: "Slope mean must be finite.",
            });
        }
        if !self.p_origination_a_slope_sd.is_finite() || self.p_origination_a_slope_sd < 0.0 {
            return Err(SimError::InvalidParameter {
                name: "p_origination_a_slope_sd",
                value: self.p_origination_a_slope_sd,
                reason: "Standard deviation must be finite and >= 0.",
            });
        }
        ParamRange::non_negative("sp_mean", self.sp_mean.min, self.sp_mean.max)?;
        check_positive("sp_mean", self.sp_mean.min)?;
        check_positive("sp_variance", self.sp_variance)?;
        ParamRange::new("slope", self.slope.min, self.slope.max)?;
        ParamRange::non_negative("intercept", self.intercept.min, self.intercept.max)?;
        check_positive("intercept", self.intercept.min)?;
        ParamRange::non_negative("sd_through_time", self.sd_through_time.min, self.sd_through_time.max)?;
        if !self.sd_through_time_skyline.is_finite() || self.sd_through_time_skyline < 0.0 {
            return Err(SimError::InvalidParameter {
                name: "sd_through_time_skyline",
                value: self.sd_through_time_skyline,
                reason: "Standard deviation must be finite and >= 0.",
            });
        }
        if !self.mean_n_epochs_skyline.is_finite() || self.mean_n_epochs_skyline < 1.0 {
            return Err(SimError::InvalidParameter {
                name: "mean_n_epochs_skyline",
                value: self.mean_n_epochs_skyline,
                reason: "Mean number of skyline epochs must be >= 1.",
            });
        }
        check_probability("fraction_skyline_sampling", self.fraction_skyline_sampling)?;
        if self.maximum_localities_per_bin == 0 {
            return Err(SimError::InvalidParameter {
                name: "maximum_localities_per_bin",
                value: 0.0,
                reason: "At least one locality per bin must be allowed.",
            });
        }
        ParamRange::probability(
            "singletons_frequency",
            self.singletons_frequency.min,
            self.singletons_frequency.max,
        )?;
        check_probability("p_new_locality", self.p_new_locality)?;
        Ok(())
    }
}

/// Temporal sampling model drawn for a replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemporalModel {
    LogLinear { slope: f64, intercept: f64, sd: f64 },
    /// Epoch start ages (oldest first) and their rates.
    Skyline { epoch_starts: Vec<f64>, epoch_rates: Vec<f64> },
}

/// SimulationSettings — provenance record of one replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub time_specific_rate: Vec<f64>,
    pub species_specific_rate: Vec<f64>,
    pub area_specific_rate: Vec<f64>,
    pub area_size: Vec<f64>,
    pub n_areas: usize,
    pub n_bins: usize,
    pub n_species: usize,
    pub n_sampled_species: usize,
    pub tot_br_length: f64,
    pub n_occurrences: u64,
    pub temporal_model: TemporalModel,
    pub eta: f64,
    pub p_gap: f64,
    pub gap_bins: Vec<usize>,
    pub area_size_concentration_prm: f64,
    pub link_area_size_carrying_capacity: f64,
    pub singletons_frequency: f64,
    pub time_bins_duration: Vec<f64>,
    pub root_age: f64,
    pub n_rate_shifts: usize,
    pub events: Vec<Event>,
    pub regime: RateRegime,
}

/// OccurrenceRecord — a single sampled fossil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub lineage_id: usize,
    pub area_id: usize,
    pub time_bin_index: usize,
}

/// OccurrenceData — sampling evidence only, as used by feature extraction.
///
/// Fields
/// ------
/// - `counts`: `(species, areas, bins)` occurrence counts; rows are sampled
///   species (simulated) or taxa (empirical).
/// - `localities`: `(areas, bins)` locality counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceData {
    pub counts: Array3<u32>,
    pub localities: Array2<u32>,
}

impl OccurrenceData {
    /// Wrap arrays after checking that areas and bins agree.
    pub fn new(counts: Array3<u32>, localities: Array2<u32>) -> SimResult<Self> {
        let (_, n_areas, n_bins) = counts.dim();
        if localities.dim() != (n_areas, n_bins) {
            return Err(SimError::ShapeMismatch {
                name: "localities",
                expected: vec![n_areas, n_bins],
                found: vec![localities.nrows(), localities.ncols()],
            });
        }
        Ok(OccurrenceData { counts, localities })
    }

    /// Build from individual records; every record counts as one occurrence.
    /// Localities are taken to equal occurrence counts per `(area, bin)`.
    pub fn from_records(
        records: &[OccurrenceRecord], n_species: usize, n_areas: usize, n_bins: usize,
    ) -> SimResult<Self> {
        let mut counts = Array3::<u32>::zeros((n_species, n_areas, n_bins));
        for r in records {
            if r.lineage_id >= n_species || r.area_id >= n_areas || r.time_bin_index >= n_bins {
                return Err(SimError::ShapeMismatch {
                    name: "occurrence record",
                    expected: vec![n_species, n_areas, n_bins],
                    found: vec![r.lineage_id, r.area_id, r.time_bin_index],
                });
            }
            counts[[r.lineage_id, r.area_id, r.time_bin_index]] += 1;
        }
        let localities = counts.sum_axis(Axis(0));
        Ok(OccurrenceData { counts, localities })
    }

    pub fn n_species(&self) -> usize {
        self.counts.dim().0
    }

    pub fn n_areas(&self) -> usize {
        self.counts.dim().1
    }

    pub fn n_bins(&self) -> usize {
        self.counts.dim().2
    }
}

/// FossilRecord — everything produced for one replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FossilRecord {
    /// `(lineages, areas, bins)` occurrence counts (all lineages).
    pub occurrences: Array3<u32>,
    /// `(areas, bins)` locality counts.
    pub localities: Array2<u32>,
    /// Lineages alive per bin, youngest-first.
    pub true_trajectory: Array1<u32>,
    pub settings: SimulationSettings,
}

impl FossilRecord {
    /// One record per sampled fossil.
    pub fn records(&self) -> Vec<OccurrenceRecord> {
        let mut out = Vec::new();
        for ((l, a, b), &n) in self.occurrences.indexed_iter() {
            for _ in 0..n {
                out.push(OccurrenceRecord { lineage_id: l, area_id: a, time_bin_index: b });
            }
        }
        out
    }

    /// Sampling-only view: rows of lineages with at least one occurrence.
    pub fn occurrence_data(&self) -> OccurrenceData {
        let sampled: Vec<usize> = self
            .occurrences
            .outer_iter()
            .enumerate()
            .filter(|(_, m)| m.iter().any(|&n| n > 0))
            .map(|(l, _)| l)
            .collect();
        OccurrenceData {
            counts: self.occurrences.select(Axis(0), &sampled),
            localities: self.localities.clone(),
        }
    }
}

/// PreservationModel — validated fossil-sampling simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct PreservationModel {
    config: PreservationConfig,
    carrying_capacity: Option<CarryingCapacity>,
}

impl PreservationModel {
    pub fn new(config: PreservationConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(PreservationModel { config, carrying_capacity: None })
    }

    pub fn config(&self) -> &PreservationConfig {
        &self.config
    }

    /// Copy of this model that applies `capacity` to origination and
    /// sampling. The masks must match the lineage set passed to `simulate`.
    pub fn with_carrying_capacity(&self, capacity: CarryingCapacity) -> Self {
        PreservationModel { config: self.config.clone(), carrying_capacity: Some(capacity) }
    }

    /// Simulate the fossil record of `lineages`.
    ///
    /// Errors
    /// ------
    /// - `SimError::ShapeMismatch` when an attached carrying capacity does
    ///   not broadcast onto `(lineages, areas, bins)`.
    /// - Distribution construction errors (not expected with a validated
    ///   config).
    pub fn simulate<R: Rng + ?Sized>(
        &self, lineages: &LineageSet, binning: &TimeBinning, areas: &AreaTable, rng: &mut R,
    ) -> SimResult<FossilRecord> {
        let cfg = &self.config;
        let n_lineages = lineages.len();
        let n_areas = areas.n_areas();
        let n_bins = binning.n_bins();
        let capacity = match &self.carrying_capacity {
            Some(cc) => {
                cc.check_shape(n_lineages, n_areas, n_bins)?;
                cc.clone()
            }
            None => CarryingCapacity::unconstrained(n_lineages, n_areas, n_bins),
        };

        let eta = cfg.eta.sample(rng);
        let p_gap = cfg.p_gap.sample(rng);
        let size_concentration = cfg.size_concentration_parameter.sample(rng);
        let link = cfg.link_area_size_carrying_capacity.sample(rng);
        let sp_mean = cfg.sp_mean.sample(rng);
        let singletons_frequency = cfg.singletons_frequency.sample(rng);
        let disp_rate_mean = cfg.disp_rate_mean.sample(rng);

        let geography = simulate_geography(
            lineages,
            binning,
            areas,
            &capacity,
            &GeographyParams {
                size_concentration,
                link,
                slope_mean: cfg.p_origination_a_slope_mean,
                slope_sd: cfg.p_origination_a_slope_sd,
                dispersal_rate: cfg.dispersal_rate,
                disp_rate_mean,
                disp_rate_variance: cfg.disp_rate_variance,
                max_dist: cfg.max_dist,
            },
            rng,
        )?;

        let (temporal_model, time_rate) = self.draw_temporal_model(binning, rng)?;
        let species_rate = Array1::from(
            (0..n_lineages)
                .map(|_| gamma_draw(sp_mean, cfg.sp_variance, rng))
                .collect::<SimResult<Vec<f64>>>()?,
        );
        let area_rate = Array1::from(
            (0..n_areas)
                .map(|_| gamma_draw(cfg.area_mean, cfg.area_variance, rng).map(|r| r / cfg.area_mean))
                .collect::<SimResult<Vec<f64>>>()?,
        );
        let eta_dist = Gamma::new(1.0 / eta, 1.0 / eta)?;
        let gap: Vec<bool> = (0..n_bins).map(|_| rng.gen_bool(p_gap)).collect();

        let c2 = capacity.sp_area_time();
        let mut intensity = Array3::<f64>::zeros((n_lineages, n_areas, n_bins));
        for (l, lineage) in lineages.lineages().iter().enumerate() {
            for a in 0..n_areas {
                let eta_la: f64 = eta_dist.sample(rng);
                let base = species_rate[l] * area_rate[a] * eta_la * geography.area_sizes[a] * n_areas as f64;
                for b in 0..n_bins {
                    if gap[b] || !geography.occupancy[[l, a, b]] {
                        continue;
                    }
                    let time_in_bin = binning.overlap(b, lineage.origination, lineage.end());
                    intensity[[l, a, b]] = base * time_rate[b] * time_in_bin * c2[[l, a, b]];
                }
            }
        }

        for mut row in intensity.outer_iter_mut() {
            if rng.gen_bool(singletons_frequency) {
                let total = row.sum();
                if total > 0.0 {
                    row /= total;
                }
            }
        }

        let mut occurrences = Array3::<u32>::zeros((n_lineages, n_areas, n_bins));
        for (idx, &lam) in intensity.indexed_iter() {
            occurrences[idx] = poisson_count(lam, rng)? as u32;
        }
        let localities = self.draw_localities(&mut occurrences, rng)?;

        let n_sampled_species = occurrences.outer_iter().filter(|m| m.iter().any(|&n| n > 0)).count();
        let n_occurrences = occurrences.iter().map(|&n| u64::from(n)).sum();
        let schedule = lineages.schedule();
        let settings = SimulationSettings {
            time_specific_rate: time_rate.to_vec(),
            species_specific_rate: species_rate.to_vec(),
            area_specific_rate: area_rate.to_vec(),
            area_size: geography.area_sizes.to_vec(),
            n_areas,
            n_bins,
            n_species: n_lineages,
            n_sampled_species,
            tot_br_length: lineages.total_branch_length(),
            n_occurrences,
            temporal_model,
            eta,
            p_gap,
            gap_bins: gap.iter().enumerate().filter(|&(_, &g)| g).map(|(b, _)| b).collect(),
            area_size_concentration_prm: size_concentration,
            link_area_size_carrying_capacity: link,
            singletons_frequency,
            time_bins_duration: binning.durations().to_vec(),
            root_age: lineages.root_age(),
            n_rate_shifts: schedule.n_shifts(),
            events: schedule.events.clone(),
            regime: schedule.regime.clone(),
        };

        Ok(FossilRecord {
            occurrences,
            localities,
            true_trajectory: lineages.range_through_diversity(binning),
            settings,
        })
    }

    // Per-bin sampling rates (youngest-first) and the model that produced them.
    fn draw_temporal_model<R: Rng + ?Sized>(
        &self, binning: &TimeBinning, rng: &mut R,
    ) -> SimResult<(TemporalModel, Array1<f64>)> {
        let cfg = &self.config;
        let intercept = cfg.intercept.sample(rng);
        let max_age = binning.max_age();
        let min_age = binning.min_age();
        let mid = binning.midpoints();

        if rng.gen_bool(cfg.fraction_skyline_sampling) {
            let n_epochs = 1 + poisson_count(cfg.mean_n_epochs_skyline - 1.0, rng)? as usize;
            let mut epoch_starts: Vec<f64> = std::iter::once(max_age)
                .chain((1..n_epochs).map(|_| rng.gen_range(min_age..max_age)))
                .collect();
            epoch_starts.sort_by(|a, b| b.total_cmp(a));
            let noise = noise_dist(cfg.sd_through_time_skyline)?;
            let epoch_rates: Vec<f64> = epoch_starts
                .iter()
                .map(|_| intercept * noise.as_ref().map_or(0.0, |n| n.sample(rng)).exp())
                .collect();
            let rates = mid.mapv(|m| {
                let epoch = epoch_starts.iter().rposition(|&s| s >= m).unwrap_or(0);
                epoch_rates[epoch]
            });
            Ok((TemporalModel::Skyline { epoch_starts, epoch_rates }, rates))
        } else {
            let slope = cfg.slope.sample(rng);
            let sd = cfg.sd_through_time.sample(rng);
            let noise = noise_dist(sd)?;
            let rates = mid.mapv(|m| {
                let jitter = noise.as_ref().map_or(0.0, |n| n.sample(rng));
                intercept * (slope * (max_age - m) + jitter).exp()
            });
            Ok((TemporalModel::LogLinear { slope, intercept, sd }, rates))
        }
    }

    // Locality counts per (area, bin); enforces the per-bin cap by thinning.
    fn draw_localities<R: Rng + ?Sized>(
        &self, occurrences: &mut Array3<u32>, rng: &mut R,
    ) -> SimResult<Array2<u32>> {
        let (_, n_areas, n_bins) = occurrences.dim();
        let p_new = self.config.p_new_locality;
        let cap = self.config.maximum_localities_per_bin as f64;
        let mut localities = Array2::<u32>::zeros((n_areas, n_bins));
        for ((a, b), loc) in localities.indexed_iter_mut() {
            let n_occ: u64 = occurrences.slice(ndarray::s![.., a, b]).iter().map(|&n| u64::from(n)).sum();
            if n_occ > 0 {
                let extra: f64 = Binomial::new(p_new, n_occ - 1)?.sample(rng);
                *loc = 1 + extra as u32;
            }
        }

        for b in 0..n_bins {
            let total: f64 = localities.column(b).iter().map(|&n| f64::from(n)).sum();
            if total <= cap {
                continue;
            }
            let keep = cap / total;
            for a in 0..n_areas {
                let scaled = (f64::from(localities[[a, b]]) * keep).floor() as u32;
                let mut remaining = 0u32;
                for n in occurrences.slice_mut(ndarray::s![.., a, b]).iter_mut() {
                    if *n > 0 {
                        *n = if scaled == 0 {
                            0
                        } else {
                            let kept: f64 = Binomial::new(keep, u64::from(*n))?.sample(rng);
                            kept as u32
                        };
                        remaining += *n;
                    }
                }
                localities[[a, b]] = scaled.min(remaining);
            }
        }
        Ok(localities)
    }
}

fn noise_dist(sd: f64) -> SimResult<Option<Normal>> {
    if sd > 0.0 {
        Ok(Some(Normal::new(0.0, sd)?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::birth_death::{BirthDeathConfig, BirthDeathSimulator};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Occurrences respecting area availability, lifespans and gap bins.
    // - Locality cap and locality/occurrence consistency.
    // - Determinism and the sampling-only view.
    //
    // They intentionally DO NOT cover:
    // - Statistical calibration of the intensity components.
    // -------------------------------------------------------------------------

    fn lineages(seed: u64) -> LineageSet {
        let config = BirthDeathConfig {
            s_species: ParamRange::new("s_species", 10.0, 50.0).unwrap(),
            root_r: ParamRange::fixed("root_r", 30.0).unwrap(),
            range_sp: ParamRange::new("range_sp", 0.0, 10000.0).unwrap(),
            min_extant_sp: 5,
            ..BirthDeathConfig::default()
        };
        BirthDeathSimulator::new(config).unwrap().simulate(seed).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Verify the structural guarantees of a simulated fossil record.
    //
    // Given
    // -----
    // - Bins [0, 10, 20, 30]; area 1 appears at 15 Ma; 10 replicates.
    //
    // Expect
    // ------
    // - No occurrences in area 1 during bin 2 or in bins the lineage missed.
    // - Gap bins are empty.
    // - Localities > 0 exactly where occurrences exist and the per-bin cap
    //   holds.
    // - The true trajectory equals range-through diversity.
    fn fossil_record_respects_structure() {
        // Arrange
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        let areas = AreaTable::from_rows(&[[0.0, -1.0, -1.0], [1.0, 15.0, -1.0]]).unwrap();
        let config = PreservationConfig { maximum_localities_per_bin: 40, ..PreservationConfig::default() };
        let model = PreservationModel::new(config).unwrap();
        let mid = binning.midpoints();

        for seed in 0..10 {
            let set = lineages(seed);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            // Act
            let record = model.simulate(&set, &binning, &areas, &mut rng).unwrap();

            // Assert
            for r in record.records() {
                assert!(areas.exists(r.area_id, mid[r.time_bin_index]));
                let l = set.lineages()[r.lineage_id];
                let lived = binning.overlap(r.time_bin_index, l.origination, l.end()) > 0.0;
                assert!(lived);
                assert!(!record.settings.gap_bins.contains(&r.time_bin_index));
            }
            for b in 0..3 {
                assert!(record.localities.column(b).sum() <= 40);
                for a in 0..2 {
                    let occ: u32 = record.occurrences.slice(ndarray::s![.., a, b]).sum();
                    assert_eq!(occ > 0, record.localities[[a, b]] > 0);
                }
            }
            assert_eq!(record.true_trajectory, set.range_through_diversity(&binning));
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure `p_gap = 1` yields an empty record while the trajectory is
    // unaffected.
    fn full_gap_probability_removes_all_occurrences() {
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        let areas = AreaTable::always_present(2).unwrap();
        let config =
            PreservationConfig { p_gap: ParamRange::fixed("p_gap", 1.0).unwrap(), ..PreservationConfig::default() };
        let model = PreservationModel::new(config).unwrap();
        let set = lineages(3);

        let record = model.simulate(&set, &binning, &areas, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();

        assert_eq!(record.occurrences.sum(), 0);
        assert_eq!(record.localities.sum(), 0);
        assert_eq!(record.settings.gap_bins, vec![0, 1, 2]);
        assert!(record.true_trajectory.iter().all(|&n| n > 0));
        assert_eq!(record.occurrence_data().n_species(), 0);
    }

    #[test]
    // Purpose
    // -------
    // Verify identical seeds give identical records and the sampling-only
    // view keeps exactly the sampled lineages.
    fn simulate_is_deterministic_and_view_keeps_sampled_rows() {
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        let areas = AreaTable::always_present(2).unwrap();
        let config = PreservationConfig { p_gap: ParamRange::fixed("p_gap", 0.0).unwrap(), ..PreservationConfig::default() };
        let model = PreservationModel::new(config).unwrap();
        let set = lineages(5);

        let a = model.simulate(&set, &binning, &areas, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let b = model.simulate(&set, &binning, &areas, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let view = a.occurrence_data();

        assert_eq!(a, b);
        assert_eq!(view.n_species(), a.settings.n_sampled_species);
        assert_eq!(u64::from(view.counts.sum()), a.settings.n_occurrences);
        assert_eq!(view.localities, a.localities);
    }

    #[test]
    // Purpose
    // -------
    // Ensure records round-trip into `OccurrenceData` and out-of-range
    // records are rejected.
    fn occurrence_data_from_records_counts_and_validates() {
        let records = vec![
            OccurrenceRecord { lineage_id: 0, area_id: 1, time_bin_index: 2 },
            OccurrenceRecord { lineage_id: 0, area_id: 1, time_bin_index: 2 },
            OccurrenceRecord { lineage_id: 1, area_id: 0, time_bin_index: 0 },
        ];
        let data = OccurrenceData::from_records(&records, 2, 2, 3).unwrap();
        assert_eq!(data.counts[[0, 1, 2]], 2);
        assert_eq!(data.localities[[1, 2]], 2);
        assert_eq!(data.localities[[0, 0]], 1);

        let bad = [OccurrenceRecord { lineage_id: 0, area_id: 5, time_bin_index: 0 }];
        assert!(matches!(OccurrenceData::from_records(&bad, 1, 2, 3), Err(SimError::ShapeMismatch { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Ensure invalid probabilities fail at construction.
    fn new_rejects_invalid_probability() {
        let config = PreservationConfig { p_new_locality: 2.0, ..PreservationConfig::default() };
        assert!(matches!(PreservationModel::new(config), Err(SimError::InvalidProbability { .. })));
    }
}
