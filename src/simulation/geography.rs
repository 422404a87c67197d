//! Geography — area sizes, origin areas and dispersal-driven occupancy.
//!
//! Purpose
//! -------
//! Place every lineage of a replicate in space: draw relative area sizes,
//! pick each lineage's origin area, and let lineages spread to nearby areas
//! through time. The resulting occupancy tensor gates where the preservation
//! model may produce occurrences.
//!
//! Key behaviors
//! -------------
//! - Area sizes are a Dirichlet split: independent `Gamma(c, 1)` draws
//!   normalized to sum to 1, with concentration `c` drawn per replicate.
//! - Origin weights are `size_a^link · exp(slope_a · τ) · c1[l, a]`, where
//!   `τ` is the lineage's origination age relative to the oldest bin edge and
//!   `slope_a ~ Normal(slope_mean, slope_sd)` per area. Areas absent at the
//!   origination age get weight 0.
//! - Dispersal: each lineage has a rate `d` (fixed, or Gamma with the
//!   configured mean and variance). Moving from the oldest bin to the
//!   youngest, every uncolonized area within `max_dist` of a colonized area
//!   is colonized with probability `1 - exp(-d · t)`, `t` the time the lineage
//!   spends in the bin.
//!
//! Conventions
//! -----------
//! - Areas are arranged on a line; the distance between areas `i` and `j`
//!   is `|i - j|`.
//! - Occupancy `[l, a, b]` is `true` only when the lineage lives in bin `b`,
//!   has colonized area `a`, the area exists at the bin midpoint, and
//!   `c2[l, a, b] > 0`.
use crate::simulation::{
    area_constraints::CarryingCapacity,
    birth_death::LineageSet,
    errors::SimResult,
    ranges::gamma_draw,
    time_bins::{AreaTable, TimeBinning},
};
use ndarray::{Array1, Array3};
use rand::{distributions::Distribution, Rng};
use statrs::distribution::{Gamma, Normal};

/// Per-replicate geography parameters, already drawn from their ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographyParams {
    pub size_concentration: f64,
    pub link: f64,
    pub slope_mean: f64,
    pub slope_sd: f64,
    pub dispersal_rate: Option<f64>,
    pub disp_rate_mean: f64,
    pub disp_rate_variance: f64,
    pub max_dist: f64,
}

/// Geography — the spatial layout of one replicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Geography {
    /// Relative area sizes (sum to 1).
    pub area_sizes: Array1<f64>,
    /// Origination slope per area.
    pub origination_slopes: Array1<f64>,
    /// Origin area per lineage; `None` when no area was available.
    pub origin_area: Vec<Option<usize>>,
    /// Dispersal rate per lineage.
    pub dispersal_rates: Array1<f64>,
    /// `(lineages, areas, bins)` occupancy.
    pub occupancy: Array3<bool>,
}

/// Draw the geography of a replicate.
///
/// Errors
/// ------
/// - `SimError::ShapeMismatch` when `capacity` does not match the lineage
///   set, area table and binning.
/// - Distribution construction errors for degenerate Gamma/Normal parameters.
pub fn simulate_geography<R: Rng + ?Sized>(
    lineages: &LineageSet, binning: &TimeBinning, areas: &AreaTable, capacity: &CarryingCapacity,
    params: &GeographyParams, rng: &mut R,
) -> SimResult<Geography> {
    let n_areas = areas.n_areas();
    let n_bins = binning.n_bins();
    let n_lineages = lineages.len();
    capacity.check_shape(n_lineages, n_areas, n_bins)?;

    let area_sizes = dirichlet_split(n_areas, params.size_concentration, rng)?;
    let origination_slopes = if params.slope_sd > 0.0 {
        let slope_dist = Normal::new(params.slope_mean, params.slope_sd)?;
        Array1::<f64>::from_iter((0..n_areas).map(|_| slope_dist.sample(rng)))
    } else {
        Array1::from_elem(n_areas, params.slope_mean)
    };

    let max_age = binning.max_age();
    let mid = binning.midpoints();
    let c1 = capacity.species_origin();
    let c2 = capacity.sp_area_time();

    let mut origin_area = Vec::with_capacity(n_lineages);
    let mut dispersal_rates = Array1::<f64>::zeros(n_lineages);
    let mut occupancy = Array3::from_elem((n_lineages, n_areas, n_bins), false);
    for (l, lineage) in lineages.lineages().iter().enumerate() {
        let tau = (lineage.origination / max_age).min(1.0);
        let weights: Vec<f64> = (0..n_areas)
            .map(|a| {
                if !areas.exists(a, lineage.origination) {
                    return 0.0;
                }
                area_sizes[a].powf(params.link) * (origination_slopes[a] * tau).exp() * c1[[l, a]]
            })
            .collect();
        let origin = pick_weighted(&weights, rng);
        origin_area.push(origin);

        let rate = match params.dispersal_rate {
            Some(d) => d,
            None if params.disp_rate_mean > 0.0 => {
                gamma_draw(params.disp_rate_mean, params.disp_rate_variance, rng)?
            }
            None => 0.0,
        };
        dispersal_rates[l] = rate;

        let Some(origin) = origin else { continue };
        let mut colonized = vec![false; n_areas];
        colonized[origin] = true;
        for b in (0..n_bins).rev() {
            let time_in_bin = binning.overlap(b, lineage.origination, lineage.end());
            let (young, _) = binning.bounds(b);
            let alive = time_in_bin > 0.0 || (lineage.is_extant() && young <= 0.0);
            if !alive {
                continue;
            }
            if rate > 0.0 {
                let p_colonize = 1.0 - (-rate * time_in_bin).exp();
                let reachable: Vec<usize> = (0..n_areas)
                    .filter(|&a| !colonized[a] && areas.exists(a, mid[b]))
                    .filter(|&a| {
                        colonized
                            .iter()
                            .enumerate()
                            .any(|(c, &on)| on && (a.abs_diff(c) as f64) <= params.max_dist)
                    })
                    .collect();
                for a in reachable {
                    if rng.gen_bool(p_colonize) {
                        colonized[a] = true;
                    }
                }
            }
            for a in 0..n_areas {
                occupancy[[l, a, b]] = colonized[a] && areas.exists(a, mid[b]) && c2[[l, a, b]] > 0.0;
            }
        }
    }

    Ok(Geography { area_sizes, origination_slopes, origin_area, dispersal_rates, occupancy })
}

fn dirichlet_split<R: Rng + ?Sized>(n: usize, concentration: f64, rng: &mut R) -> SimResult<Array1<f64>> {
    let gamma = Gamma::new(concentration, 1.0)?;
    let draws = Array1::<f64>::from_iter((0..n).map(|_| gamma.sample(rng)));
    let total = draws.sum();
    if total > 0.0 && total.is_finite() {
        Ok(draws / total)
    } else {
        Ok(Array1::from_elem(n, 1.0 / n as f64))
    }
}

fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    let target = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        acc += w;
        if target < acc {
            return Some(i);
        }
    }
    weights.iter().rposition(|&w| w > 0.0)
}
