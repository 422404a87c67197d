//! Feature extraction — per-bin sampling summaries and diversity labels.
//!
//! Purpose
//! -------
//! Reduce occurrence data (simulated or empirical) to a fixed-shape
//! `(n_bins, n_features)` tensor, and lineage sets to the matching label
//! trajectory.
//!
//! Key behaviors
//! -------------
//! - Feature columns, per bin (youngest-first):
//!   0. `n_occurrences`: total occurrences,
//!   1. `n_sampled_species`: species with at least one occurrence,
//!   2. `n_singletons`: species with exactly one occurrence,
//!   3. `n_endemics`: species sampled in exactly one area,
//!   4. `n_sampled_areas`: areas with at least one occurrence,
//!   5. `n_range_through`: species whose sampled range spans the bin,
//!   6. `sampled_branch_length`: summed sampled ranges (Myr) of the species
//!      occurring in the bin,
//!   7. `n_localities`: total localities,
//!   8. `bin_duration`,
//!
//!   followed by `n_areas` per-area species counts and `n_areas` per-area
//!   locality counts.
//! - Labels are range-through true diversity; [`normalize_labels`] applies
//!   `ln(y + 1)` and [`denormalize_labels`] inverts it.
//!
//! Invariants & assumptions
//! ------------------------
//! - Extraction is a pure function of the occurrence data and the binning:
//!   it never reads the true lineage set, so simulated and empirical inputs
//!   go through the same code path.
//! - `n_features = 9 + 2 · n_areas`; the layout is fixed by [`FeatureLayout`]
//!   and checked wherever tensors meet.
use crate::{
    features::errors::{FeatureError, FeatureResult},
    simulation::{birth_death::LineageSet, preservation::OccurrenceData, time_bins::TimeBinning},
};
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Number of area-independent feature columns.
pub const N_BASE_FEATURES: usize = 9;

const BASE_NAMES: [&str; N_BASE_FEATURES] = [
    "n_occurrences",
    "n_sampled_species",
    "n_singletons",
    "n_endemics",
    "n_sampled_areas",
    "n_range_through",
    "sampled_branch_length",
    "n_localities",
    "bin_duration",
];

/// FeatureLayout — the column layout shared by training and inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub n_areas: usize,
}

impl FeatureLayout {
    pub fn new(n_areas: usize) -> Self {
        FeatureLayout { n_areas }
    }

    pub fn n_features(&self) -> usize {
        N_BASE_FEATURES + 2 * self.n_areas
    }

    /// Column names in order.
    pub fn names(&self) -> Vec<String> {
        BASE_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain((0..self.n_areas).map(|a| format!("n_species_area_{a}")))
            .chain((0..self.n_areas).map(|a| format!("n_localities_area_{a}")))
            .collect()
    }

    /// Verify a tensor's feature count against the layout.
    pub fn check(&self, n_features: usize) -> FeatureResult<()> {
        if n_features != self.n_features() {
            return Err(FeatureError::DimensionMismatch {
                context: "feature layout",
                expected: self.n_features(),
                found: n_features,
            });
        }
        Ok(())
    }
}

/// Extract the `(n_bins, n_features)` tensor of one dataset.
///
/// Parameters
/// ----------
/// - `data`: occurrence counts `(species, areas, bins)` and localities
///   `(areas, bins)`.
/// - `binning`: the time bins the data were aggregated over.
///
/// Errors
/// ------
/// - `FeatureError::DimensionMismatch` when the data's bin count differs
///   from `binning`.
pub fn extract_features(data: &OccurrenceData, binning: &TimeBinning) -> FeatureResult<Array2<f64>> {
    let n_bins = binning.n_bins();
    if data.n_bins() != n_bins {
        return Err(FeatureError::DimensionMismatch {
            context: "occurrence bins",
            expected: n_bins,
            found: data.n_bins(),
        });
    }
    let n_areas = data.n_areas();
    let layout = FeatureLayout::new(n_areas);
    let durations = binning.durations();
    let edges = binning.edges();

    // species × bins totals
    let per_bin = data.counts.sum_axis(Axis(1));
    // (youngest, oldest) sampled bin per species
    let ranges: Vec<Option<(usize, usize)>> = per_bin
        .outer_iter()
        .map(|row| {
            let young = row.iter().position(|&n| n > 0)?;
            let old = row.iter().rposition(|&n| n > 0)?;
            Some((young, old))
        })
        .collect();
    let sampled_span: Vec<f64> =
        ranges.iter().map(|r| r.map_or(0.0, |(young, old)| edges[old + 1] - edges[young])).collect();

    let mut features = Array2::<f64>::zeros((n_bins, layout.n_features()));
    for b in 0..n_bins {
        let mut row = features.row_mut(b);
        let column = per_bin.column(b);
        row[0] = column.iter().map(|&n| f64::from(n)).sum();
        row[1] = column.iter().filter(|&&n| n > 0).count() as f64;
        row[2] = column.iter().filter(|&&n| n == 1).count() as f64;
        row[3] = data
            .counts
            .outer_iter()
            .filter(|sp| sp.column(b).iter().filter(|&&n| n > 0).count() == 1)
            .count() as f64;
        row[4] = (0..n_areas).filter(|&a| data.counts.slice(ndarray::s![.., a, b]).sum() > 0).count() as f64;
        row[5] = ranges.iter().flatten().filter(|&&(young, old)| young <= b && b <= old).count() as f64;
        row[6] = column.iter().zip(&sampled_span).filter(|(&n, _)| n > 0).map(|(_, &s)| s).sum();
        row[7] = data.localities.column(b).iter().map(|&n| f64::from(n)).sum();
        row[8] = durations[b];
        for a in 0..n_areas {
            let species_in_area =
                data.counts.slice(ndarray::s![.., a, b]).iter().filter(|&&n| n > 0).count();
            row[N_BASE_FEATURES + a] = species_in_area as f64;
            row[N_BASE_FEATURES + n_areas + a] = f64::from(data.localities[[a, b]]);
        }
    }
    Ok(features)
}

/// True range-through diversity per bin, as `f64` labels.
pub fn label_trajectory(lineages: &LineageSet, binning: &TimeBinning) -> Array1<f64> {
    lineages.range_through_diversity(binning).mapv(f64::from)
}

/// `ln(y + 1)` elementwise.
pub fn normalize_labels<S, D>(labels: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    labels.mapv(f64::ln_1p)
}

/// Inverse of [`normalize_labels`]: `exp(z) - 1` elementwise.
pub fn denormalize_labels<S, D>(normalized: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    normalized.mapv(f64::exp_m1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array3};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Every feature column on a hand-built occurrence tensor.
    // - Layout checks and label normalization.
    //
    // They intentionally DO NOT cover:
    // - Simulated inputs; the integration tests exercise those shapes.
    // -------------------------------------------------------------------------

    fn data() -> OccurrenceData {
        // species 0: 1 occurrence in area 0 bin 0, 2 in area 1 bin 2
        // species 1: 1 occurrence in area 0 bin 1 and 1 in area 1 bin 1
        let mut counts = Array3::<u32>::zeros((2, 2, 3));
        counts[[0, 0, 0]] = 1;
        counts[[0, 1, 2]] = 2;
        counts[[1, 0, 1]] = 1;
        counts[[1, 1, 1]] = 1;
        let localities = array![[1, 1, 0], [0, 1, 1]];
        OccurrenceData::new(counts, localities).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Verify every column on a hand-computed example.
    //
    // Given
    // -----
    // - Bins [0, 10, 20, 30] and the two-species, two-area tensor above.
    //
    // Expect
    // ------
    // - Bin 0: 1 occurrence, 1 species, 1 singleton, 1 endemic, 1 area,
    //   range-through 1 (species 0 spans bins 0–2), branch length 30.
    // - Bin 1: 2 occurrences, 1 species, 0 singletons, 0 endemics, 2 areas,
    //   range-through 2, branch length 10.
    // - Per-area blocks match the tensor.
    fn extract_features_matches_hand_counts() {
        // Arrange
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();

        // Act
        let x = extract_features(&data(), &binning).unwrap();

        // Assert
        assert_eq!(x.dim(), (3, 13));
        assert_eq!(x.row(0).slice(ndarray::s![..9]).to_vec(), vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 30.0, 1.0, 10.0]);
        assert_eq!(x.row(1).slice(ndarray::s![..9]).to_vec(), vec![2.0, 1.0, 0.0, 0.0, 2.0, 2.0, 10.0, 2.0, 10.0]);
        assert_eq!(x.row(2).slice(ndarray::s![..9]).to_vec(), vec![2.0, 1.0, 0.0, 1.0, 1.0, 1.0, 30.0, 1.0, 10.0]);
        assert_eq!(x.row(1).slice(ndarray::s![9..]).to_vec(), vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(x.row(2).slice(ndarray::s![9..]).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    // Purpose
    // -------
    // Ensure bin-count disagreement is a `DimensionMismatch`.
    fn extract_features_rejects_wrong_bin_count() {
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0]).unwrap();
        let result = extract_features(&data(), &binning);
        assert!(matches!(result, Err(FeatureError::DimensionMismatch { expected: 2, found: 3, .. })));
    }

    #[test]
    // Purpose
    // -------
    // Verify layout size, names and checking.
    fn feature_layout_counts_and_checks() {
        let layout = FeatureLayout::new(2);
        assert_eq!(layout.n_features(), 13);
        assert_eq!(layout.names().len(), 13);
        assert_eq!(layout.names()[9], "n_species_area_0");
        assert!(layout.check(13).is_ok());
        assert!(layout.check(11).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Check the log transform and its inverse.
    fn label_normalization_inverts() {
        let y = array![0.0, 9.0, 120.0];
        let z = normalize_labels(&y);
        assert_relative_eq!(z[1], 10f64.ln(), epsilon = 1e-12);
        let back = denormalize_labels(&z);
        for (a, b) in back.iter().zip(y.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}
