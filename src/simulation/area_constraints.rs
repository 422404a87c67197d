//! Carrying-capacity masks coupling areas to origination and sampling.
//!
//! Two multiplier arrays gate where lineages may originate and where they may
//! be sampled:
//! - `species_origin` with shape `(n_lineages, n_areas)`: scales the weight of
//!   each area as a lineage's origin.
//! - `sp_area_time` with shape `(n_lineages, n_areas, n_bins)`: scales the
//!   sampling intensity of a lineage in an area during a bin.
//!
//! They are either supplied externally ([`CarryingCapacity::new`]) or derived
//! from an [`AreaTable`] ([`CarryingCapacity::from_area_table`]). Values are
//! non-negative; zero forbids origination / sampling.
use crate::simulation::{
    birth_death::LineageSet,
    errors::{SimError, SimResult},
    time_bins::{AreaTable, TimeBinning},
};
use ndarray::{Array2, Array3};

/// CarryingCapacity — origination and sampling multipliers per area.
#[derive(Debug, Clone, PartialEq)]
pub struct CarryingCapacity {
    species_origin: Array2<f64>,
    sp_area_time: Array3<f64>,
}

impl CarryingCapacity {
    /// Wrap externally supplied multipliers.
    ///
    /// Errors
    /// ------
    /// - `SimError::ShapeMismatch` when the two arrays disagree on the number
    ///   of lineages or areas.
    /// - `SimError::InvalidParameter` when any entry is negative or non-finite.
    pub fn new(species_origin: Array2<f64>, sp_area_time: Array3<f64>) -> SimResult<Self> {
        let (n_sp, n_areas) = species_origin.dim();
        let (t_sp, t_areas, n_bins) = sp_area_time.dim();
        if (n_sp, n_areas) != (t_sp, t_areas) {
            return Err(SimError::ShapeMismatch {
                name: "sp_area_time",
                expected: vec![n_sp, n_areas, n_bins],
                found: vec![t_sp, t_areas, n_bins],
            });
        }
        if let Some(&bad) =
            species_origin.iter().chain(sp_area_time.iter()).find(|v| !v.is_finite() || **v < 0.0)
        {
            return Err(SimError::InvalidParameter {
                name: "carrying_capacity",
                value: bad,
                reason: "Multipliers must be finite and >= 0.",
            });
        }
        Ok(CarryingCapacity { species_origin, sp_area_time })
    }

    /// All-ones multipliers (no constraint).
    pub fn unconstrained(n_lineages: usize, n_areas: usize, n_bins: usize) -> Self {
        CarryingCapacity {
            species_origin: Array2::ones((n_lineages, n_areas)),
            sp_area_time: Array3::ones((n_lineages, n_areas, n_bins)),
        }
    }

    /// Derive multipliers from area availability.
    ///
    /// `species_origin[l, a] = 1` when area `a` exists at the origination age
    /// of lineage `l`; `sp_area_time[l, a, b] = 1` when area `a` exists at the
    /// midpoint of bin `b`. Everything else is 0.
    pub fn from_area_table(lineages: &LineageSet, binning: &TimeBinning, areas: &AreaTable) -> Self {
        let n_areas = areas.n_areas();
        let mid = binning.midpoints();
        let species_origin = Array2::from_shape_fn((lineages.len(), n_areas), |(l, a)| {
            f64::from(u8::from(areas.exists(a, lineages.lineages()[l].origination)))
        });
        let sp_area_time = Array3::from_shape_fn((lineages.len(), n_areas, binning.n_bins()), |(_, a, b)| {
            f64::from(u8::from(areas.exists(a, mid[b])))
        });
        CarryingCapacity { species_origin, sp_area_time }
    }

    pub fn species_origin(&self) -> &Array2<f64> {
        &self.species_origin
    }

    pub fn sp_area_time(&self) -> &Array3<f64> {
        &self.sp_area_time
    }

    /// Verify the multipliers broadcast onto a `(lineages, areas, bins)`
    /// intensity tensor.
    pub fn check_shape(&self, n_lineages: usize, n_areas: usize, n_bins: usize) -> SimResult<()> {
        let found = self.sp_area_time.dim();
        if found != (n_lineages, n_areas, n_bins) {
            return Err(SimError::ShapeMismatch {
                name: "carrying_capacity",
                expected: vec![n_lineages, n_areas, n_bins],
                found: vec![found.0, found.1, found.2],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{
        birth_death::Lineage,
        rates::{RateProcess, RateProcessConfig},
    };
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Derivation of both masks from an area table.
    // - Shape and value validation of externally supplied masks.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify masks derived from an area that appears at 15 Ma.
    //
    // Given
    // -----
    // - Bins [0, 10, 20, 30]; area 0 always present, area 1 from 15 Ma.
    // - Lineage 0 originating at 25 Ma, lineage 1 at 12 Ma.
    //
    // Expect
    // ------
    // - Lineage 0 may only originate in area 0; lineage 1 in both.
    // - Area 1 is masked in bin 2 (midpoint 25) and open in bins 0 and 1.
    fn from_area_table_masks_absent_areas() {
        // Arrange
        let binning = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        let areas = AreaTable::from_rows(&[[0.0, -1.0, -1.0], [1.0, 15.0, -1.0]]).unwrap();
        let schedule = RateProcess::new(RateProcessConfig::default())
            .unwrap()
            .generate(30.0, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        let set = LineageSet::from_parts(
            vec![
                Lineage { id: 0, origination: 25.0, extinction: None, parent: None },
                Lineage { id: 1, origination: 12.0, extinction: None, parent: Some(0) },
            ],
            30.0,
            schedule,
        );

        // Act
        let cc = CarryingCapacity::from_area_table(&set, &binning, &areas);

        // Assert
        assert_eq!(cc.species_origin().row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(cc.species_origin().row(1).to_vec(), vec![1.0, 1.0]);
        assert_eq!(cc.sp_area_time()[[0, 1, 2]], 0.0);
        assert_eq!(cc.sp_area_time()[[0, 1, 1]], 1.0);
        assert_eq!(cc.sp_area_time()[[1, 1, 0]], 1.0);
        assert!(cc.check_shape(2, 2, 3).is_ok());
        assert!(cc.check_shape(3, 2, 3).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Ensure mismatched or negative external masks are rejected.
    fn new_rejects_mismatched_or_negative_masks() {
        let mismatched = CarryingCapacity::new(Array2::ones((3, 2)), Array3::ones((2, 2, 4)));
        let mut negative = Array3::ones((3, 2, 4));
        negative[[0, 0, 0]] = -1.0;
        let negative = CarryingCapacity::new(Array2::ones((3, 2)), negative);

        assert!(matches!(mismatched, Err(SimError::ShapeMismatch { .. })));
        assert!(matches!(negative, Err(SimError::InvalidParameter { .. })));
    }
}
