//! Time binning and area availability tables.
//!
//! Purpose
//! -------
//! Provide the two read-only structural inputs shared by every replicate in a
//! simulation batch: the geological time bins over which occurrences and
//! diversity are aggregated ([`TimeBinning`]) and the table describing when
//! each geographic area exists ([`AreaTable`]).
//!
//! Key behaviors
//! -------------
//! - [`TimeBinning::new`] accepts bin edges in any order (the analysis
//!   scripts list them oldest-to-youngest), sorts them, and rejects duplicates,
//!   negative ages and fewer than two edges.
//! - Bins are indexed **youngest-first**: bin 0 is `[edges[0], edges[1])`
//!   with `edges[0]` the youngest boundary (usually 0, the present).
//! - [`AreaTable`] records an optional appearance and disappearance age per
//!   area; the sentinel `-1` in the tabular form means "always present".
//!
//! Invariants & assumptions
//! ------------------------
//! - `edges` is strictly increasing in age; `n_bins = edges.len() - 1 >= 1`.
//! - Every per-bin array in the crate has exactly `n_bins` entries in the
//!   same youngest-first order.
//! - An area with `appears_at = Some(a)` exists for ages `<= a`; with
//!   `disappears_at = Some(d)` it exists for ages `>= d`.
//!
//! Testing notes
//! -------------
//! - Unit tests cover edge sorting, bin lookup at boundaries, midpoint and
//!   duration computation, and area existence with both sentinels.
use crate::simulation::errors::{SimError, SimResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// TimeBinning — strictly increasing bin edges (ages), youngest-first bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBinning {
    edges: Vec<f64>,
}

impl TimeBinning {
    /// Build a binning from edges given in any order.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidTimeBins` when fewer than two edges are given, an
    ///   edge is non-finite or negative, or two edges coincide.
    pub fn new(edges: &[f64]) -> SimResult<Self> {
        if edges.len() < 2 {
            return Err(SimError::InvalidTimeBins { reason: "at least two bin edges are required" });
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(SimError::InvalidTimeBins { reason: "bin edges must be finite" });
        }
        if edges.iter().any(|&e| e < 0.0) {
            return Err(SimError::InvalidTimeBins { reason: "bin edges must be ages >= 0" });
        }
        let mut sorted = edges.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        if sorted.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimError::InvalidTimeBins { reason: "bin edges must be distinct" });
        }
        Ok(TimeBinning { edges: sorted })
    }

    /// Equal-width bins spanning `[0, max_age]`.
    pub fn regular(max_age: f64, n_bins: usize) -> SimResult<Self> {
        if n_bins == 0 || !max_age.is_finite() || max_age <= 0.0 {
            return Err(SimError::InvalidTimeBins {
                reason: "regular binning needs n_bins >= 1 and a positive max age",
            });
        }
        let width = max_age / n_bins as f64;
        let edges: Vec<f64> = (0..=n_bins).map(|i| i as f64 * width).collect();
        TimeBinning::new(&edges)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Sorted edges (youngest first).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Youngest boundary (usually 0).
    pub fn min_age(&self) -> f64 {
        self.edges[0]
    }

    /// Oldest boundary.
    pub fn max_age(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// `(young, old)` boundaries of bin `b`.
    pub fn bounds(&self, b: usize) -> (f64, f64) {
        (self.edges[b], self.edges[b + 1])
    }

    /// Bin durations, youngest-first.
    pub fn durations(&self) -> Array1<f64> {
        Array1::from_iter(self.edges.windows(2).map(|w| w[1] - w[0]))
    }

    /// Bin midpoints, youngest-first.
    pub fn midpoints(&self) -> Array1<f64> {
        Array1::from_iter(self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])))
    }

    /// Bin containing `age`, using half-open `[young, old)` intervals; the
    /// oldest edge maps to the last bin. `None` outside the binned span.
    pub fn bin_of(&self, age: f64) -> Option<usize> {
        if age < self.min_age() || age > self.max_age() {
            return None;
        }
        let idx = self.edges.partition_point(|&e| e <= age);
        Some(idx.saturating_sub(1).min(self.n_bins() - 1))
    }

    /// Time a lineage living over `[extinction, origination]` (ages) spends in
    /// bin `b`.
    pub fn overlap(&self, b: usize, origination: f64, extinction: f64) -> f64 {
        let (young, old) = self.bounds(b);
        (origination.min(old) - extinction.max(young)).max(0.0)
    }
}

/// Availability span of one geographic area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaSpan {
    /// Area identifier.
    pub id: usize,
    /// Age at which the area appears (`None` = present from the beginning).
    pub appears_at: Option<f64>,
    /// Age at which the area disappears (`None` = persists to the present).
    pub disappears_at: Option<f64>,
}

impl AreaSpan {
    /// `true` when the area exists at `age`.
    pub fn exists_at(&self, age: f64) -> bool {
        let appeared = self.appears_at.map_or(true, |a| age <= a);
        let not_gone = self.disappears_at.map_or(true, |d| age >= d);
        appeared && not_gone
    }
}

/// AreaTable — one [`AreaSpan`] per area, indexed by area id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaTable {
    areas: Vec<AreaSpan>,
}

impl AreaTable {
    /// Table with `n_areas` areas that always exist.
    pub fn always_present(n_areas: usize) -> SimResult<Self> {
        AreaTable::new(
            (0..n_areas)
                .map(|id| AreaSpan { id, appears_at: None, disappears_at: None })
                .collect(),
        )
    }

    /// Build a table from spans.
    ///
    /// Errors
    /// ------
    /// - `SimError::InvalidAreaTable` when the table is empty, ids are not
    ///   `0..n`, a span disappears before it appears, or no area exists
    ///   from the beginning (lineages would have nowhere to originate).
    pub fn new(areas: Vec<AreaSpan>) -> SimResult<Self> {
        if areas.is_empty() {
            return Err(SimError::InvalidAreaTable { row: 0, reason: "table has no areas" });
        }
        for (row, span) in areas.iter().enumerate() {
            if span.id != row {
                return Err(SimError::InvalidAreaTable { row, reason: "area ids must be 0..n in order" });
            }
            if let (Some(a), Some(d)) = (span.appears_at, span.disappears_at) {
                if d > a {
                    return Err(SimError::InvalidAreaTable {
                        row,
                        reason: "area disappears before it appears",
                    });
                }
            }
            let bad = |v: Option<f64>| v.is_some_and(|x| !x.is_finite() || x < 0.0);
            if bad(span.appears_at) || bad(span.disappears_at) {
                return Err(SimError::InvalidAreaTable { row, reason: "ages must be finite and >= 0" });
            }
        }
        if !areas.iter().any(|s| s.appears_at.is_none()) {
            return Err(SimError::InvalidAreaTable {
                row: 0,
                reason: "at least one area must exist from the beginning",
            });
        }
        Ok(AreaTable { areas })
    }

    /// Build from `[id, start, end]` rows using `-1` as the "always" sentinel.
    pub fn from_rows(rows: &[[f64; 3]]) -> SimResult<Self> {
        let sentinel = |v: f64| if v == -1.0 { None } else { Some(v) };
        AreaTable::new(
            rows.iter()
                .enumerate()
                .map(|(row, r)| AreaSpan {
                    id: if r[0] >= 0.0 { r[0] as usize } else { usize::MAX - row },
                    appears_at: sentinel(r[1]),
                    disappears_at: sentinel(r[2]),
                })
                .collect(),
        )
    }

    /// Number of areas.
    pub fn n_areas(&self) -> usize {
        self.areas.len()
    }

    /// Area spans in id order.
    pub fn spans(&self) -> &[AreaSpan] {
        &self.areas
    }

    /// `true` when area `a` exists at `age`.
    pub fn exists(&self, a: usize, age: f64) -> bool {
        self.areas[a].exists_at(age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Edge validation and sorting in `TimeBinning::new`.
    // - Youngest-first indexing, durations, midpoints and bin lookup.
    // - Area existence semantics and table validation.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify that edges listed oldest-to-youngest are sorted and that bin 0
    // is the youngest interval.
    //
    // Given
    // -----
    // - Edges [30, 20, 10, 0].
    //
    // Expect
    // ------
    // - 3 bins, bin 0 = [0, 10), durations all 10, midpoints 5/15/25.
    fn timebinning_sorts_edges_youngest_first() {
        // Arrange / Act
        let bins = TimeBinning::new(&[30.0, 20.0, 10.0, 0.0]).unwrap();

        // Assert
        assert_eq!(bins.n_bins(), 3);
        assert_eq!(bins.bounds(0), (0.0, 10.0));
        assert_eq!(bins.durations().to_vec(), vec![10.0, 10.0, 10.0]);
        assert_eq!(bins.midpoints().to_vec(), vec![5.0, 15.0, 25.0]);
    }

    #[test]
    // Purpose
    // -------
    // Check half-open bin lookup and out-of-span handling.
    //
    // Given
    // -----
    // - Edges [0, 10, 20, 30].
    //
    // Expect
    // ------
    // - 0 -> bin 0, 10 -> bin 1, 30 -> bin 2 (oldest edge), 31 -> None.
    fn timebinning_bin_of_uses_half_open_intervals() {
        let bins = TimeBinning::new(&[0.0, 10.0, 20.0, 30.0]).unwrap();
        assert_eq!(bins.bin_of(0.0), Some(0));
        assert_eq!(bins.bin_of(9.99), Some(0));
        assert_eq!(bins.bin_of(10.0), Some(1));
        assert_eq!(bins.bin_of(30.0), Some(2));
        assert_eq!(bins.bin_of(31.0), None);
    }

    #[test]
    // Purpose
    // -------
    // Ensure duplicated or too few edges are rejected.
    fn timebinning_rejects_degenerate_edges() {
        assert!(TimeBinning::new(&[5.0]).is_err());
        assert!(TimeBinning::new(&[0.0, 5.0, 5.0]).is_err());
        assert!(TimeBinning::new(&[-1.0, 5.0]).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Verify lineage/bin overlap for partial and full coverage.
    //
    // Given
    // -----
    // - Bins [0, 10, 20]; a lineage living from age 15 to age 5.
    //
    // Expect
    // ------
    // - 5 Myr in each bin.
    fn timebinning_overlap_clips_to_bin() {
        let bins = TimeBinning::new(&[0.0, 10.0, 20.0]).unwrap();
        assert_relative_eq!(bins.overlap(0, 15.0, 5.0), 5.0);
        assert_relative_eq!(bins.overlap(1, 15.0, 5.0), 5.0);
        assert_relative_eq!(bins.overlap(1, 25.0, 0.0), 10.0);
    }

    #[test]
    // Purpose
    // -------
    // Check the `-1` sentinel and appearance-age semantics.
    //
    // Given
    // -----
    // - Area 0 always present, area 1 appearing at 20 Ma.
    //
    // Expect
    // ------
    // - Area 1 absent at 25 Ma, present at 20 and 5 Ma.
    fn areatable_sentinel_and_appearance() {
        // Arrange
        let table = AreaTable::from_rows(&[[0.0, -1.0, -1.0], [1.0, 20.0, -1.0]]).unwrap();

        // Act / Assert
        assert!(table.exists(0, 60.0));
        assert!(!table.exists(1, 25.0));
        assert!(table.exists(1, 20.0));
        assert!(table.exists(1, 5.0));
    }

    #[test]
    // Purpose
    // -------
    // Ensure a table where no area exists from the start is rejected.
    fn areatable_requires_a_founding_area() {
        let result = AreaTable::from_rows(&[[0.0, 30.0, -1.0]]);
        assert!(matches!(result, Err(SimError::InvalidAreaTable { .. })));
    }
}
