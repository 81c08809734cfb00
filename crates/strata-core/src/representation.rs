//! Population vs. sample coverage per stratum.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::grid::StrataGrid;
use crate::samples::SampleTable;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepresentationRow {
    pub stratum: u32,
    pub population_cells: usize,
    /// Percent of non-nodata cells.
    pub population_share: f64,
    pub sample_count: usize,
    /// Percent of all samples in the table.
    pub sample_share: f64,
    /// `sample_share − population_share`, in percentage points.
    pub difference: f64,
}

/// Compare each stratum's share of the grid with its share of `table`.
/// Strata that appear only in the table are listed with zero population.
pub fn representation(grid: &StrataGrid, table: &SampleTable) -> Vec<RepresentationRow> {
    let population = grid.pixel_counts();
    let total_cells: usize = population.values().sum();

    let mut counts: BTreeMap<u32, usize> = population.keys().map(|&s| (s, 0)).collect();
    for s in &table.samples {
        *counts.entry(s.stratum).or_insert(0) += 1;
    }
    let total_samples = table.len();

    let pct = |n: usize, of: usize| if of == 0 { 0.0 } else { 100.0 * n as f64 / of as f64 };
    counts
        .into_iter()
        .map(|(stratum, sample_count)| {
            let population_cells = population.get(&stratum).copied().unwrap_or(0);
            let population_share = pct(population_cells, total_cells);
            let sample_share = pct(sample_count, total_samples);
            RepresentationRow {
                stratum,
                population_cells,
                population_share,
                sample_count,
                sample_share,
                difference: sample_share - population_share,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridGeometry;
    use crate::samples::{AcceptedSample, Rule, SampleType};
    use approx::assert_abs_diff_eq;

    fn sample(stratum: u32) -> AcceptedSample {
        AcceptedSample { x: 0.0, y: 0.0, stratum, rule: Rule::Rule2, kind: SampleType::New }
    }

    #[test]
    fn shares_and_difference() {
        let grid = StrataGrid::from_rows(GridGeometry::unit(1, 4), &[&[1, 1, 1, 2]]).unwrap();
        let table = SampleTable { samples: vec![sample(1), sample(2)], ..Default::default() };
        let rows = representation(&grid, &table);
        assert_eq!(rows.len(), 2);
        assert_abs_diff_eq!(rows[0].population_share, 75.0);
        assert_abs_diff_eq!(rows[0].sample_share, 50.0);
        assert_abs_diff_eq!(rows[0].difference, -25.0);
        assert_abs_diff_eq!(rows[1].difference, 25.0);
    }

    #[test]
    fn empty_table_and_unsampled_strata() {
        let grid = StrataGrid::from_rows(GridGeometry::unit(1, 3), &[&[1, 2, 0]]).unwrap();
        let rows = representation(&grid, &SampleTable::default());
        assert!(rows.iter().all(|r| r.sample_count == 0 && r.sample_share == 0.0));
        assert_abs_diff_eq!(rows[0].population_share, 50.0);
    }

    #[test]
    fn sample_outside_population_listed() {
        let grid = StrataGrid::from_rows(GridGeometry::unit(1, 2), &[&[1, 1]]).unwrap();
        let table = SampleTable { samples: vec![sample(1), sample(7)], ..Default::default() };
        let rows = representation(&grid, &table);
        let stray = rows.iter().find(|r| r.stratum == 7).unwrap();
        assert_eq!(stray.population_cells, 0);
        assert_abs_diff_eq!(stray.sample_share, 50.0);
    }
}
