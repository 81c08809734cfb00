//! Same-stratum neighbourhood scoring and candidate ranking.
//!
//! Each eligible cell is scored with the number of eligible cells of its own
//! stratum inside a `wrow`×`wcol` window (itself included). Candidates are
//! ranked by descending score, then ascending row and column, so the most
//! contiguous pixels come first and the order is fully deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::AccessMask;
use crate::error::{ConfigurationError, Result};
use crate::grid::StrataGrid;

/// What makes a candidate eligible for Rule 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRule {
    /// The full nominal window is the same eligible stratum. Cells whose
    /// window is clipped by the grid edge never qualify.
    #[default]
    FullWindow,
    /// At least one same-stratum neighbour besides the cell itself.
    AnyNeighbor,
}

/// A ranked cell of one stratum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub cell: usize,
    /// Same-stratum eligible cells in the window, including this one.
    pub score: u32,
    /// Position in the stratum's ranked order.
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborhoodScanner {
    wrow: usize,
    wcol: usize,
    cluster: ClusterRule,
}

impl NeighborhoodScanner {
    pub fn new(wrow: usize, wcol: usize, cluster: ClusterRule) -> Result<Self> {
        if wrow == 0 || wcol == 0 {
            return Err(ConfigurationError::InvalidWindow { wrow, wcol });
        }
        Ok(Self { wrow, wcol, cluster })
    }

    pub fn window(&self) -> (usize, usize) {
        (self.wrow, self.wcol)
    }

    /// Whether a candidate with `score` counts as clustered.
    pub fn is_clustered(&self, score: u32) -> bool {
        match self.cluster {
            ClusterRule::FullWindow => score as usize == self.wrow * self.wcol,
            ClusterRule::AnyNeighbor => score > 1,
        }
    }

    /// Score of every cell; zero for nodata and ineligible cells.
    pub fn scores(&self, grid: &StrataGrid, mask: &AccessMask) -> Vec<u32> {
        let cols = grid.cols();
        let mut scores = vec![0u32; grid.len()];

        #[cfg(feature = "threading")]
        {
            use rayon::prelude::*;
            scores
                .par_chunks_mut(cols)
                .enumerate()
                .for_each(|(r, row)| self.score_row(grid, mask, r, row));
        }
        #[cfg(not(feature = "threading"))]
        {
            scores
                .chunks_mut(cols)
                .enumerate()
                .for_each(|(r, row)| self.score_row(grid, mask, r, row));
        }
        scores
    }

    fn score_row(&self, grid: &StrataGrid, mask: &AccessMask, r: usize, out: &mut [u32]) {
        let base = r * grid.cols();
        for (c, slot) in out.iter_mut().enumerate() {
            let idx = base + c;
            let Some(s) = grid.value(idx) else { continue };
            if !mask.is_eligible(idx) {
                continue;
            }
            *slot = grid
                .neighbors(idx, self.wrow, self.wcol)
                .filter(|&j| mask.is_eligible(j) && grid.value(j) == Some(s))
                .count() as u32;
        }
    }

    /// Ranked candidates of a single stratum.
    pub fn rank_stratum(&self, grid: &StrataGrid, mask: &AccessMask, scores: &[u32], stratum: u32) -> Vec<Candidate> {
        let cells = grid
            .cells_for_stratum(stratum)
            .filter(|&i| mask.is_eligible(i))
            .map(|i| (i, scores[i]));
        rank(cells)
    }

    /// Ranked candidates for every stratum with at least one eligible cell.
    pub fn scan(&self, grid: &StrataGrid, mask: &AccessMask) -> BTreeMap<u32, Vec<Candidate>> {
        let scores = self.scores(grid, mask);
        let mut buckets: BTreeMap<u32, Vec<(usize, u32)>> = BTreeMap::new();
        for (i, v) in grid.values().iter().enumerate() {
            if let Some(s) = *v {
                if mask.is_eligible(i) {
                    buckets.entry(s).or_default().push((i, scores[i]));
                }
            }
        }
        buckets.into_iter().map(|(s, cells)| (s, rank(cells))).collect()
    }
}

/// Sort by descending score, then ascending linear index (row, then column).
fn rank(cells: impl IntoIterator<Item = (usize, u32)>) -> Vec<Candidate> {
    let mut cells: Vec<(usize, u32)> = cells.into_iter().collect();
    cells.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    cells
        .into_iter()
        .enumerate()
        .map(|(rank, (cell, score))| Candidate { cell, score, rank })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessFilter, DistanceLayer};
    use crate::grid::GridGeometry;

    fn grid(rows: &[&[u32]]) -> StrataGrid {
        StrataGrid::from_rows(GridGeometry::unit(rows.len(), rows[0].len()), rows).unwrap()
    }

    #[test]
    fn scores_count_same_stratum_in_window() {
        let g = grid(&[&[1, 1, 2], &[1, 1, 2], &[2, 2, 2]]);
        let scanner = NeighborhoodScanner::new(3, 3, ClusterRule::FullWindow).unwrap();
        let scores = scanner.scores(&g, &AccessMask::all(&g));
        assert_eq!(scores, vec![4, 4, 2, 4, 4, 4, 2, 4, 3]);
    }

    #[test]
    fn ineligible_cells_score_zero_and_are_not_counted() {
        let g = grid(&[&[1, 1, 1]]);
        let layer = DistanceLayer::new(g.geometry, vec![10.0, 100.0, 10.0]).unwrap();
        let mask = AccessFilter::new(None, Some(50.0)).unwrap().mask(&g, Some(&layer)).unwrap();
        let scanner = NeighborhoodScanner::new(1, 3, ClusterRule::AnyNeighbor).unwrap();
        assert_eq!(scanner.scores(&g, &mask), vec![1, 0, 1]);
    }

    #[test]
    fn ranking_is_score_desc_then_row_col() {
        let g = grid(&[&[1, 1, 1, 2], &[1, 1, 1, 2], &[1, 1, 1, 1], &[2, 2, 2, 1]]);
        let scanner = NeighborhoodScanner::new(3, 3, ClusterRule::FullWindow).unwrap();
        let ranked = scanner.scan(&g, &AccessMask::all(&g));
        let s1 = &ranked[&1];
        // Cell (1,1) is the only one with a full 3×3 window of stratum 1.
        assert_eq!(s1[0].cell, 5);
        assert_eq!(s1[0].score, 9);
        assert!(scanner.is_clustered(s1[0].score));
        assert!(s1[1..].iter().all(|c| !scanner.is_clustered(c.score)));
        for pair in s1.windows(2) {
            assert!(pair[0].score > pair[1].score || (pair[0].score == pair[1].score && pair[0].cell < pair[1].cell));
        }
        assert!(s1.iter().enumerate().all(|(i, c)| c.rank == i));
    }

    #[test]
    fn rank_stratum_matches_scan() {
        let g = grid(&[&[1, 2, 1], &[2, 1, 2], &[1, 2, 1]]);
        let scanner = NeighborhoodScanner::new(3, 3, ClusterRule::AnyNeighbor).unwrap();
        let mask = AccessMask::all(&g);
        let scores = scanner.scores(&g, &mask);
        let all = scanner.scan(&g, &mask);
        for s in g.strata() {
            assert_eq!(scanner.rank_stratum(&g, &mask, &scores, s), all[&s]);
        }
    }

    #[test]
    fn isolated_cell_is_not_clustered() {
        let scanner = NeighborhoodScanner::new(3, 3, ClusterRule::AnyNeighbor).unwrap();
        assert!(!scanner.is_clustered(1));
        assert!(scanner.is_clustered(2));
    }

    #[test]
    fn zero_window_rejected() {
        assert!(NeighborhoodScanner::new(0, 3, ClusterRule::FullWindow).is_err());
    }
}
