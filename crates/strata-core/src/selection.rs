//! Greedy acceptance under the minimum-distance constraint.
//!
//! Accepted points (existing and new) are kept in a bucket grid whose bucket
//! side equals the minimum distance, so a proximity check only visits the
//! 3×3 buckets around a candidate. Acceptance order is exactly the candidate
//! order handed in; the index never reorders anything.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::AccessMask;
use crate::grid::StrataGrid;
use crate::neighborhood::{Candidate, NeighborhoodScanner};
use crate::samples::{AcceptedSample, ExistingSample, Rule, SampleType};

/// Which accepted points a candidate must keep its distance from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceScope {
    /// Every accepted point, all strata.
    #[default]
    Global,
    /// Accepted points of the candidate's own stratum.
    Stratum,
}

// ── Spatial index ─────────────────────────────────────────────────────────────

/// Bucket grid over accepted points.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    min_dist: f64,
    buckets: HashMap<(i64, i64), Vec<(f64, f64)>>,
}

impl SpatialIndex {
    pub fn new(min_dist: f64) -> Self {
        Self { min_dist, buckets: HashMap::new() }
    }

    /// Bucket of (x, y). Keys saturate at the `i64` range when `min_dist` is
    /// tiny next to the coordinates; saturation is monotone, so points within
    /// `min_dist` of each other still land in adjacent buckets.
    fn key(&self, x: f64, y: f64) -> (i64, i64) {
        ((x / self.min_dist).floor() as i64, (y / self.min_dist).floor() as i64)
    }

    /// True when (x, y) is at least `min_dist` from every indexed point.
    pub fn admits(&self, x: f64, y: f64) -> bool {
        if self.min_dist <= 0.0 {
            return true;
        }
        let (kx, ky) = self.key(x, y);
        let limit = self.min_dist * self.min_dist;
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(points) = self.buckets.get(&(kx.saturating_add(dx), ky.saturating_add(dy))) {
                    if points.iter().any(|&(px, py)| (px - x).powi(2) + (py - y).powi(2) < limit) {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn insert(&mut self, x: f64, y: f64) {
        if self.min_dist <= 0.0 {
            return;
        }
        let key = self.key(x, y);
        self.buckets.entry(key).or_default().push((x, y));
    }
}

// ── Selector ──────────────────────────────────────────────────────────────────

/// Stage of a stratum's selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Clustered,
    Fallback,
    Done,
}

/// Holds the exclusion state for one sampling run. Strata are processed one
/// after another; each acceptance tightens the constraint for the rest.
#[derive(Debug)]
pub struct Selector<'a> {
    grid: &'a StrataGrid,
    mask: &'a AccessMask,
    scope: DistanceScope,
    min_dist: f64,
    global: SpatialIndex,
    per_stratum: BTreeMap<u32, SpatialIndex>,
    /// Cells already holding a sample.
    taken: Vec<bool>,
}

impl<'a> Selector<'a> {
    pub fn new(grid: &'a StrataGrid, mask: &'a AccessMask, min_dist: f64, scope: DistanceScope) -> Self {
        Self {
            grid,
            mask,
            scope,
            min_dist,
            global: SpatialIndex::new(min_dist),
            per_stratum: BTreeMap::new(),
            taken: vec![false; grid.len()],
        }
    }

    /// Register existing samples: they occupy exclusion space and their cells
    /// can no longer be chosen. Samples without a stratum only constrain the
    /// global scope.
    pub fn seed_existing(&mut self, existing: &[ExistingSample]) {
        for s in existing {
            if let Some(cell) = self.grid.locate(s.x, s.y) {
                self.taken[cell] = true;
            }
            self.register(s.stratum, s.x, s.y);
        }
        debug!(count = existing.len(), "seeded existing samples");
    }

    fn register(&mut self, stratum: Option<u32>, x: f64, y: f64) {
        match self.scope {
            DistanceScope::Global => self.global.insert(x, y),
            DistanceScope::Stratum => {
                if let Some(s) = stratum {
                    let min_dist = self.min_dist;
                    self.per_stratum
                        .entry(s)
                        .or_insert_with(|| SpatialIndex::new(min_dist))
                        .insert(x, y);
                }
            }
        }
    }

    fn admits(&self, stratum: u32, x: f64, y: f64) -> bool {
        match self.scope {
            DistanceScope::Global => self.global.admits(x, y),
            DistanceScope::Stratum => self.per_stratum.get(&stratum).map_or(true, |idx| idx.admits(x, y)),
        }
    }

    fn try_accept(&mut self, stratum: u32, cell: usize, rule: Rule) -> Option<AcceptedSample> {
        if self.taken[cell] || !self.mask.is_eligible(cell) || self.grid.value(cell) != Some(stratum) {
            return None;
        }
        let (x, y) = self.grid.cell_center(cell);
        if !self.admits(stratum, x, y) {
            return None;
        }
        self.taken[cell] = true;
        self.register(Some(stratum), x, y);
        Some(AcceptedSample { x, y, stratum, rule, kind: SampleType::New })
    }

    /// Clustered candidates first (Rule 1), then the remaining ranked cells
    /// under the distance constraint alone (Rule 2), until `need` are taken.
    pub fn select_ranked(
        &mut self,
        stratum: u32,
        candidates: &[Candidate],
        need: usize,
        scanner: &NeighborhoodScanner,
    ) -> Vec<AcceptedSample> {
        let mut accepted = Vec::with_capacity(need);
        let mut phase = if need == 0 { Phase::Done } else { Phase::Clustered };

        while phase != Phase::Done {
            let (rule, next) = match phase {
                Phase::Clustered => (Rule::Rule1, Phase::Fallback),
                Phase::Fallback => (Rule::Rule2, Phase::Done),
                Phase::Done => unreachable!(),
            };
            for c in candidates {
                if accepted.len() == need {
                    break;
                }
                if rule == Rule::Rule1 && !scanner.is_clustered(c.score) {
                    continue;
                }
                if let Some(s) = self.try_accept(stratum, c.cell, rule) {
                    accepted.push(s);
                }
            }
            phase = if accepted.len() == need { Phase::Done } else { next };
        }
        debug!(stratum, need, accepted = accepted.len(), "ranked selection");
        accepted
    }

    /// Simple random sample among `cells`, honouring only the distance constraint.
    pub fn select_random(&mut self, stratum: u32, mut cells: Vec<usize>, need: usize, rng: &mut StdRng) -> Vec<AcceptedSample> {
        cells.shuffle(rng);
        let mut accepted = Vec::with_capacity(need);
        for cell in cells {
            if accepted.len() == need {
                break;
            }
            if let Some(s) = self.try_accept(stratum, cell, Rule::Random) {
                accepted.push(s);
            }
        }
        debug!(stratum, need, accepted = accepted.len(), "random selection");
        accepted
    }
}
