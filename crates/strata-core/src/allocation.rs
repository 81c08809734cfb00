//! Per-stratum sample quotas.
//!
//! Every weighted policy is apportioned with the largest-remainder rule:
//! each stratum gets the floor of its exact quota, and the leftover units go
//! one at a time to the largest fractional remainders, ties to the lower
//! stratum id. The targets therefore always sum to the requested total.
//!
//! Targets are then capped at each stratum's eligible pixel count. With
//! `force` the capped excess is re-apportioned over strata that still have
//! headroom until nothing is over its ceiling or no headroom is left.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::access::AccessMask;
use crate::error::{ConfigurationError, Result, ShortfallCause, Warning};
use crate::grid::{MetricLayer, StrataGrid};

/// Tolerance on the sum of manual weights.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ── Policy ────────────────────────────────────────────────────────────────────

/// Allocation policy, resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// Proportional to stratum area.
    Proportional,
    /// Proportional to area × standard deviation of a metric layer.
    Optimal { layer: Option<String> },
    /// `total` samples in every stratum.
    Equal,
    /// One weight per stratum in ascending stratum order; weights sum to 1.
    Manual { weights: Vec<f64> },
}

impl Allocation {
    pub fn name(&self) -> &'static str {
        match self {
            Allocation::Proportional => "prop",
            Allocation::Optimal { .. } => "optim",
            Allocation::Equal => "equal",
            Allocation::Manual { .. } => "manual",
        }
    }

    pub fn metric_layer(&self) -> Option<&str> {
        match self {
            Allocation::Optimal { layer } => layer.as_deref(),
            _ => None,
        }
    }
}

// ── Stratum summary ───────────────────────────────────────────────────────────

/// Area and metric spread of one stratum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumSummary {
    pub stratum: u32,
    /// Non-nodata cells of the stratum (area proxy).
    pub pixels: usize,
    /// Cells that pass the access mask; the ceiling for any target.
    pub available: usize,
    /// Sample standard deviation of the metric over the stratum, when a metric
    /// layer was summarised.
    pub std_dev: Option<f64>,
}

/// Summarise every stratum of `grid`, ascending by id.
pub fn summarize(grid: &StrataGrid, mask: &AccessMask, metric: Option<&MetricLayer>) -> Vec<StratumSummary> {
    #[derive(Default)]
    struct Acc {
        pixels: usize,
        available: usize,
        n: usize,
        mean: f64,
        m2: f64,
    }

    let mut acc: BTreeMap<u32, Acc> = BTreeMap::new();
    for (i, v) in grid.values().iter().enumerate() {
        let Some(s) = *v else { continue };
        let a = acc.entry(s).or_default();
        a.pixels += 1;
        if mask.is_eligible(i) {
            a.available += 1;
        }
        if let Some(layer) = metric {
            let x = layer.data[i] as f64;
            if x.is_finite() {
                // Welford update.
                a.n += 1;
                let delta = x - a.mean;
                a.mean += delta / a.n as f64;
                a.m2 += delta * (x - a.mean);
            }
        }
    }

    acc.into_iter()
        .map(|(stratum, a)| StratumSummary {
            stratum,
            pixels: a.pixels,
            available: a.available,
            std_dev: metric.map(|_| if a.n > 1 { (a.m2 / (a.n - 1) as f64).sqrt() } else { 0.0 }),
        })
        .collect()
}

// ── Plan ──────────────────────────────────────────────────────────────────────

/// Allocation outcome for one stratum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRow {
    pub stratum: u32,
    /// Policy target before the pixel ceiling.
    pub requested: usize,
    /// Target after capping and force redistribution.
    pub allocated: usize,
    /// Existing samples credited to the stratum.
    pub existing: usize,
    /// `allocated − existing`; negative when the stratum is over-represented.
    pub residual: i64,
}

impl PlanRow {
    /// New samples still needed.
    pub fn need(&self) -> usize {
        self.residual.max(0) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationPlan {
    pub rows: Vec<PlanRow>,
    pub warnings: Vec<Warning>,
}

impl AllocationPlan {
    pub fn total_allocated(&self) -> usize {
        self.rows.iter().map(|r| r.allocated).sum()
    }

    pub fn targets(&self) -> BTreeMap<u32, usize> {
        self.rows.iter().map(|r| (r.stratum, r.allocated)).collect()
    }

    pub fn row(&self, stratum: u32) -> Option<&PlanRow> {
        self.rows.iter().find(|r| r.stratum == stratum)
    }
}

/// Compute per-stratum targets for `total` samples.
///
/// `summary` must be ascending by stratum (as `summarize` returns it).
/// `existing` credits samples already in the field against each target.
pub fn allocate(
    policy: &Allocation,
    total: usize,
    summary: &[StratumSummary],
    existing: Option<&BTreeMap<u32, usize>>,
    force: bool,
) -> Result<AllocationPlan> {
    if total == 0 {
        return Err(ConfigurationError::InvalidSampleCount);
    }
    if summary.is_empty() {
        return Err(ConfigurationError::NoStrata);
    }
    let ids: Vec<u32> = summary.iter().map(|s| s.stratum).collect();

    let requested = match policy {
        Allocation::Equal => vec![total; summary.len()],
        Allocation::Proportional => {
            let w: Vec<f64> = summary.iter().map(|s| s.pixels as f64).collect();
            apportion(total, &w, &ids)
        }
        Allocation::Optimal { .. } => {
            let w = summary
                .iter()
                .map(|s| s.std_dev.map(|sd| s.pixels as f64 * sd))
                .collect::<Option<Vec<f64>>>()
                .ok_or(ConfigurationError::MissingMetric)?;
            if w.iter().all(|&x| x <= 0.0) {
                return Err(ConfigurationError::ZeroMetricVariance);
            }
            apportion(total, &w, &ids)
        }
        Allocation::Manual { weights } => {
            validate_weights(weights, summary.len())?;
            apportion(total, weights, &ids)
        }
    };
    debug!(policy = policy.name(), total, ?requested, "policy targets");

    let available: Vec<usize> = summary.iter().map(|s| s.available).collect();
    let mut warnings = Vec::new();
    let allocated = if force {
        force_to_ceiling(&requested, &available, &ids, &mut warnings)
    } else {
        requested
            .iter()
            .zip(summary)
            .map(|(&want, s)| {
                if want > s.available {
                    warnings.push(Warning::AllocationShortfall {
                        stratum: s.stratum,
                        requested: want,
                        achieved: s.available,
                        cause: ShortfallCause::PixelCeiling,
                    });
                    s.available
                } else {
                    want
                }
            })
            .collect()
    };

    let rows: Vec<PlanRow> = summary
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let have = existing.and_then(|e| e.get(&s.stratum).copied()).unwrap_or(0);
            let residual = allocated[i] as i64 - have as i64;
            if residual < 0 {
                warnings.push(Warning::OverRepresented { stratum: s.stratum, surplus: (-residual) as usize });
            }
            PlanRow {
                stratum: s.stratum,
                requested: requested[i],
                allocated: allocated[i],
                existing: have,
                residual,
            }
        })
        .collect();

    for w in &warnings {
        warn!(%w, "allocation");
    }
    Ok(AllocationPlan { rows, warnings })
}

fn validate_weights(weights: &[f64], n_strata: usize) -> Result<()> {
    if weights.len() != n_strata {
        return Err(ConfigurationError::WeightsLength { expected: n_strata, found: weights.len() });
    }
    if let Some((index, &value)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(ConfigurationError::InvalidWeight { index, value });
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigurationError::WeightsSum { sum });
    }
    Ok(())
}

/// Cap at the ceilings and spread the excess over strata with headroom,
/// proportionally to their current targets. Strata are visited in ascending
/// id order, which fixes the tie-break of every apportionment round.
fn force_to_ceiling(requested: &[usize], available: &[usize], ids: &[u32], warnings: &mut Vec<Warning>) -> Vec<usize> {
    let mut alloc = requested.to_vec();
    loop {
        let mut excess = 0usize;
        for (a, &cap) in alloc.iter_mut().zip(available) {
            if *a > cap {
                excess += *a - cap;
                *a = cap;
            }
        }
        if excess == 0 {
            return alloc;
        }

        let open: Vec<usize> = (0..alloc.len()).filter(|&i| alloc[i] < available[i]).collect();
        if open.is_empty() {
            for (i, &want) in requested.iter().enumerate() {
                if want > alloc[i] {
                    warnings.push(Warning::AllocationShortfall {
                        stratum: ids[i],
                        requested: want,
                        achieved: alloc[i],
                        cause: ShortfallCause::ForceExhausted,
                    });
                }
            }
            return alloc;
        }

        let mut weights: Vec<f64> = open.iter().map(|&i| alloc[i] as f64).collect();
        if weights.iter().all(|&w| w == 0.0) {
            weights = open.iter().map(|&i| (available[i] - alloc[i]) as f64).collect();
        }
        let open_ids: Vec<u32> = open.iter().map(|&i| ids[i]).collect();
        let extra = apportion(excess, &weights, &open_ids);
        debug!(excess, ?open_ids, ?extra, "force redistribution");
        for (&i, add) in open.iter().zip(extra) {
            alloc[i] += add;
        }
    }
}

/// Largest-remainder apportionment of `total` units by `weights`.
/// All-zero weights yield all-zero targets.
pub fn apportion(total: usize, weights: &[f64], ids: &[u32]) -> Vec<usize> {
    let sum: f64 = weights.iter().sum();
    if sum.is_nan() || sum <= 0.0 {
        return vec![0; weights.len()];
    }
    let quotas: Vec<f64> = weights.iter().map(|w| total as f64 * w / sum).collect();
    let mut out: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let assigned: usize = out.iter().sum();
    let residual = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.partial_cmp(&ra).unwrap_or(Ordering::Equal).then(ids[a].cmp(&ids[b]))
    });
    for &i in order.iter().take(residual) {
        out[i] += 1;
    }
    out
}
