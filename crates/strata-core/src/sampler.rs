//! Run orchestrator: validation → access mask → allocation → scanning →
//! selection → sample table.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::access::DistanceLayer;
use crate::allocation::{allocate, summarize, Allocation};
use crate::config::{ExistingStrata, Method, SamplingConfig, SamplingPlan};
use crate::error::{ConfigurationError, Result, ShortfallCause, Warning};
use crate::grid::{MetricGrid, MetricLayer, StrataGrid};
use crate::neighborhood::{Candidate, NeighborhoodScanner};
use crate::samples::{extract_strata, AcceptedSample, ExistingSample, SampleTable, SamplingReport, StratumReport};
use crate::selection::Selector;

/// Per-run candidate source for the selection loop.
enum Picker {
    Ranked { scanner: NeighborhoodScanner, ranked: BTreeMap<u32, Vec<Candidate>> },
    Random(StdRng),
}

/// Everything a run reads. Nothing here is mutated.
#[derive(Debug, Clone, Copy)]
pub struct SamplingInputs<'a> {
    pub strata: &'a StrataGrid,
    pub metric: Option<&'a MetricGrid>,
    /// Distance to the nearest access corridor, per cell.
    pub access: Option<&'a DistanceLayer>,
    pub existing: Option<&'a [ExistingSample]>,
}

impl<'a> SamplingInputs<'a> {
    pub fn new(strata: &'a StrataGrid) -> Self {
        Self { strata, metric: None, access: None, existing: None }
    }

    pub fn with_metric(mut self, metric: &'a MetricGrid) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_access(mut self, access: &'a DistanceLayer) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_existing(mut self, existing: &'a [ExistingSample]) -> Self {
        self.existing = Some(existing);
        self
    }
}

/// Stratified sampler for one validated plan. Holds no state between runs.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    plan: SamplingPlan,
}

impl StratifiedSampler {
    pub fn new(plan: SamplingPlan) -> Self {
        Self { plan }
    }

    pub fn from_config(config: &SamplingConfig) -> Result<Self> {
        Ok(Self::new(config.resolve()?))
    }

    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }

    /// Run the full pipeline. Fails before any sampling work when an input is
    /// malformed; shortfalls and empty strata are reported, not raised.
    ///
    /// Steps:
    ///   1. Input validation and existing-sample strata
    ///   2. Access mask
    ///   3. Stratum summary and allocation
    ///   4. Candidate ranking (Queinnec) or shuffling (random)
    ///   5. Selection per stratum, ascending id
    pub fn run(&self, inputs: &SamplingInputs<'_>) -> Result<SampleTable> {
        let plan = &self.plan;
        let grid = inputs.strata;

        // ── 1. Validation ───────────────────────────────────────────────────
        let metric = self.metric_layer(inputs)?;
        let strata = grid.strata();
        if strata.is_empty() {
            return Err(ConfigurationError::NoStrata);
        }
        let existing = self.resolve_existing(grid, inputs.existing.unwrap_or(&[]))?;
        let known: BTreeSet<u32> = strata.iter().copied().collect();
        let (assigned, unassigned): (Vec<ExistingSample>, Vec<ExistingSample>) = existing
            .iter()
            .copied()
            .partition(|s| s.stratum.is_some_and(|id| known.contains(&id)));

        // ── 2. Access mask ──────────────────────────────────────────────────
        let mask = plan.access.mask(grid, inputs.access)?;

        // ── 3. Allocation ───────────────────────────────────────────────────
        let summary = summarize(grid, &mask, metric);
        let mut existing_counts: BTreeMap<u32, usize> = BTreeMap::new();
        for s in &assigned {
            if let Some(id) = s.stratum {
                *existing_counts.entry(id).or_insert(0) += 1;
            }
        }
        let credited = plan.include.then_some(&existing_counts);
        let allocation = allocate(&plan.allocation, plan.n_samp, &summary, credited, plan.force)?;

        let mut warnings = allocation.warnings.clone();
        if !unassigned.is_empty() {
            warnings.push(Warning::UnassignedExisting { count: unassigned.len() });
        }
        for s in summary.iter().filter(|s| s.available == 0) {
            warnings.push(Warning::EmptyStratum { stratum: s.stratum });
        }

        // ── 4/5. Candidates and selection ───────────────────────────────────
        let mut selector = Selector::new(grid, &mask, plan.min_dist, plan.distance_scope);
        selector.seed_existing(&existing);

        let mut picker = match plan.method {
            Method::Queinnec { scanner } => Picker::Ranked { scanner, ranked: scanner.scan(grid, &mask) },
            Method::Random { seed } => Picker::Random(StdRng::seed_from_u64(seed)),
        };

        let mut samples = Vec::new();
        let mut reports = Vec::with_capacity(summary.len());
        for (s, row) in summary.iter().zip(&allocation.rows) {
            let need = row.need();
            let picked = match &mut picker {
                Picker::Ranked { scanner, ranked } => match ranked.get(&s.stratum) {
                    Some(candidates) => selector.select_ranked(s.stratum, candidates, need, scanner),
                    None => Vec::new(),
                },
                Picker::Random(rng) => {
                    let cells = grid.cells_for_stratum(s.stratum).filter(|&i| mask.is_eligible(i)).collect();
                    selector.select_random(s.stratum, cells, need, rng)
                }
            };

            if picked.len() < need && s.available > 0 {
                warnings.push(Warning::AllocationShortfall {
                    stratum: s.stratum,
                    requested: need,
                    achieved: picked.len(),
                    cause: ShortfallCause::CandidatesExhausted,
                });
            }

            samples.extend(
                assigned
                    .iter()
                    .filter(|e| e.stratum == Some(s.stratum))
                    .map(|e| AcceptedSample::existing(e, s.stratum)),
            );
            reports.push(StratumReport {
                stratum: s.stratum,
                label: grid.label(s.stratum).map(str::to_string),
                pixels: s.pixels,
                available: s.available,
                requested: row.requested,
                allocated: row.allocated,
                existing: existing_counts.get(&s.stratum).copied().unwrap_or(0),
                residual: row.residual,
                selected: picked.len(),
            });
            samples.extend(picked);
        }

        for w in warnings.iter().skip(allocation.warnings.len()) {
            warn!(%w, "sampling");
        }
        info!(
            allocation = plan.allocation.name(),
            strata = reports.len(),
            new = samples.iter().filter(|s| s.is_new()).count(),
            existing = assigned.len(),
            warnings = warnings.len(),
            "sampling complete"
        );

        Ok(SampleTable { samples, report: SamplingReport { strata: reports, warnings } })
    }

    /// The metric layer the allocation needs, after geometry checks.
    fn metric_layer<'a>(&self, inputs: &SamplingInputs<'a>) -> Result<Option<&'a MetricLayer>> {
        if let Some(metric) = inputs.metric {
            inputs.strata.geometry.ensure_matches(&metric.geometry, "metric")?;
        }
        match &self.plan.allocation {
            Allocation::Optimal { layer } => {
                let metric = inputs.metric.ok_or(ConfigurationError::MissingMetric)?;
                Ok(Some(metric.select(layer.as_deref())?))
            }
            _ => Ok(None),
        }
    }

    fn resolve_existing(&self, grid: &StrataGrid, existing: &[ExistingSample]) -> Result<Vec<ExistingSample>> {
        match self.plan.existing_strata {
            ExistingStrata::Attribute => {
                if let Some(index) = existing.iter().position(|s| s.stratum.is_none()) {
                    return Err(ConfigurationError::MissingStratumAttribute { index });
                }
                Ok(existing.to_vec())
            }
            ExistingStrata::Grid => Ok(extract_strata(grid, existing)),
        }
    }
}

/// Convenience wrapper: resolve `config` and run it once.
pub fn sample_strat(config: &SamplingConfig, inputs: &SamplingInputs<'_>) -> Result<SampleTable> {
    StratifiedSampler::from_config(config)?.run(inputs)
}
