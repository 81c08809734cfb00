//! Sample points and the per-run sample table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Warning;
use crate::grid::StrataGrid;

/// Which selection tier produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rule {
    /// Clustered candidate (same-stratum neighbourhood).
    Rule1,
    /// Fallback candidate once clustered ones ran out.
    Rule2,
    /// Uniform random selection.
    Random,
    /// Supplied by the caller.
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Existing,
    New,
}

/// A previously collected plot. `stratum` is the pre-extracted attribute, if any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExistingSample {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub stratum: Option<u32>,
}

impl ExistingSample {
    pub fn new(x: f64, y: f64, stratum: Option<u32>) -> Self {
        Self { x, y, stratum }
    }
}

/// Copies of `existing` with the stratum of the containing grid cell.
/// Points outside the grid or on nodata come back with `stratum: None`.
pub fn extract_strata(grid: &StrataGrid, existing: &[ExistingSample]) -> Vec<ExistingSample> {
    existing
        .iter()
        .map(|s| ExistingSample {
            stratum: grid.locate(s.x, s.y).and_then(|i| grid.value(i)),
            ..*s
        })
        .collect()
}

/// One row of the output table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptedSample {
    pub x: f64,
    pub y: f64,
    pub stratum: u32,
    pub rule: Rule,
    #[serde(rename = "type")]
    pub kind: SampleType,
}

impl AcceptedSample {
    pub fn existing(sample: &ExistingSample, stratum: u32) -> Self {
        Self { x: sample.x, y: sample.y, stratum, rule: Rule::Existing, kind: SampleType::Existing }
    }

    pub fn is_new(&self) -> bool {
        self.kind == SampleType::New
    }

    pub fn distance(&self, other: &AcceptedSample) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Requested, allocated and achieved counts for one stratum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumReport {
    pub stratum: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub pixels: usize,
    pub available: usize,
    pub requested: usize,
    pub allocated: usize,
    pub existing: usize,
    /// `allocated − existing`; negative when over-represented.
    pub residual: i64,
    /// New samples accepted.
    pub selected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingReport {
    pub strata: Vec<StratumReport>,
    pub warnings: Vec<Warning>,
}

impl SamplingReport {
    pub fn stratum(&self, stratum: u32) -> Option<&StratumReport> {
        self.strata.iter().find(|r| r.stratum == stratum)
    }
}

/// Accepted samples grouped by ascending stratum, existing before new.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleTable {
    pub samples: Vec<AcceptedSample>,
    pub report: SamplingReport,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn new_samples(&self) -> impl Iterator<Item = &AcceptedSample> {
        self.samples.iter().filter(|s| s.is_new())
    }

    pub fn for_stratum(&self, stratum: u32) -> impl Iterator<Item = &AcceptedSample> {
        self.samples.iter().filter(move |s| s.stratum == stratum)
    }

    pub fn count_by_rule(&self) -> BTreeMap<u32, BTreeMap<Rule, usize>> {
        let mut out: BTreeMap<u32, BTreeMap<Rule, usize>> = BTreeMap::new();
        for s in &self.samples {
            *out.entry(s.stratum).or_default().entry(s.rule).or_insert(0) += 1;
        }
        out
    }

    /// Smallest pairwise distance between any two samples, `None` below two rows.
    pub fn min_pairwise_distance(&self) -> Option<f64> {
        let mut best: Option<f64> = None;
        for (i, a) in self.samples.iter().enumerate() {
            for b in &self.samples[i + 1..] {
                let d = a.distance(b);
                best = Some(best.map_or(d, |m| m.min(d)));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridGeometry;

    #[test]
    fn extract_strata_uses_containing_cell() {
        let grid = StrataGrid::from_rows(GridGeometry::new(2, 2, 10.0, 10.0, 0.0, 20.0), &[&[1, 2], &[0, 3]]).unwrap();
        let pts = [
            ExistingSample::new(5.0, 15.0, None),
            ExistingSample::new(15.0, 5.0, Some(9)),
            ExistingSample::new(5.0, 5.0, None),
            ExistingSample::new(50.0, 5.0, None),
        ];
        let out = extract_strata(&grid, &pts);
        let strata: Vec<Option<u32>> = out.iter().map(|s| s.stratum).collect();
        assert_eq!(strata, vec![Some(1), Some(3), None, None]);
        // Caller's copy is untouched.
        assert_eq!(pts[1].stratum, Some(9));
    }

    #[test]
    fn serialized_sample_uses_type_field() {
        let s = AcceptedSample { x: 1.0, y: 2.0, stratum: 4, rule: Rule::Rule2, kind: SampleType::New };
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"x":1.0,"y":2.0,"stratum":4,"rule":"rule2","type":"new"}"#);
    }

    #[test]
    fn min_pairwise_distance() {
        let mk = |x: f64, y: f64| AcceptedSample { x, y, stratum: 1, rule: Rule::Rule1, kind: SampleType::New };
        let table = SampleTable { samples: vec![mk(0.0, 0.0), mk(3.0, 4.0), mk(10.0, 0.0)], ..Default::default() };
        assert_eq!(table.min_pairwise_distance(), Some(5.0));
        assert_eq!(SampleTable::default().min_pairwise_distance(), None);
    }
}
