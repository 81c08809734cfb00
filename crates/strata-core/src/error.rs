//! Fatal validation failures and recoverable sampling warnings.
//!
//! Every `ConfigurationError` is raised before any sampling work starts.
//! Conditions a run can survive (quota shortfalls, empty strata) are recorded
//! as `Warning` values in the report instead.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("grid geometry mismatch for {layer}: {detail}")]
    GeometryMismatch { layer: String, detail: String },

    #[error("{layer} holds {found} cells, expected {expected} ({rows}×{cols})")]
    DataLength {
        layer: String,
        expected: usize,
        found: usize,
        rows: usize,
        cols: usize,
    },

    #[error("cell {index} holds stratum value {value}; strata must be positive integers")]
    InvalidStratumValue { index: usize, value: i64 },

    #[error("existing sample {index} has no stratum attribute")]
    MissingStratumAttribute { index: usize },

    #[error("allocation weights sum to {sum}, expected 1")]
    WeightsSum { sum: f64 },

    #[error("expected {expected} allocation weights (one per stratum), found {found}")]
    WeightsLength { expected: usize, found: usize },

    #[error("allocation weight {index} is negative or not finite ({value})")]
    InvalidWeight { index: usize, value: f64 },

    #[error("manual allocation requires weights")]
    MissingWeights,

    #[error("unsupported allocation `{0}` (expected prop, optim, equal or manual)")]
    UnknownAllocation(String),

    #[error("unsupported method `{0}` (expected Queinnec or random)")]
    UnknownMethod(String),

    #[error("metric grid has {layers} layers; name one with `metric_layer`")]
    MultiLayerMetric { layers: usize },

    #[error("metric layer `{0}` not found")]
    UnknownMetricLayer(String),

    #[error("optimal allocation requires a metric grid")]
    MissingMetric,

    #[error("metric has zero standard deviation in every stratum")]
    ZeroMetricVariance,

    #[error("window {wrow}×{wcol} is invalid: both sides must be odd and ≥ 1")]
    InvalidWindow { wrow: usize, wcol: usize },

    #[error("nSamp must be > 0")]
    InvalidSampleCount,

    #[error("mindist must be finite and ≥ 0, got {0}")]
    InvalidMinDistance(f64),

    #[error("invalid access buffers: {0}")]
    InvalidBuffer(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("stratification grid has no non-nodata cells")]
    NoStrata,

    #[error("malformed config: {0}")]
    Parse(String),
}

/// Why a stratum received fewer samples than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallCause {
    /// Target capped at the stratum's pixel count.
    PixelCeiling,
    /// Force redistribution ran out of strata with headroom.
    ForceExhausted,
    /// Candidates ran out under the eligibility and distance constraints.
    CandidatesExhausted,
}

/// A recoverable condition noted in the report; the run continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    AllocationShortfall {
        stratum: u32,
        requested: usize,
        achieved: usize,
        cause: ShortfallCause,
    },
    EmptyStratum {
        stratum: u32,
    },
    /// Existing samples exceed the target; `surplus` samples could be removed.
    OverRepresented {
        stratum: u32,
        surplus: usize,
    },
    /// Existing samples outside the grid or on nodata cells.
    UnassignedExisting {
        count: usize,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::AllocationShortfall { stratum, requested, achieved, cause } => write!(
                f,
                "stratum {stratum}: {achieved} of {requested} samples ({cause:?})"
            ),
            Warning::EmptyStratum { stratum } => {
                write!(f, "stratum {stratum}: no eligible cells")
            }
            Warning::OverRepresented { stratum, surplus } => write!(
                f,
                "stratum {stratum}: {surplus} existing samples over target"
            ),
            Warning::UnassignedExisting { count } => {
                write!(f, "{count} existing samples fall outside the strata")
            }
        }
    }
}
