//! Stratified sampling of raster strata for field plot networks.
//!
//! A run takes a categorical strata grid, optional metric and access layers
//! and optional existing plots, splits a sample budget across strata, and
//! picks plot locations that favour spatially contiguous pixels while
//! keeping a minimum distance between every pair of plots.

pub mod access;
pub mod allocation;
pub mod config;
pub mod error;
pub mod grid;
pub mod neighborhood;
pub mod representation;
pub mod sampler;
pub mod samples;
pub mod selection;

pub use access::{distance_to_corridor, AccessFilter, AccessMask, DistanceLayer};
pub use allocation::{allocate, summarize, Allocation, AllocationPlan};
pub use config::{ExistingStrata, Method, SamplingConfig, SamplingPlan};
pub use error::{ConfigurationError, Result, ShortfallCause, Warning};
pub use grid::{GridGeometry, MetricGrid, MetricLayer, StrataGrid};
pub use neighborhood::{ClusterRule, NeighborhoodScanner};
pub use representation::{representation, RepresentationRow};
pub use sampler::{sample_strat, SamplingInputs, StratifiedSampler};
pub use samples::{AcceptedSample, ExistingSample, Rule, SampleTable, SampleType};
pub use selection::DistanceScope;
