//! Recognised sampling options and their validated, tagged form.
//!
//! `SamplingConfig` mirrors the option names users write in campaign files.
//! `resolve` checks every option once and turns the string-valued choices
//! into `Allocation` and `Method` variants, so nothing downstream compares
//! strings.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::access::AccessFilter;
use crate::allocation::Allocation;
use crate::error::{ConfigurationError, Result};
use crate::neighborhood::{ClusterRule, NeighborhoodScanner};
use crate::selection::DistanceScope;

/// Where existing samples get their stratum from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingStrata {
    /// The pre-extracted `stratum` attribute; a missing attribute is fatal.
    #[default]
    Attribute,
    /// The stratum of the containing grid cell.
    Grid,
}

/// Raw sampling options, as deserialised from a campaign file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    #[serde(alias = "nSamp")]
    pub n_samp: usize,
    /// prop, optim, equal or manual.
    pub allocation: String,
    /// One weight per stratum, manual allocation only.
    pub weights: Option<Vec<f64>>,
    /// Metric layer used by optim; required for multi-layer metric grids.
    pub metric_layer: Option<String>,
    pub mindist: f64,
    pub buff_inner: Option<f64>,
    pub buff_outer: Option<f64>,
    pub wrow: usize,
    pub wcol: usize,
    /// Queinnec or random.
    pub method: String,
    /// Credit existing samples against nSamp (true) or add them on top (false).
    pub include: bool,
    pub force: bool,
    pub seed: u64,
    pub distance_scope: DistanceScope,
    pub cluster: ClusterRule,
    pub existing_strata: ExistingStrata,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_samp: 0,
            allocation: "prop".into(),
            weights: None,
            metric_layer: None,
            mindist: 0.0,
            buff_inner: None,
            buff_outer: None,
            wrow: 3,
            wcol: 3,
            method: "Queinnec".into(),
            include: true,
            force: false,
            seed: 0,
            distance_scope: DistanceScope::Global,
            cluster: ClusterRule::FullWindow,
            existing_strata: ExistingStrata::Attribute,
        }
    }
}

/// Selection method, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    Queinnec { scanner: NeighborhoodScanner },
    Random { seed: u64 },
}

/// Validated options ready to drive a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPlan {
    pub n_samp: usize,
    pub allocation: Allocation,
    pub method: Method,
    pub min_dist: f64,
    pub access: AccessFilter,
    pub include: bool,
    pub force: bool,
    pub distance_scope: DistanceScope,
    pub existing_strata: ExistingStrata,
}

impl SamplingConfig {
    pub fn new(n_samp: usize) -> Self {
        Self { n_samp, ..Self::default() }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn resolve(&self) -> Result<SamplingPlan> {
        if self.n_samp == 0 {
            return Err(ConfigurationError::InvalidSampleCount);
        }
        if !self.mindist.is_finite() || self.mindist < 0.0 {
            return Err(ConfigurationError::InvalidMinDistance(self.mindist));
        }

        let allocation = match self.allocation.to_ascii_lowercase().as_str() {
            "prop" | "proportional" => Allocation::Proportional,
            "optim" | "optimal" => Allocation::Optimal { layer: self.metric_layer.clone() },
            "equal" => Allocation::Equal,
            "manual" => Allocation::Manual {
                weights: self.weights.clone().ok_or(ConfigurationError::MissingWeights)?,
            },
            _ => return Err(ConfigurationError::UnknownAllocation(self.allocation.clone())),
        };
        if self.weights.is_some() && !matches!(allocation, Allocation::Manual { .. }) {
            warn!(allocation = allocation.name(), "weights ignored outside manual allocation");
        }

        let method = match self.method.to_ascii_lowercase().as_str() {
            "queinnec" => {
                if self.wrow % 2 == 0 || self.wcol % 2 == 0 {
                    return Err(ConfigurationError::InvalidWindow { wrow: self.wrow, wcol: self.wcol });
                }
                Method::Queinnec { scanner: NeighborhoodScanner::new(self.wrow, self.wcol, self.cluster)? }
            }
            "random" | "srs" => Method::Random { seed: self.seed },
            _ => return Err(ConfigurationError::UnknownMethod(self.method.clone())),
        };

        Ok(SamplingPlan {
            n_samp: self.n_samp,
            allocation,
            method,
            min_dist: self.mindist,
            access: AccessFilter::new(self.buff_inner, self.buff_outer)?,
            include: self.include,
            force: self.force,
            distance_scope: self.distance_scope,
            existing_strata: self.existing_strata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_proportional_queinnec() {
        let plan = SamplingConfig::new(10).resolve().unwrap();
        assert_eq!(plan.allocation, Allocation::Proportional);
        match plan.method {
            Method::Queinnec { scanner } => assert_eq!(scanner.window(), (3, 3)),
            other => panic!("unexpected method {other:?}"),
        }
        assert!(plan.include);
        assert!(plan.access.is_unbounded());
    }

    #[test]
    fn json_accepts_original_option_names() {
        let cfg = SamplingConfig::from_json(
            r#"{"nSamp": 20, "allocation": "manual", "weights": [0.2, 0.2, 0.2, 0.4],
                "mindist": 100, "buff_inner": 50, "buff_outer": 200, "method": "random", "seed": 3}"#,
        )
        .unwrap();
        let plan = cfg.resolve().unwrap();
        assert_eq!(plan.n_samp, 20);
        assert_eq!(plan.allocation, Allocation::Manual { weights: vec![0.2, 0.2, 0.2, 0.4] });
        assert_eq!(plan.method, Method::Random { seed: 3 });
        assert_eq!(plan.access, AccessFilter { buff_inner: Some(50.0), buff_outer: Some(200.0) });
    }

    #[test]
    fn unknown_strings_are_configuration_errors() {
        let mut cfg = SamplingConfig::new(5);
        cfg.allocation = "neyman".into();
        assert_eq!(cfg.resolve(), Err(ConfigurationError::UnknownAllocation("neyman".into())));
        cfg.allocation = "prop".into();
        cfg.method = "kmeans".into();
        assert_eq!(cfg.resolve(), Err(ConfigurationError::UnknownMethod("kmeans".into())));
    }

    #[test]
    fn invalid_numbers_rejected() {
        assert_eq!(SamplingConfig::new(0).resolve(), Err(ConfigurationError::InvalidSampleCount));

        let mut cfg = SamplingConfig::new(5);
        cfg.mindist = -1.0;
        assert!(matches!(cfg.resolve(), Err(ConfigurationError::InvalidMinDistance(_))));

        let mut cfg = SamplingConfig::new(5);
        cfg.wrow = 4;
        assert_eq!(cfg.resolve(), Err(ConfigurationError::InvalidWindow { wrow: 4, wcol: 3 }));

        let mut cfg = SamplingConfig::new(5);
        cfg.allocation = "manual".into();
        assert_eq!(cfg.resolve(), Err(ConfigurationError::MissingWeights));
    }

    #[test]
    fn misspelled_options_are_rejected() {
        for text in [
            r#"{"nSamp": 4, "buff_outter": 200}"#,
            r#"{"nSamp": 4, "min_dist": 100}"#,
        ] {
            assert!(matches!(SamplingConfig::from_json(text), Err(ConfigurationError::Parse(_))), "{text}");
        }
        // The camel-case alias and the field name both stay accepted.
        assert_eq!(SamplingConfig::from_json(r#"{"nSamp": 4}"#).unwrap().n_samp, 4);
        assert_eq!(SamplingConfig::from_json(r#"{"n_samp": 4}"#).unwrap().n_samp, 4);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            SamplingConfig::from_json(r#"{"nSamp": "many"}"#),
            Err(ConfigurationError::Parse(_))
        ));
        assert!(matches!(
            SamplingConfig::from_json(r#"{"nSamp": 4, "distance_scope": "everywhere"}"#),
            Err(ConfigurationError::Parse(_))
        ));
    }
}
