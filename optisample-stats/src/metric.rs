//! Metric Model
//!
//! The metric family decides the effect-size formula, the default minimum
//! detectable effect and the hypothesis test applied to an experiment.

use crate::planner::InvalidParameter;
use crate::{DEFAULT_CR_MDE_RELATIVE, DEFAULT_EPC_MDE_RELATIVE};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Metric family of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Conversion rate: successes out of trials (Bernoulli metric)
    Cr,
    /// Earnings per visitor: continuous metric with mean and standard deviation
    Epc,
}

impl MetricKind {
    /// Relative MDE used when a request does not specify one
    pub fn default_mde_relative(self) -> f64 {
        match self {
            MetricKind::Cr => DEFAULT_CR_MDE_RELATIVE,
            MetricKind::Epc => DEFAULT_EPC_MDE_RELATIVE,
        }
    }

    /// Whether planning needs a control standard deviation
    pub fn requires_std_dev(self) -> bool {
        matches!(self, MetricKind::Epc)
    }

    /// Lowercase short name ("cr" / "epc")
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cr => "cr",
            MetricKind::Epc => "epc",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = InvalidParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cr" => Ok(MetricKind::Cr),
            "epc" => Ok(MetricKind::Epc),
            _ => Err(InvalidParameter::UnknownMetric(s.to_string())),
        }
    }
}
