//! Engine Configuration
//!
//! Organisation-wide defaults for planning and analysis, loadable from TOML.
//! Every field has a serde default so partial files are valid.

use crate::analysis::{AnalysisRequest, CrAnalysisRequest, EpcAnalysisRequest};
use crate::metric::MetricKind;
use crate::planner::SampleSizeRequest;
use crate::{
    DEFAULT_ALPHA, DEFAULT_CONTROL_TRAFFIC_SHARE, DEFAULT_CR_MDE_RELATIVE,
    DEFAULT_EPC_MDE_RELATIVE, DEFAULT_NUM_VARIANTS, DEFAULT_POWER,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A parsed value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// OptiSample configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Sample size planning defaults
    #[serde(default)]
    pub planning: PlanningConfig,
    /// Significance analysis defaults
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Defaults applied to new sample size requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Target power
    #[serde(default = "default_power")]
    pub power: f64,
    /// Family-wise significance level
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Share of traffic routed to the control arm
    #[serde(default = "default_control_traffic_share")]
    pub control_traffic_share: f64,
    /// Number of non-control variants
    #[serde(default = "default_num_variants")]
    pub num_variants: u32,
    /// Relative MDE for conversion rate metrics
    #[serde(default = "default_cr_mde")]
    pub cr_mde_relative: f64,
    /// Relative MDE for revenue-per-visitor metrics
    #[serde(default = "default_epc_mde")]
    pub epc_mde_relative: f64,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            power: default_power(),
            alpha: default_alpha(),
            control_traffic_share: default_control_traffic_share(),
            num_variants: default_num_variants(),
            cr_mde_relative: default_cr_mde(),
            epc_mde_relative: default_epc_mde(),
        }
    }
}

/// Defaults applied to new analysis requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Significance level for verdicts
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

fn default_power() -> f64 {
    DEFAULT_POWER
}
fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}
fn default_control_traffic_share() -> f64 {
    DEFAULT_CONTROL_TRAFFIC_SHARE
}
fn default_num_variants() -> u32 {
    DEFAULT_NUM_VARIANTS
}
fn default_cr_mde() -> f64 {
    DEFAULT_CR_MDE_RELATIVE
}
fn default_epc_mde() -> f64 {
    DEFAULT_EPC_MDE_RELATIVE
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values no request could be planned or analyzed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let planning = &self.planning;
        open_unit_interval("planning.power", planning.power)?;
        open_unit_interval("planning.alpha", planning.alpha)?;
        open_unit_interval("planning.control_traffic_share", planning.control_traffic_share)?;
        open_unit_interval("analysis.alpha", self.analysis.alpha)?;
        if planning.num_variants == 0 {
            return Err(ConfigError::Invalid {
                field: "planning.num_variants",
                reason: "at least one variant is required".to_string(),
            });
        }
        positive("planning.cr_mde_relative", planning.cr_mde_relative)?;
        positive("planning.epc_mde_relative", planning.epc_mde_relative)?;
        Ok(())
    }

    /// Sample size request seeded with the configured planning defaults
    pub fn sample_size_request(
        &self,
        metric: MetricKind,
        control_baseline: f64,
    ) -> SampleSizeRequest {
        let mde = match metric {
            MetricKind::Cr => self.planning.cr_mde_relative,
            MetricKind::Epc => self.planning.epc_mde_relative,
        };
        SampleSizeRequest::new(metric, control_baseline)
            .with_mde_relative(mde)
            .with_power(self.planning.power)
            .with_alpha(self.planning.alpha)
            .with_control_traffic_share(self.planning.control_traffic_share)
            .with_num_variants(self.planning.num_variants)
    }

    /// CR analysis request at the configured significance level
    pub fn cr_analysis(
        &self,
        control_n: u64,
        control_conversions: u64,
        variant_n: u64,
        variant_conversions: u64,
    ) -> AnalysisRequest {
        CrAnalysisRequest::new(control_n, control_conversions, variant_n, variant_conversions)
            .with_alpha(self.analysis.alpha)
            .into()
    }

    /// EPC analysis request at the configured significance level
    pub fn epc_analysis(
        &self,
        control: (f64, f64, u64),
        variant: (f64, f64, u64),
    ) -> AnalysisRequest {
        let (control_mean, control_std_dev, control_n) = control;
        let (variant_mean, variant_std_dev, variant_n) = variant;
        EpcAnalysisRequest::new(
            control_mean,
            control_std_dev,
            control_n,
            variant_mean,
            variant_std_dev,
            variant_n,
        )
        .with_alpha(self.analysis.alpha)
        .into()
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# OptiSample Configuration

[planning]
# Probability of detecting a true effect of the MDE size
power = 0.8
# Family-wise false positive rate (divided across variants)
alpha = 0.05
# Share of traffic routed to the control arm; the rest is split evenly
control_traffic_share = 0.8
# Number of variants tested against the control
num_variants = 1
# Relative minimum detectable effect per metric
cr_mde_relative = 0.05
epc_mde_relative = 0.10

[analysis]
# Significance level for verdicts
alpha = 0.05
"#
        .to_string()
    }
}

fn open_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be strictly between 0 and 1, got {value}"),
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be positive, got {value}"),
        })
    }
}
