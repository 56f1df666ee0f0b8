//! Sample Size Planning
//!
//! Power analysis for a one-sided ("variant is larger") two-independent-sample
//! test. The control arm size is solved from the normal-approximation power
//! relation
//!
//! ```text
//! power = Phi(d * sqrt(n1 * n2 / (n1 + n2)) - z_(1 - alpha)),   n2 = ratio * n1
//! ```
//!
//! after applying a Bonferroni correction for the number of variants. Both arm
//! sizes are rounded up, never down.

use crate::analysis::Arm;
use crate::distribution::{normal_cdf, normal_quantile};
use crate::metric::MetricKind;
use crate::{DEFAULT_ALPHA, DEFAULT_CONTROL_TRAFFIC_SHARE, DEFAULT_NUM_VARIANTS, DEFAULT_POWER};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Inputs for sizing an experiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeRequest {
    /// Metric family
    pub metric: MetricKind,
    /// Control baseline: conversion rate for CR, mean revenue per visitor for EPC
    pub control_baseline: f64,
    /// Control standard deviation (required for EPC)
    #[serde(default)]
    pub control_std_dev: Option<f64>,
    /// Relative minimum detectable effect (metric default when unset)
    #[serde(default)]
    pub mde_relative: Option<f64>,
    /// Target power, strictly between 0 and 1
    #[serde(default = "default_power")]
    pub power: f64,
    /// Family-wise significance level, strictly between 0 and 1
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Share of total traffic routed to the control arm
    #[serde(default = "default_control_traffic_share")]
    pub control_traffic_share: f64,
    /// Number of non-control variants sharing the remaining traffic
    #[serde(default = "default_num_variants")]
    pub num_variants: u32,
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

impl SampleSizeRequest {
    /// Request with default power, alpha, allocation and MDE
    pub fn new(metric: MetricKind, control_baseline: f64) -> Self {
        Self {
            metric,
            control_baseline,
            control_std_dev: None,
            mde_relative: None,
            power: DEFAULT_POWER,
            alpha: DEFAULT_ALPHA,
            control_traffic_share: DEFAULT_CONTROL_TRAFFIC_SHARE,
            num_variants: DEFAULT_NUM_VARIANTS,
        }
    }

    /// Conversion rate request for the given baseline rate
    pub fn conversion_rate(baseline_rate: f64) -> Self {
        Self::new(MetricKind::Cr, baseline_rate)
    }

    /// Revenue-per-visitor request for the given baseline mean and standard deviation
    pub fn revenue_per_visitor(baseline_mean: f64, std_dev: f64) -> Self {
        Self::new(MetricKind::Epc, baseline_mean).with_std_dev(std_dev)
    }

    /// Set the control standard deviation
    pub fn with_std_dev(mut self, std_dev: f64) -> Self {
        self.control_std_dev = Some(std_dev);
        self
    }

    /// Set the relative minimum detectable effect
    pub fn with_mde_relative(mut self, mde_relative: f64) -> Self {
        self.mde_relative = Some(mde_relative);
        self
    }

    /// Set the target power
    pub fn with_power(mut self, power: f64) -> Self {
        self.power = power;
        self
    }

    /// Set the family-wise significance level
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the control arm's share of traffic
    pub fn with_control_traffic_share(mut self, share: f64) -> Self {
        self.control_traffic_share = share;
        self
    }

    /// Set the number of non-control variants
    pub fn with_num_variants(mut self, num_variants: u32) -> Self {
        self.num_variants = num_variants;
        self
    }

    /// Relative MDE after applying the metric default
    pub fn resolved_mde_relative(&self) -> f64 {
        self.mde_relative
            .unwrap_or_else(|| self.metric.default_mde_relative())
    }
}

/// Required observations per arm, plus the quantities they were derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeResult {
    /// Observations required in the control arm
    pub control_sample_size: u64,
    /// Observations required in each variant arm
    pub variant_sample_size_per_variant: u64,
    /// Number of variant arms the plan was made for
    pub num_variants: u32,
    /// Unrounded control arm size solved from the power relation
    pub control_nobs: f64,
    /// Bonferroni-adjusted significance level
    pub adjusted_alpha: f64,
    /// Variant-to-control observation ratio
    pub traffic_ratio: f64,
    /// Standardized effect size (Cohen's h for CR, Cohen's d for EPC)
    pub effect_size: f64,
    /// Absolute minimum detectable effect
    pub mde_absolute: f64,
}

impl SampleSizeResult {
    /// Total observations across the control and every variant arm
    pub fn total_sample_size(&self) -> u64 {
        self.variant_sample_size_per_variant
            .saturating_mul(u64::from(self.num_variants))
            .saturating_add(self.control_sample_size)
    }
}

/// Errors from sample size planning
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidParameter {
    /// A probability-like parameter outside (0, 1)
    #[error("{name} must be strictly between 0 and 1, got {value}")]
    OutOfUnitInterval {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// A NaN or infinite input
    #[error("{name} must be finite, got {value}")]
    NonFinite {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Metric name other than "cr" or "epc"
    #[error("Unknown metric type: {0:?} (expected \"cr\" or \"epc\")")]
    UnknownMetric(String),

    /// EPC request without a positive standard deviation
    #[error("A positive control standard deviation is required for EPC planning")]
    MissingStdDev,

    /// Absolute MDE of zero or less
    #[error("Minimum detectable effect must be positive, got {0}")]
    NonPositiveMde(f64),

    /// Zero variants requested
    #[error("At least one variant is required")]
    NoVariants,

    /// Control share outside (0, 1)
    #[error("Control traffic share must leave traffic for the variants: expected (0, 1), got {0}")]
    InvalidTrafficShare(f64),

    /// CR baseline outside (0, 1)
    #[error("Conversion rate baseline must be strictly between 0 and 1, got {0}")]
    BaselineOutOfRange(f64),

    /// Baseline plus MDE above 1
    #[error("Variant conversion rate {0} implied by the MDE exceeds 1")]
    VariantRateExceedsOne(f64),

    /// Power at or below the adjusted significance level
    #[error("Target power {power} must exceed the adjusted significance level {alpha}")]
    PowerNotAboveAlpha {
        /// Requested power
        power: f64,
        /// Bonferroni-adjusted significance level
        alpha: f64,
    },

    /// Effect too small for any finite experiment to detect
    #[error("Effect size {effect_size} is too small to plan for: required sample size is {nobs}")]
    EffectTooSmall {
        /// Standardized effect size
        effect_size: f64,
        /// Unrounded arm size the power relation produced
        nobs: f64,
    },

    /// Simulation requested with zero iterations
    #[error("Simulation needs at least one iteration")]
    NoIterations,

    /// Simulated arm whose sampling distribution is undefined
    #[error("Cannot simulate the {arm} arm: mean {mean} with standard deviation {std_dev}")]
    DegenerateArm {
        /// Arm being simulated
        arm: Arm,
        /// Mean of the sampling distribution
        mean: f64,
        /// Standard deviation of the sampling distribution
        std_dev: f64,
    },
}

/// Validated planning quantities shared with the power simulator
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolved {
    pub adjusted_alpha: f64,
    pub traffic_ratio: f64,
    pub mde_absolute: f64,
    pub effect_size: f64,
}

/// Validate a request and derive the inputs of the power relation
pub(crate) fn resolve(request: &SampleSizeRequest) -> Result<Resolved, InvalidParameter> {
    check_finite("control_baseline", request.control_baseline)?;
    check_finite("power", request.power)?;
    check_finite("alpha", request.alpha)?;
    check_finite("control_traffic_share", request.control_traffic_share)?;
    if let Some(mde) = request.mde_relative {
        check_finite("mde_relative", mde)?;
    }
    if let Some(std_dev) = request.control_std_dev {
        check_finite("control_std_dev", std_dev)?;
    }

    check_unit_interval("power", request.power)?;
    check_unit_interval("alpha", request.alpha)?;

    if request.num_variants == 0 {
        return Err(InvalidParameter::NoVariants);
    }
    let share = request.control_traffic_share;
    if share <= 0.0 || share >= 1.0 {
        return Err(InvalidParameter::InvalidTrafficShare(share));
    }

    // Bonferroni: k comparisons against one control
    let adjusted_alpha = request.alpha / f64::from(request.num_variants);
    if request.power <= adjusted_alpha {
        return Err(InvalidParameter::PowerNotAboveAlpha {
            power: request.power,
            alpha: adjusted_alpha,
        });
    }

    let mde_absolute = request.control_baseline * request.resolved_mde_relative();
    if mde_absolute <= 0.0 {
        return Err(InvalidParameter::NonPositiveMde(mde_absolute));
    }

    // Remaining traffic split evenly across the variants
    let variant_share = (1.0 - share) / f64::from(request.num_variants);
    let traffic_ratio = variant_share / share;

    let effect_size = match request.metric {
        MetricKind::Cr => {
            let p1 = request.control_baseline;
            if p1 <= 0.0 || p1 >= 1.0 {
                return Err(InvalidParameter::BaselineOutOfRange(p1));
            }
            let p2 = p1 + mde_absolute;
            if p2 > 1.0 {
                return Err(InvalidParameter::VariantRateExceedsOne(p2));
            }
            cohens_h(p1, p2)
        }
        MetricKind::Epc => match request.control_std_dev {
            Some(std_dev) if std_dev > 0.0 => mde_absolute / std_dev,
            _ => return Err(InvalidParameter::MissingStdDev),
        },
    };

    Ok(Resolved {
        adjusted_alpha,
        traffic_ratio,
        mde_absolute,
        effect_size,
    })
}

/// Compute the observations required per arm
///
/// Returns ceiling-rounded control and per-variant sizes for a one-sided test at
/// the Bonferroni-adjusted level.
pub fn plan(request: &SampleSizeRequest) -> Result<SampleSizeResult, InvalidParameter> {
    let resolved = resolve(request)?;

    let control_nobs = required_control_nobs(
        resolved.effect_size,
        resolved.adjusted_alpha,
        request.power,
        resolved.traffic_ratio,
    );
    let variant_nobs = control_nobs * resolved.traffic_ratio;
    for nobs in [control_nobs, variant_nobs] {
        if !nobs.is_finite() || nobs > u64::MAX as f64 {
            return Err(InvalidParameter::EffectTooSmall {
                effect_size: resolved.effect_size,
                nobs,
            });
        }
    }

    debug!(
        metric = %request.metric,
        effect_size = resolved.effect_size,
        adjusted_alpha = resolved.adjusted_alpha,
        traffic_ratio = resolved.traffic_ratio,
        control_nobs,
        "Solved sample size"
    );

    Ok(SampleSizeResult {
        control_sample_size: ceil_count(control_nobs),
        variant_sample_size_per_variant: ceil_count(variant_nobs),
        num_variants: request.num_variants,
        control_nobs,
        adjusted_alpha: resolved.adjusted_alpha,
        traffic_ratio: resolved.traffic_ratio,
        effect_size: resolved.effect_size,
        mde_absolute: resolved.mde_absolute,
    })
}

/// Plan several independent requests in parallel, preserving input order
pub fn plan_batch(
    requests: &[SampleSizeRequest],
) -> Vec<Result<SampleSizeResult, InvalidParameter>> {
    requests.par_iter().map(plan).collect()
}

/// Control arm size that reaches `power` for a one-sided test
///
/// Closed-form inverse of [`achieved_power`]:
/// `n1 = ((z_(1 - alpha) + z_power) / d)^2 * (1 + 1 / ratio)`.
pub fn required_control_nobs(effect_size: f64, alpha: f64, power: f64, ratio: f64) -> f64 {
    let z_alpha = normal_quantile(1.0 - alpha);
    let z_power = normal_quantile(power);
    ((z_alpha + z_power) / effect_size).powi(2) * (1.0 + 1.0 / ratio)
}

/// Power of a one-sided two-sample test with `control_nobs` control
/// observations and `ratio * control_nobs` variant observations
pub fn achieved_power(effect_size: f64, control_nobs: f64, ratio: f64, alpha: f64) -> f64 {
    let variant_nobs = control_nobs * ratio;
    let total = control_nobs + variant_nobs;
    if total <= 0.0 {
        return 0.0;
    }
    let effective_nobs = control_nobs * variant_nobs / total;
    normal_cdf(effect_size * effective_nobs.sqrt() - normal_quantile(1.0 - alpha))
}

/// Cohen's h between two proportions (arcsine variance-stabilizing transform)
fn cohens_h(p1: f64, p2: f64) -> f64 {
    2.0 * p2.sqrt().asin() - 2.0 * p1.sqrt().asin()
}

fn ceil_count(nobs: f64) -> u64 {
    nobs.ceil() as u64
}

fn check_finite(name: &'static str, value: f64) -> Result<(), InvalidParameter> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(InvalidParameter::NonFinite { name, value })
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), InvalidParameter> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(InvalidParameter::OutOfUnitInterval { name, value })
    }
}
