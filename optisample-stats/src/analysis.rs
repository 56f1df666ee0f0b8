//! Significance Analysis
//!
//! One-sided hypothesis tests ("variant is larger than control") on collected
//! experiment data:
//! - CR: pooled two-proportion z-test on conversion counts
//! - EPC: Welch's unequal-variance t-test from per-arm summary statistics
//!
//! Failures are returned as typed [`AnalysisFailure`] values and reported to the
//! analyzer's [`DiagnosticSink`]; nothing here panics on bad data.

use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::distribution::{normal_sf, round_to_places};
use crate::metric::MetricKind;
use crate::{DEFAULT_ALPHA, REPORT_DECIMALS};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Arm of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    /// Control (baseline) arm
    Control,
    /// Variant (treatment) arm
    Variant,
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arm::Control => write!(f, "control"),
            Arm::Variant => write!(f, "variant"),
        }
    }
}

/// Conversion counts for a CR experiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrAnalysisRequest {
    /// Observations (visitors) in the control arm
    pub control_n: u64,
    /// Conversions in the control arm
    pub control_conversions: u64,
    /// Observations (visitors) in the variant arm
    pub variant_n: u64,
    /// Conversions in the variant arm
    pub variant_conversions: u64,
    /// Significance level
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl CrAnalysisRequest {
    /// Request at the default significance level
    pub fn new(
        control_n: u64,
        control_conversions: u64,
        variant_n: u64,
        variant_conversions: u64,
    ) -> Self {
        Self {
            control_n,
            control_conversions,
            variant_n,
            variant_conversions,
            alpha: DEFAULT_ALPHA,
        }
    }

    /// Set the significance level
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Summary statistics for an EPC experiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpcAnalysisRequest {
    /// Mean revenue per visitor in the control arm
    pub control_mean: f64,
    /// Sample standard deviation in the control arm
    pub control_std_dev: f64,
    /// Observations in the control arm
    pub control_n: u64,
    /// Mean revenue per visitor in the variant arm
    pub variant_mean: f64,
    /// Sample standard deviation in the variant arm
    pub variant_std_dev: f64,
    /// Observations in the variant arm
    pub variant_n: u64,
    /// Significance level
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl EpcAnalysisRequest {
    /// Request at the default significance level
    pub fn new(
        control_mean: f64,
        control_std_dev: f64,
        control_n: u64,
        variant_mean: f64,
        variant_std_dev: f64,
        variant_n: u64,
    ) -> Self {
        Self {
            control_mean,
            control_std_dev,
            control_n,
            variant_mean,
            variant_std_dev,
            variant_n,
            alpha: DEFAULT_ALPHA,
        }
    }

    /// Set the significance level
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}

/// Observed experiment data, tagged by metric family
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "lowercase")]
pub enum AnalysisRequest {
    /// Conversion rate data
    Cr(CrAnalysisRequest),
    /// Revenue-per-visitor data
    Epc(EpcAnalysisRequest),
}

impl AnalysisRequest {
    /// Metric family of this request
    pub fn metric(&self) -> MetricKind {
        match self {
            AnalysisRequest::Cr(_) => MetricKind::Cr,
            AnalysisRequest::Epc(_) => MetricKind::Epc,
        }
    }

    /// Significance level of this request
    pub fn alpha(&self) -> f64 {
        match self {
            AnalysisRequest::Cr(r) => r.alpha,
            AnalysisRequest::Epc(r) => r.alpha,
        }
    }
}

impl From<CrAnalysisRequest> for AnalysisRequest {
    fn from(request: CrAnalysisRequest) -> Self {
        AnalysisRequest::Cr(request)
    }
}

impl From<EpcAnalysisRequest> for AnalysisRequest {
    fn from(request: EpcAnalysisRequest) -> Self {
        AnalysisRequest::Epc(request)
    }
}

/// Verdict of a significance test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// `p_value < alpha`, decided on the unrounded p-value
    pub is_significant: bool,
    /// One-sided p-value rounded to 4 decimal places
    pub p_value: f64,
    /// Variant minus control, rounded to 4 decimal places
    pub observed_diff: f64,
    /// Test statistic (z for CR, t for EPC)
    pub statistic: f64,
    /// Welch-Satterthwaite degrees of freedom (EPC only)
    pub degrees_of_freedom: Option<f64>,
}

/// Broad classification of an analysis failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Malformed input that the caller must fix
    InvalidInput,
    /// Well-formed data for which the test statistic is undefined
    Degenerate,
    /// Non-finite intermediate result or distribution error
    Numerical,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidInput => write!(f, "invalid-input"),
            FailureKind::Degenerate => write!(f, "degenerate"),
            FailureKind::Numerical => write!(f, "numerical"),
        }
    }
}

/// Errors from significance analysis
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisFailure {
    /// Significance level outside (0, 1)
    #[error("Significance level must be strictly between 0 and 1, got {0}")]
    InvalidAlpha(f64),

    /// Arm with zero observations
    #[error("The {arm} arm has no observations")]
    ZeroObservations {
        /// Offending arm
        arm: Arm,
    },

    /// More conversions than observations
    #[error("The {arm} arm reports {conversions} conversions out of {observations} observations")]
    ConversionsExceedObservations {
        /// Offending arm
        arm: Arm,
        /// Reported conversions
        conversions: u64,
        /// Reported observations
        observations: u64,
    },

    /// NaN or infinite summary statistic
    #[error("The {arm} arm {field} must be finite, got {value}")]
    NonFinite {
        /// Offending arm
        arm: Arm,
        /// Field name
        field: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Standard deviation below zero
    #[error("The {arm} arm standard deviation must be non-negative, got {value}")]
    NegativeStdDev {
        /// Offending arm
        arm: Arm,
        /// Rejected value
        value: f64,
    },

    /// Single-observation arm in Welch's t-test
    #[error("The {arm} arm needs at least 2 observations for Welch's t-test, got {got}")]
    InsufficientObservations {
        /// Offending arm
        arm: Arm,
        /// Observations reported
        got: u64,
    },

    /// Pooled or combined standard error of zero
    #[error("Standard error is zero; the test statistic is undefined")]
    ZeroStandardError,

    /// Non-finite intermediate result or distribution error
    #[error("Numerical failure: {0}")]
    Numerical(String),
}

impl AnalysisFailure {
    /// Classify this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisFailure::InvalidAlpha(_)
            | AnalysisFailure::ZeroObservations { .. }
            | AnalysisFailure::ConversionsExceedObservations { .. }
            | AnalysisFailure::NonFinite { .. }
            | AnalysisFailure::NegativeStdDev { .. } => FailureKind::InvalidInput,
            AnalysisFailure::InsufficientObservations { .. }
            | AnalysisFailure::ZeroStandardError => FailureKind::Degenerate,
            AnalysisFailure::Numerical(_) => FailureKind::Numerical,
        }
    }
}

/// Runs significance tests and reports failures to a diagnostic sink
#[derive(Clone)]
pub struct SignificanceAnalyzer {
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for SignificanceAnalyzer {
    fn default() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for SignificanceAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignificanceAnalyzer").finish_non_exhaustive()
    }
}

impl SignificanceAnalyzer {
    /// Analyzer reporting failures as `tracing` events
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer reporting failures to `sink`
    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    /// Test whether the variant beats the control
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
        let outcome = run_test(request);
        if let Err(failure) = &outcome {
            self.sink.analysis_failed(request.metric(), failure);
        }
        outcome
    }

    /// Analyze independent requests in parallel, preserving input order
    pub fn analyze_batch(
        &self,
        requests: &[AnalysisRequest],
    ) -> Vec<Result<AnalysisResult, AnalysisFailure>> {
        requests.par_iter().map(|r| self.analyze(r)).collect()
    }
}

/// Test whether the variant beats the control, reporting failures via `tracing`
pub fn analyze(request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
    SignificanceAnalyzer::default().analyze(request)
}

/// Dispatch to the metric's test without reporting
pub(crate) fn run_test(request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
    match request {
        AnalysisRequest::Cr(r) => proportions_z_test(r),
        AnalysisRequest::Epc(r) => welch_t_test(r),
    }
}

/// One-sided pooled two-proportion z-test
fn proportions_z_test(request: &CrAnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
    check_alpha(request.alpha)?;
    check_counts(Arm::Control, request.control_n, request.control_conversions)?;
    check_counts(Arm::Variant, request.variant_n, request.variant_conversions)?;

    let control_n = request.control_n as f64;
    let variant_n = request.variant_n as f64;
    let control_rate = request.control_conversions as f64 / control_n;
    let variant_rate = request.variant_conversions as f64 / variant_n;

    let pooled = (request.control_conversions as f64 + request.variant_conversions as f64)
        / (control_n + variant_n);
    let standard_error = (pooled * (1.0 - pooled) * (1.0 / variant_n + 1.0 / control_n)).sqrt();
    // Pooled rate of 0 or 1
    if standard_error <= 0.0 {
        return Err(AnalysisFailure::ZeroStandardError);
    }

    let diff = variant_rate - control_rate;
    let z = diff / standard_error;
    let p_value = normal_sf(z);

    debug!(control_rate, variant_rate, pooled, z, p_value, "Two-proportion z-test");

    verdict(z, p_value, diff, None, request.alpha)
}

/// One-sided Welch's t-test from summary statistics
fn welch_t_test(request: &EpcAnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
    check_alpha(request.alpha)?;
    check_summary(
        Arm::Control,
        request.control_mean,
        request.control_std_dev,
        request.control_n,
    )?;
    check_summary(
        Arm::Variant,
        request.variant_mean,
        request.variant_std_dev,
        request.variant_n,
    )?;

    let control_n = request.control_n as f64;
    let variant_n = request.variant_n as f64;
    let control_var = request.control_std_dev.powi(2) / control_n;
    let variant_var = request.variant_std_dev.powi(2) / variant_n;

    let variance = variant_var + control_var;
    if variance <= 0.0 {
        return Err(AnalysisFailure::ZeroStandardError);
    }

    let diff = request.variant_mean - request.control_mean;
    let t = diff / variance.sqrt();

    // Welch-Satterthwaite
    let df = variance.powi(2)
        / (variant_var.powi(2) / (variant_n - 1.0) + control_var.powi(2) / (control_n - 1.0));

    let distribution = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| AnalysisFailure::Numerical(format!("Student's t with {df} df: {e}")))?;
    let p_value = distribution.sf(t);

    debug!(t, df, p_value, "Welch t-test");

    verdict(t, p_value, diff, Some(df), request.alpha)
}

fn verdict(
    statistic: f64,
    p_value: f64,
    diff: f64,
    degrees_of_freedom: Option<f64>,
    alpha: f64,
) -> Result<AnalysisResult, AnalysisFailure> {
    if !statistic.is_finite() {
        return Err(AnalysisFailure::Numerical(format!(
            "test statistic is not finite: {statistic}"
        )));
    }
    if !p_value.is_finite() {
        return Err(AnalysisFailure::Numerical(format!(
            "p-value is not finite: {p_value}"
        )));
    }

    Ok(AnalysisResult {
        is_significant: p_value < alpha,
        p_value: round_to_places(p_value, REPORT_DECIMALS),
        observed_diff: round_to_places(diff, REPORT_DECIMALS),
        statistic,
        degrees_of_freedom,
    })
}

fn check_alpha(alpha: f64) -> Result<(), AnalysisFailure> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(AnalysisFailure::InvalidAlpha(alpha))
    }
}

fn check_counts(arm: Arm, observations: u64, conversions: u64) -> Result<(), AnalysisFailure> {
    if observations == 0 {
        return Err(AnalysisFailure::ZeroObservations { arm });
    }
    if conversions > observations {
        return Err(AnalysisFailure::ConversionsExceedObservations {
            arm,
            conversions,
            observations,
        });
    }
    Ok(())
}

fn check_summary(arm: Arm, mean: f64, std_dev: f64, n: u64) -> Result<(), AnalysisFailure> {
    if n == 0 {
        return Err(AnalysisFailure::ZeroObservations { arm });
    }
    if !mean.is_finite() {
        return Err(AnalysisFailure::NonFinite {
            arm,
            field: "mean",
            value: mean,
        });
    }
    if !std_dev.is_finite() {
        return Err(AnalysisFailure::NonFinite {
            arm,
            field: "standard deviation",
            value: std_dev,
        });
    }
    if std_dev < 0.0 {
        return Err(AnalysisFailure::NegativeStdDev {
            arm,
            value: std_dev,
        });
    }
    if n < 2 {
        return Err(AnalysisFailure::InsufficientObservations { arm, got: n });
    }
    Ok(())
}
