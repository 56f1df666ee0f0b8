#![warn(missing_docs)]
//! OptiSample Statistical Engine
//!
//! Fixed-horizon frequentist decision engine for A/B/n experiments:
//! - Sample size planning via one-sided normal-approximation power analysis
//! - Bonferroni correction when several variants share one control
//! - Unequal traffic allocation between control and variant arms
//! - Two-proportion z-test for conversion rate (CR) metrics
//! - Welch's t-test from summary statistics for revenue-per-visitor (EPC) metrics
//! - Monte-Carlo power simulation of a planned experiment
//!
//! Every operation is a pure function of its inputs. Diagnostics are emitted
//! through `tracing` and an injectable [`DiagnosticSink`]; no global logger is
//! ever installed by this crate.

mod analysis;
mod config;
mod diagnostics;
mod distribution;
mod metric;
mod planner;
mod simulation;

pub use analysis::{
    AnalysisFailure, AnalysisRequest, AnalysisResult, Arm, CrAnalysisRequest,
    EpcAnalysisRequest, FailureKind, SignificanceAnalyzer, analyze,
};
pub use config::{AnalysisConfig, ConfigError, EngineConfig, PlanningConfig};
pub use diagnostics::{DiagnosticSink, NullSink, TracingSink};
pub use distribution::round_to_places;
pub use metric::MetricKind;
pub use planner::{
    InvalidParameter, SampleSizeRequest, SampleSizeResult, achieved_power, plan, plan_batch,
    required_control_nobs,
};
pub use simulation::{SimulationConfig, SimulationResult, simulate_power};

/// Default target power (1 - beta)
pub const DEFAULT_POWER: f64 = 0.8;

/// Default significance level
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Default share of total traffic routed to the control arm
pub const DEFAULT_CONTROL_TRAFFIC_SHARE: f64 = 0.8;

/// Default number of non-control variants
pub const DEFAULT_NUM_VARIANTS: u32 = 1;

/// Default relative minimum detectable effect for conversion rate metrics
pub const DEFAULT_CR_MDE_RELATIVE: f64 = 0.05;

/// Default relative minimum detectable effect for revenue-per-visitor metrics
pub const DEFAULT_EPC_MDE_RELATIVE: f64 = 0.10;

/// Decimal places used for reported p-values and differences
pub const REPORT_DECIMALS: i32 = 4;

/// Default number of Monte-Carlo replicas for power simulation
pub const DEFAULT_SIMULATION_ITERATIONS: usize = 10_000;
