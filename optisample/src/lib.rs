#![warn(missing_docs)]
//! # OptiSample
//!
//! Experiment sizing and significance verdicts for A/B/n tests on conversion
//! rate (CR) and revenue-per-visitor (EPC) metrics.
//!
//! - **Planning**: observations per arm for a one-sided test, with Bonferroni
//!   correction across variants and unequal traffic allocation
//! - **Analysis**: pooled two-proportion z-test (CR) and Welch's t-test from
//!   summary statistics (EPC), with typed failures instead of silent gaps
//! - **Simulation**: Monte-Carlo check that a plan delivers its target power
//! - **Configuration**: organisation-wide defaults from a TOML file
//!
//! ## Quick Start
//!
//! ```
//! use optisample::prelude::*;
//!
//! let engine = ExperimentEngine::default();
//!
//! let request = engine.sample_size_request(MetricKind::Cr, 0.02);
//! let sizes = engine.plan(&request).unwrap();
//! assert!(sizes.control_sample_size > 0);
//!
//! let verdict = engine
//!     .analyze(&CrAnalysisRequest::new(1000, 20, 1000, 100).into())
//!     .unwrap();
//! assert!(verdict.is_significant);
//! ```

mod engine;

pub use engine::ExperimentEngine;

// Re-export stats
pub use optisample_stats::{
    AnalysisConfig, AnalysisFailure, AnalysisRequest, AnalysisResult, Arm, ConfigError,
    CrAnalysisRequest, DiagnosticSink, EngineConfig, EpcAnalysisRequest, FailureKind,
    InvalidParameter, MetricKind, NullSink, PlanningConfig, SampleSizeRequest, SampleSizeResult,
    SignificanceAnalyzer, SimulationConfig, SimulationResult, TracingSink, achieved_power,
    analyze, plan, plan_batch, required_control_nobs, round_to_places, simulate_power,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AnalysisFailure, AnalysisRequest, AnalysisResult, CrAnalysisRequest, EpcAnalysisRequest,
        ExperimentEngine, InvalidParameter, MetricKind, SampleSizeRequest, SampleSizeResult,
    };
}
