//! Experiment Engine
//!
//! Bundles a configuration with a diagnostic sink so callers size and analyze
//! experiments against the same defaults.

use optisample_stats::{
    AnalysisFailure, AnalysisRequest, AnalysisResult, ConfigError, DiagnosticSink, EngineConfig,
    InvalidParameter, MetricKind, SampleSizeRequest, SampleSizeResult, SignificanceAnalyzer,
    SimulationConfig, SimulationResult, TracingSink,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Planning and analysis front end
#[derive(Debug, Clone)]
pub struct ExperimentEngine {
    config: EngineConfig,
    analyzer: SignificanceAnalyzer,
}

impl Default for ExperimentEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ExperimentEngine {
    /// Engine with the given configuration, reporting failures via `tracing`
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            analyzer: SignificanceAnalyzer::with_sink(Arc::new(TracingSink)),
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = EngineConfig::load(path)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded experiment configuration");
        Ok(Self::new(config))
    }

    /// Replace the diagnostic sink
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.analyzer = SignificanceAnalyzer::with_sink(sink);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sample size request seeded with the configured defaults
    pub fn sample_size_request(
        &self,
        metric: MetricKind,
        control_baseline: f64,
    ) -> SampleSizeRequest {
        self.config.sample_size_request(metric, control_baseline)
    }

    /// Observations required per arm
    pub fn plan(&self, request: &SampleSizeRequest) -> Result<SampleSizeResult, InvalidParameter> {
        optisample_stats::plan(request)
    }

    /// Plan several requests in parallel
    pub fn plan_batch(
        &self,
        requests: &[SampleSizeRequest],
    ) -> Vec<Result<SampleSizeResult, InvalidParameter>> {
        optisample_stats::plan_batch(requests)
    }

    /// Significance verdict for collected data
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisFailure> {
        self.analyzer.analyze(request)
    }

    /// Analyze several requests in parallel
    pub fn analyze_batch(
        &self,
        requests: &[AnalysisRequest],
    ) -> Vec<Result<AnalysisResult, AnalysisFailure>> {
        self.analyzer.analyze_batch(requests)
    }

    /// Monte-Carlo estimate of the power a plan achieves
    pub fn simulate_power(
        &self,
        request: &SampleSizeRequest,
        plan: &SampleSizeResult,
        simulation: &SimulationConfig,
    ) -> Result<SimulationResult, InvalidParameter> {
        optisample_stats::simulate_power(request, plan, simulation)
    }
}
