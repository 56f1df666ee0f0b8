//! Diagnostic Sinks
//!
//! Analysis failures are returned to the caller and also reported to a sink the
//! caller chooses. The default sink forwards to `tracing`; whichever subscriber
//! the host application installed decides where the events end up.

use crate::analysis::AnalysisFailure;
use crate::metric::MetricKind;

/// Receiver for analysis failure diagnostics
pub trait DiagnosticSink: Send + Sync {
    /// Called once for every failed analysis
    fn analysis_failed(&self, metric: MetricKind, failure: &AnalysisFailure);
}

/// Emits an `error` level `tracing` event per failure
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn analysis_failed(&self, metric: MetricKind, failure: &AnalysisFailure) {
        tracing::error!(
            metric = %metric,
            kind = %failure.kind(),
            error = %failure,
            "Analysis failed"
        );
    }
}

/// Discards all diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn analysis_failed(&self, _metric: MetricKind, _failure: &AnalysisFailure) {}
}
