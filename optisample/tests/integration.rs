//! Integration tests for OptiSample
//!
//! These tests verify the end-to-end behavior of planning, analysis and
//! configuration through the public engine.

use approx::assert_relative_eq;
use optisample::{
    AnalysisFailure, AnalysisRequest, CrAnalysisRequest, DiagnosticSink, EngineConfig,
    EpcAnalysisRequest, ExperimentEngine, FailureKind, InvalidParameter, MetricKind,
    SampleSizeRequest, SimulationConfig, achieved_power,
};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("optisample=debug,optisample_stats=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl DiagnosticSink for RecordingSink {
    fn analysis_failed(&self, metric: MetricKind, failure: &AnalysisFailure) {
        self.messages
            .lock()
            .unwrap()
            .push(format!("{metric}: {failure}"));
    }
}

/// Default CR plan returns positive integer sizes for both arms
#[test]
fn test_cr_default_plan() {
    init_tracing();
    let engine = ExperimentEngine::default();

    let request = engine.sample_size_request(MetricKind::Cr, 0.02);
    let result = engine.plan(&request).unwrap();

    assert!(result.control_sample_size > 0);
    assert!(result.variant_sample_size_per_variant > 0);
    // 80/20 split: variant arm is a quarter of the control arm
    let expected = result.control_sample_size as f64 * 0.25;
    assert!((result.variant_sample_size_per_variant as f64 - expected).abs() <= 1.25);
}

/// Plan, then verify the plan against the forward power relation
#[test]
fn test_plan_then_power_check() {
    let engine = ExperimentEngine::default();
    let request = SampleSizeRequest::revenue_per_visitor(2.5, 7.0)
        .with_num_variants(2)
        .with_control_traffic_share(0.5);

    let result = engine.plan(&request).unwrap();

    assert_relative_eq!(result.adjusted_alpha, 0.025);
    assert_relative_eq!(result.traffic_ratio, 0.5);
    let power = achieved_power(
        result.effect_size,
        result.control_sample_size as f64,
        result.traffic_ratio,
        result.adjusted_alpha,
    );
    assert!(power >= 0.8);
    assert_eq!(
        result.total_sample_size(),
        result.control_sample_size + 2 * result.variant_sample_size_per_variant
    );
}

/// Monotonicity in MDE and number of variants
#[test]
fn test_sample_size_monotonicity() {
    let engine = ExperimentEngine::default();

    let mut last_control = u64::MAX;
    let mut last_variant = u64::MAX;
    for mde in [0.02, 0.05, 0.10, 0.20, 0.40] {
        let result = engine
            .plan(&SampleSizeRequest::conversion_rate(0.04).with_mde_relative(mde))
            .unwrap();
        assert!(result.control_sample_size < last_control);
        assert!(result.variant_sample_size_per_variant < last_variant);
        last_control = result.control_sample_size;
        last_variant = result.variant_sample_size_per_variant;
    }

    let mut last = 0;
    for k in 1..=5 {
        let result = engine
            .plan(&SampleSizeRequest::revenue_per_visitor(5.0, 3.0).with_num_variants(k))
            .unwrap();
        assert!(result.control_sample_size >= last);
        last = result.control_sample_size;
    }
}

/// Boundary values for power and alpha are rejected
#[test]
fn test_plan_boundaries() {
    let engine = ExperimentEngine::default();
    let base = SampleSizeRequest::conversion_rate(0.02);

    for bad in [0.0, 1.0] {
        assert!(matches!(
            engine.plan(&base.with_power(bad)),
            Err(InvalidParameter::OutOfUnitInterval { .. })
        ));
        assert!(matches!(
            engine.plan(&base.with_alpha(bad)),
            Err(InvalidParameter::OutOfUnitInterval { .. })
        ));
    }

    assert_eq!(
        engine.plan(&SampleSizeRequest::new(MetricKind::Epc, 5.0)),
        Err(InvalidParameter::MissingStdDev)
    );
    assert!(matches!(
        "revenue".parse::<MetricKind>(),
        Err(InvalidParameter::UnknownMetric(_))
    ));
}

/// A clear CR winner is significant
#[test]
fn test_cr_significance() {
    init_tracing();
    let engine = ExperimentEngine::default();

    let result = engine
        .analyze(&CrAnalysisRequest::new(1000, 20, 1000, 100).into())
        .unwrap();

    assert!(result.is_significant);
    assert!(result.p_value < 0.001);
    assert_relative_eq!(result.observed_diff, 0.08);
}

/// Identical EPC means are not significant
#[test]
fn test_epc_insignificance() {
    let engine = ExperimentEngine::default();

    let request: AnalysisRequest = EpcAnalysisRequest::new(5.0, 1.0, 100, 5.0, 1.0, 100).into();
    let first = engine.analyze(&request).unwrap();
    let second = engine.analyze(&request).unwrap();

    assert!(!first.is_significant);
    assert_eq!(first.observed_diff, 0.0);
    assert_eq!(format!("{:.4}", first.observed_diff), "0.0000");
    // No hidden state between calls
    assert_eq!(first, second);
}

/// Failures are returned and also delivered to the injected sink
#[test]
fn test_failures_reach_injected_sink() {
    let sink = Arc::new(RecordingSink::default());
    let engine = ExperimentEngine::default().with_sink(sink.clone());

    let zero_n = engine.analyze(&CrAnalysisRequest::new(0, 0, 100, 3).into());
    let flat = engine.analyze(&EpcAnalysisRequest::new(5.0, 0.0, 50, 5.0, 0.0, 50).into());

    assert_eq!(zero_n.unwrap_err().kind(), FailureKind::InvalidInput);
    assert_eq!(flat.unwrap_err().kind(), FailureKind::Degenerate);

    let messages = sink.messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("cr: "));
    assert!(messages[1].starts_with("epc: "));
}

/// Batch analysis matches one-by-one analysis
#[test]
fn test_batch_analysis_matches_single_calls() {
    let engine = ExperimentEngine::default();
    let requests: Vec<AnalysisRequest> = (0..32)
        .map(|i| CrAnalysisRequest::new(5000, 250, 5000, 250 + i * 3).into())
        .collect();

    let batch = engine.analyze_batch(&requests);
    let single: Vec<_> = requests.iter().map(|r| engine.analyze(r)).collect();

    assert_eq!(batch, single);
    assert!(!batch[0].as_ref().unwrap().is_significant);
    assert!(batch[31].as_ref().unwrap().is_significant);
}

/// Configuration drives request defaults end to end
#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("optisample-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "[planning]\npower = 0.9\ncr_mde_relative = 0.1\n\n[analysis]\nalpha = 0.01\n",
    )
    .unwrap();

    let engine = ExperimentEngine::from_config_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let request = engine.sample_size_request(MetricKind::Cr, 0.05);
    assert_eq!(request.mde_relative, Some(0.1));
    assert_relative_eq!(request.power, 0.9);

    let stricter = engine.plan(&request).unwrap();
    let default = ExperimentEngine::default()
        .plan(&SampleSizeRequest::conversion_rate(0.05).with_mde_relative(0.1))
        .unwrap();
    assert!(stricter.control_sample_size > default.control_sample_size);

    let verdict = engine
        .analyze(&engine.config().cr_analysis(1000, 100, 1000, 125))
        .unwrap();
    // p ~ 0.04 passes at 5% but not at the configured 1%
    assert!(!verdict.is_significant);
}

/// Invalid configuration files are rejected at load time
#[test]
fn test_invalid_config_file() {
    let path = std::env::temp_dir().join(format!("optisample-bad-{}.toml", std::process::id()));
    std::fs::write(&path, "[planning]\nnum_variants = 0\n").unwrap();

    let result = ExperimentEngine::from_config_file(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(result.is_err());
    assert!(ExperimentEngine::from_config_file("/nonexistent/optisample.toml").is_err());
    assert_eq!(EngineConfig::default(), *ExperimentEngine::default().config());
}

/// Simulated power of a default EPC plan lands near the target
#[test]
fn test_simulated_power() {
    let engine = ExperimentEngine::default();
    let request = SampleSizeRequest::revenue_per_visitor(12.0, 30.0).with_num_variants(2);
    let plan = engine.plan(&request).unwrap();

    let sim = engine
        .simulate_power(
            &request,
            &plan,
            &SimulationConfig {
                iterations: 4000,
                seed: Some(2024),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(sim.failures, 0);
    assert!(
        sim.empirical_power > 0.75 && sim.empirical_power < 0.86,
        "empirical power {}",
        sim.empirical_power
    );
}

/// Requests and results serialize to JSON for callers that ship them around
#[test]
fn test_json_interchange() {
    let engine = ExperimentEngine::default();
    let request: AnalysisRequest = serde_json::from_str(
        r#"{"metric": "epc", "control_mean": 5.0, "control_std_dev": 1.0, "control_n": 100,
            "variant_mean": 5.3, "variant_std_dev": 1.2, "variant_n": 120, "alpha": 0.1}"#,
    )
    .unwrap();

    let result = engine.analyze(&request).unwrap();
    let json = serde_json::to_value(result).unwrap();

    assert_eq!(json["is_significant"], true);
    assert_relative_eq!(json["observed_diff"].as_f64().unwrap(), 0.3);
}
