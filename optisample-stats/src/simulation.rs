//! Power Simulation
//!
//! Monte-Carlo check of a sample size plan: replay the planned experiment many
//! times under the alternative hypothesis (variant = baseline + MDE), analyze
//! each replica at the Bonferroni-adjusted level and count detections.

use crate::DEFAULT_SIMULATION_ITERATIONS;
use crate::analysis::{AnalysisRequest, Arm, CrAnalysisRequest, EpcAnalysisRequest, run_test};
use crate::metric::MetricKind;
use crate::planner::{InvalidParameter, SampleSizeRequest, SampleSizeResult, resolve};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, thread_rng};
use rayon::prelude::*;
use statrs::distribution::Normal;
use tracing::debug;

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of simulated experiments (default: 10,000)
    pub iterations: usize,
    /// Seed for reproducible runs; fresh entropy when unset
    pub seed: Option<u64>,
    /// Whether to use parallel computation
    pub parallel: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_SIMULATION_ITERATIONS,
            seed: None,
            parallel: true,
        }
    }
}

/// Outcome of a power simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationResult {
    /// Number of simulated experiments
    pub iterations: usize,
    /// Replicas whose analysis was significant
    pub detections: usize,
    /// Replicas whose analysis failed (counted as misses)
    pub failures: usize,
    /// `detections / iterations`
    pub empirical_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replica {
    Detected,
    Missed,
    Failed,
}

/// Sampling distribution of one arm's summary statistic
#[derive(Debug, Clone, Copy)]
struct ArmSampler {
    n: u64,
    distribution: Normal,
}

impl ArmSampler {
    /// Binomial(n, p) count via its normal approximation
    fn conversions(arm: Arm, n: u64, p: f64) -> Result<Self, InvalidParameter> {
        let trials = n as f64;
        let std_dev = (trials * p * (1.0 - p)).sqrt();
        Self::new(arm, n, trials * p, std_dev)
    }

    /// Mean of `n` observations with population mean `mu` and deviation `sigma`
    fn sample_mean(arm: Arm, n: u64, mu: f64, sigma: f64) -> Result<Self, InvalidParameter> {
        Self::new(arm, n, mu, sigma / (n as f64).sqrt())
    }

    fn new(arm: Arm, n: u64, mean: f64, std_dev: f64) -> Result<Self, InvalidParameter> {
        let degenerate = InvalidParameter::DegenerateArm { arm, mean, std_dev };
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(degenerate);
        }
        let distribution = Normal::new(mean, std_dev).map_err(|_| degenerate)?;
        Ok(Self { n, distribution })
    }

    /// Conversion count clamped to `[0, n]`
    fn draw_count<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        self.distribution.sample(rng).round().clamp(0.0, self.n as f64) as u64
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.distribution.sample(rng)
    }
}

/// Ground truth for one planned experiment
#[derive(Debug, Clone, Copy)]
struct Scenario {
    metric: MetricKind,
    control: ArmSampler,
    variant: ArmSampler,
    std_dev: f64,
    alpha: f64,
}

impl Scenario {
    fn run_replica<R: Rng + ?Sized>(&self, rng: &mut R) -> Replica {
        let request: AnalysisRequest = match self.metric {
            MetricKind::Cr => CrAnalysisRequest::new(
                self.control.n,
                self.control.draw_count(rng),
                self.variant.n,
                self.variant.draw_count(rng),
            )
            .with_alpha(self.alpha)
            .into(),
            MetricKind::Epc => EpcAnalysisRequest::new(
                self.control.draw(rng),
                self.std_dev,
                self.control.n,
                self.variant.draw(rng),
                self.std_dev,
                self.variant.n,
            )
            .with_alpha(self.alpha)
            .into(),
        };

        match run_test(&request) {
            Ok(result) if result.is_significant => Replica::Detected,
            Ok(_) => Replica::Missed,
            Err(_) => Replica::Failed,
        }
    }
}

/// Estimate the power a plan actually achieves
///
/// The request supplies the true baseline and effect; the plan supplies the arm
/// sizes, which may be overridden to explore under- or over-sized designs.
pub fn simulate_power(
    request: &SampleSizeRequest,
    plan: &SampleSizeResult,
    config: &SimulationConfig,
) -> Result<SimulationResult, InvalidParameter> {
    if config.iterations == 0 {
        return Err(InvalidParameter::NoIterations);
    }
    let resolved = resolve(request)?;

    let control_value = request.control_baseline;
    let variant_value = request.control_baseline + resolved.mde_absolute;
    let control_n = plan.control_sample_size;
    let variant_n = plan.variant_sample_size_per_variant;
    let std_dev = request.control_std_dev.unwrap_or(0.0);

    let (control, variant) = match request.metric {
        MetricKind::Cr => (
            ArmSampler::conversions(Arm::Control, control_n, control_value)?,
            ArmSampler::conversions(Arm::Variant, variant_n, variant_value)?,
        ),
        MetricKind::Epc => (
            ArmSampler::sample_mean(Arm::Control, control_n, control_value, std_dev)?,
            ArmSampler::sample_mean(Arm::Variant, variant_n, variant_value, std_dev)?,
        ),
    };

    let scenario = Scenario {
        metric: request.metric,
        control,
        variant,
        std_dev,
        alpha: resolved.adjusted_alpha,
    };

    let replicas = if config.parallel {
        run_parallel(&scenario, config.iterations, config.seed)
    } else {
        run_serial(&scenario, config.iterations, config.seed)
    };

    let detections = replicas.iter().filter(|&&r| r == Replica::Detected).count();
    let failures = replicas.iter().filter(|&&r| r == Replica::Failed).count();
    let empirical_power = detections as f64 / config.iterations as f64;

    debug!(
        metric = %request.metric,
        iterations = config.iterations,
        detections,
        failures,
        empirical_power,
        "Simulated power"
    );

    Ok(SimulationResult {
        iterations: config.iterations,
        detections,
        failures,
        empirical_power,
    })
}

/// Run replicas using parallel iteration (Rayon)
fn run_parallel(scenario: &Scenario, iterations: usize, seed: Option<u64>) -> Vec<Replica> {
    match seed {
        // Per-replica seeding keeps results independent of scheduling
        Some(seed) => (0..iterations)
            .into_par_iter()
            .map(|i| scenario.run_replica(&mut replica_rng(seed, i)))
            .collect(),
        None => (0..iterations)
            .into_par_iter()
            .map_init(thread_rng, |rng, _| scenario.run_replica(rng))
            .collect(),
    }
}

/// Run replicas serially (for testing or small runs)
fn run_serial(scenario: &Scenario, iterations: usize, seed: Option<u64>) -> Vec<Replica> {
    match seed {
        Some(seed) => (0..iterations)
            .map(|i| scenario.run_replica(&mut replica_rng(seed, i)))
            .collect(),
        None => {
            let mut rng = thread_rng();
            (0..iterations).map(|_| scenario.run_replica(&mut rng)).collect()
        }
    }
}

/// Golden-ratio multiplier spreading replica indices across the seed space
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

fn replica_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_mul(SEED_MIX)
}

fn replica_rng(seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(replica_seed(seed, index))
}
