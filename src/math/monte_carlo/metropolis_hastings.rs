use log::{info, warn};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::{seeded_rng, DEFAULT_SEED};

/// Configuration for a random-walk Metropolis-Hastings run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetropolisConfig {
    /// Total number of iterations, burn-in included.
    pub iterations: usize,
    /// Leading draws dropped before summarizing.
    pub burn_in: usize,
    /// Standard deviation of the Normal step for each coordinate.
    pub proposal_sd: Vec<f64>,
    /// `None` uses [`DEFAULT_SEED`].
    pub seed: Option<u64>,
}

impl MetropolisConfig {
    /// 11 000 iterations with the first 1 000 discarded.
    pub fn new(proposal_sd: Vec<f64>) -> Self {
        Self {
            iterations: 11_000,
            burn_in: 1_000,
            proposal_sd,
            seed: None,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn validate(&self, initial: &[f64]) -> Result<()> {
        if initial.is_empty() {
            return Err(Error::EmptyInput);
        }
        if self.proposal_sd.len() != initial.len() {
            return Err(Error::DimensionMismatch {
                expected: initial.len(),
                found: self.proposal_sd.len(),
            });
        }
        if self.proposal_sd.iter().any(|sd| !sd.is_finite() || *sd < 0.0) {
            return Err(Error::invalid(
                "proposal_sd",
                "standard deviations must be finite and non-negative",
            ));
        }
        if self.iterations == 0 {
            return Err(Error::invalid("iterations", "must be at least 1"));
        }
        Ok(())
    }
}

/// Append-only record of a run: the state after every iteration, whether that
/// iteration moved the chain, and the log density of the recorded state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chain {
    draws: Vec<Vec<f64>>,
    accepted: Vec<bool>,
    log_density: Vec<f64>,
}

impl Chain {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            draws: Vec::with_capacity(capacity),
            accepted: Vec::with_capacity(capacity),
            log_density: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, draw: &[f64], accepted: bool, log_density: f64) {
        self.draws.push(draw.to_vec());
        self.accepted.push(accepted);
        self.log_density.push(log_density);
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[Vec<f64>] {
        &self.draws
    }

    pub fn accepted(&self) -> &[bool] {
        &self.accepted
    }

    pub fn log_density(&self) -> &[f64] {
        &self.log_density
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.iter().filter(|&&a| a).count()
    }

    /// Accepted moves over iterations; 0 for an empty chain.
    pub fn acceptance_rate(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.accepted_count() as f64 / self.len() as f64
        }
    }

    /// Draws after the first `burn_in`.
    pub fn retained(&self, burn_in: usize) -> Result<&[Vec<f64>]> {
        if burn_in >= self.len() {
            return Err(Error::invalid(
                "burn_in",
                format!("burn-in {burn_in} leaves nothing of a chain of {}", self.len()),
            ));
        }
        Ok(&self.draws[burn_in..])
    }

    /// Summary of every coordinate after dropping `burn_in` draws.
    pub fn summarize(&self, burn_in: usize) -> Result<Vec<ParameterSummary>> {
        summarize(self.retained(burn_in)?)
    }
}

/// Posterior summary of one coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSummary {
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator); NaN for a single draw.
    pub sd: f64,
    /// 2.5th percentile.
    pub lower: f64,
    /// 97.5th percentile.
    pub upper: f64,
}

/// Mean, standard deviation and 95% central interval of every coordinate.
pub fn summarize(draws: &[Vec<f64>]) -> Result<Vec<ParameterSummary>> {
    let first = draws.first().ok_or(Error::EmptyInput)?;
    let dim = first.len();
    if let Some(bad) = draws.iter().find(|d| d.len() != dim) {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: bad.len(),
        });
    }

    let n = draws.len() as f64;
    Ok((0..dim)
        .map(|i| {
            let mut values: Vec<f64> = draws.iter().map(|d| d[i]).collect();
            let mean = values.iter().sum::<f64>() / n;
            let sd = if values.len() < 2 {
                f64::NAN
            } else {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            };
            values.sort_by(f64::total_cmp);
            ParameterSummary {
                mean,
                sd,
                lower: percentile(&values, 0.025),
                upper: percentile(&values, 0.975),
            }
        })
        .collect())
}

/// Percentile of sorted `values`, interpolating linearly between order
/// statistics. NaN for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => return f64::NAN,
        1 => return sorted[0],
        _ => {}
    }
    let idx = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let frac = idx - lower as f64;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

/// Runs the sampler with a generator seeded from `config.seed`.
pub fn metropolis_hastings<F>(log_density: F, initial: &[f64], config: &MetropolisConfig) -> Result<Chain>
where
    F: Fn(&[f64]) -> f64,
{
    let mut rng = seeded_rng(config.seed);
    sample(log_density, initial, config, &mut rng)
}

/// Random-walk Metropolis-Hastings.
///
/// Every iteration proposes `x' = x + N(0, proposal_sd)` componentwise and accepts it
/// when `u < exp(log_density(x') - log_density(x))` for `u ~ U(0, 1)`. The state
/// after the decision is recorded whether or not the proposal was accepted. An
/// iteration counts as accepted only when the chain actually moves, so a zero
/// proposal scale yields a constant chain with acceptance rate 0.
///
/// The log density of the current state is cached; each iteration evaluates the
/// target once.
pub fn sample<F, R>(
    log_density: F,
    initial: &[f64],
    config: &MetropolisConfig,
    rng: &mut R,
) -> Result<Chain>
where
    F: Fn(&[f64]) -> f64,
    R: Rng + ?Sized,
{
    config.validate(initial)?;

    let mut current = initial.to_vec();
    let mut current_lp = log_density(&current);
    if current_lp.is_nan() {
        return Err(Error::invalid(
            "initial",
            "log density is NaN at the starting point",
        ));
    }

    let mut chain = Chain::with_capacity(config.iterations);
    let mut proposal = vec![0.0; current.len()];
    for _ in 0..config.iterations {
        for ((p, &x), &sd) in proposal.iter_mut().zip(&current).zip(&config.proposal_sd) {
            let z: f64 = rng.sample(StandardNormal);
            *p = x + sd * z;
        }
        let proposal_lp = log_density(&proposal);
        let alpha = (proposal_lp - current_lp).exp();
        let u: f64 = rng.gen();

        let moved = u < alpha && proposal != current;
        if moved {
            current.copy_from_slice(&proposal);
            current_lp = proposal_lp;
        }
        chain.push(&current, moved, current_lp);
    }

    let rate = chain.acceptance_rate();
    info!(
        "Metropolis-Hastings finished {} iterations, acceptance rate {:.3}",
        config.iterations, rate
    );
    if !(0.1..=0.9).contains(&rate) {
        warn!("acceptance rate {rate:.3} is outside [0.1, 0.9]; consider rescaling proposal_sd");
    }
    Ok(chain)
}

/// Runs one independent chain per starting point in parallel. Chain `i` draws from
/// its own generator seeded with `seed + i`.
pub fn run_chains<F>(
    log_density: F,
    initials: &[Vec<f64>],
    config: &MetropolisConfig,
) -> Result<Vec<Chain>>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    if initials.is_empty() {
        return Err(Error::EmptyInput);
    }
    let base_seed = config.seed.unwrap_or(DEFAULT_SEED);
    initials
        .par_iter()
        .enumerate()
        .map(|(i, initial)| {
            let mut rng = seeded_rng(Some(base_seed.wrapping_add(i as u64)));
            sample(&log_density, initial, config, &mut rng)
        })
        .collect()
}
