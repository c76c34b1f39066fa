use std::f64::consts::PI;

use log::info;

use crate::error::{Error, Result};
use crate::math::monte_carlo::metropolis_hastings::{
    metropolis_hastings, Chain, MetropolisConfig, ParameterSummary,
};
use crate::ml::classic::multinomial_logit::{log_likelihood, ObservationTable};

/// Independent zero-mean Normal priors, one standard deviation per coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentNormalPrior {
    sds: Vec<f64>,
}

impl IndependentNormalPrior {
    pub fn new(sds: Vec<f64>) -> Result<Self> {
        if sds.is_empty() {
            return Err(Error::EmptyInput);
        }
        if sds.iter().any(|sd| !sd.is_finite() || *sd <= 0.0) {
            return Err(Error::invalid(
                "sds",
                "prior standard deviations must be finite and positive",
            ));
        }
        Ok(Self { sds })
    }

    /// `N(0, √5)` for every coefficient except the last (price), which gets the
    /// tighter `N(0, 1)`.
    pub fn conjoint_default(n_params: usize) -> Result<Self> {
        if n_params == 0 {
            return Err(Error::EmptyInput);
        }
        let mut sds = vec![5.0_f64.sqrt(); n_params];
        sds[n_params - 1] = 1.0;
        Self::new(sds)
    }

    pub fn sds(&self) -> &[f64] {
        &self.sds
    }

    pub fn dimension(&self) -> usize {
        self.sds.len()
    }

    /// Sum of the Normal log densities of each coefficient.
    pub fn log_density(&self, beta: &[f64]) -> Result<f64> {
        if beta.len() != self.sds.len() {
            return Err(Error::DimensionMismatch {
                expected: self.sds.len(),
                found: beta.len(),
            });
        }
        Ok(beta
            .iter()
            .zip(&self.sds)
            .map(|(b, sd)| -0.5 * (2.0 * PI * sd * sd).ln() - b * b / (2.0 * sd * sd))
            .sum())
    }
}

/// Log-posterior of the multinomial logit: log-likelihood plus log-prior. Pure in `beta`.
#[derive(Debug, Clone)]
pub struct LogPosterior<'a> {
    table: &'a ObservationTable,
    prior: IndependentNormalPrior,
}

impl<'a> LogPosterior<'a> {
    pub fn new(table: &'a ObservationTable, prior: IndependentNormalPrior) -> Result<Self> {
        if prior.dimension() != table.n_features() {
            return Err(Error::DimensionMismatch {
                expected: table.n_features(),
                found: prior.dimension(),
            });
        }
        Ok(Self { table, prior })
    }

    pub fn evaluate(&self, beta: &[f64]) -> Result<f64> {
        Ok(log_likelihood(self.table, beta)? + self.prior.log_density(beta)?)
    }
}

/// Proposal scales for the conjoint model: 0.05 per coefficient, 0.005 for the
/// last (price).
pub fn conjoint_proposal_sd(n_params: usize) -> Vec<f64> {
    let mut sd = vec![0.05; n_params];
    if let Some(last) = sd.last_mut() {
        *last = 0.005;
    }
    sd
}

#[derive(Debug, Clone, PartialEq)]
pub struct BayesFit {
    /// Full chain, burn-in included.
    pub chain: Chain,
    /// Per-coefficient summary of the retained draws.
    pub summary: Vec<ParameterSummary>,
    pub acceptance_rate: f64,
}

/// Samples the posterior with random-walk Metropolis-Hastings started at zero and
/// summarizes the draws after burn-in.
pub fn fit_bayes(
    table: &ObservationTable,
    prior: IndependentNormalPrior,
    config: &MetropolisConfig,
) -> Result<BayesFit> {
    let posterior = LogPosterior::new(table, prior)?;
    if config.burn_in >= config.iterations {
        return Err(Error::invalid(
            "burn_in",
            format!(
                "burn-in {} must be smaller than the {} iterations",
                config.burn_in, config.iterations
            ),
        ));
    }

    let initial = vec![0.0; table.n_features()];
    let chain = metropolis_hastings(
        // The sampler validates dimensions up front, so evaluation cannot fail.
        |beta: &[f64]| posterior.evaluate(beta).unwrap_or(f64::NAN),
        &initial,
        config,
    )?;
    let summary = chain.summarize(config.burn_in)?;
    let acceptance_rate = chain.acceptance_rate();
    info!(
        "posterior means {:?} (acceptance rate {acceptance_rate:.3})",
        summary.iter().map(|s| s.mean).collect::<Vec<_>>()
    );

    Ok(BayesFit {
        chain,
        summary,
        acceptance_rate,
    })
}
