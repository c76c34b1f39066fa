use estimators::math::monte_carlo::metropolis_hastings::MetropolisConfig;
use estimators::ml::classic::bayesian_logit::conjoint_proposal_sd;
use estimators::ml::classic::k_means::kmeans;
use estimators::ml::classic::k_nearest::synthetic_boundary_dataset;
use estimators::ml::classic::{
    accuracy_sweep, evaluate_k_range, fit_bayes, fit_mle, simulate_conjoint, ConjointEncoder,
    IndependentNormalPrior, KMeansConfig, KnnSweepConfig, MleConfig, SimulationConfig,
};
use estimators::{seeded_rng, Error, Result};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Three Gaussian blobs in (bill length, flipper length) units.
fn blobs(rng: &mut impl Rng) -> Result<Vec<Vec<f64>>> {
    let centers = [(40.0, 190.0), (48.0, 195.0), (47.0, 217.0)];
    let mut data = Vec::new();
    for &(x, y) in &centers {
        let nx = Normal::new(x, 2.5).map_err(|e| Error::invalid("sd", e.to_string()))?;
        let ny = Normal::new(y, 6.0).map_err(|e| Error::invalid("sd", e.to_string()))?;
        for _ in 0..60 {
            data.push(vec![nx.sample(rng), ny.sample(rng)]);
        }
    }
    Ok(data)
}

fn main() -> Result<()> {
    env_logger::init();

    println!("== k-means");
    let data = blobs(&mut seeded_rng(Some(1)))?;
    let result = kmeans(&data, &KMeansConfig::new(3).with_seed(7))?;
    println!(
        "k = 3: {} passes, converged: {}, wcss {:.2}",
        result.iterations,
        result.converged,
        result.wcss()
    );
    for (i, c) in result.centroids.iter().enumerate() {
        println!("  centroid {i}: ({:.2}, {:.2})", c[0], c[1]);
    }
    for eval in evaluate_k_range(&data, 1..=7, &KMeansConfig::new(1).with_seed(7))? {
        let silhouette = eval
            .silhouette
            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
        println!(
            "  k = {}: wcss {:>10.2}  silhouette {}",
            eval.k, eval.wcss, silhouette
        );
    }

    println!("== k-nearest neighbors");
    let (train_x, train_y) = synthetic_boundary_dataset(100, &mut seeded_rng(Some(42)));
    let (test_x, test_y) = synthetic_boundary_dataset(100, &mut seeded_rng(Some(20)));
    let sweep = accuracy_sweep(
        &train_x,
        &train_y,
        &test_x,
        &test_y,
        &KnnSweepConfig::default(),
    )?;
    for entry in &sweep.accuracies {
        println!("  k = {:>2}: accuracy {:.2}", entry.k, entry.accuracy);
    }
    println!(
        "best k = {} with accuracy {:.2}",
        sweep.best_k, sweep.best_accuracy
    );

    println!("== multinomial logit");
    let simulation = SimulationConfig::default();
    let rows = simulate_conjoint(&simulation, &mut seeded_rng(Some(123)))?;
    let encoder = ConjointEncoder::fit(&rows)?;
    let table = encoder.encode(&rows)?;
    let names = encoder.feature_names();
    let truth = simulation.true_coefficients();

    let mle = fit_mle(&table, &MleConfig::default())?;
    println!(
        "MLE ({:?}), log-likelihood {:.3}",
        mle.status, mle.log_likelihood
    );
    for i in 0..names.len() {
        println!(
            "  {:<10} true {:>6.3}  est {:>7.4}  se {:.4}  95% CI [{:.4}, {:.4}]",
            names[i], truth[i], mle.estimates[i], mle.std_errors[i], mle.lower[i], mle.upper[i]
        );
    }

    let prior = IndependentNormalPrior::conjoint_default(names.len())?;
    let config = MetropolisConfig::new(conjoint_proposal_sd(names.len())).with_seed(2024);
    let bayes = fit_bayes(&table, prior, &config)?;
    println!(
        "Metropolis-Hastings: {} draws, {} retained, acceptance rate {:.3}",
        bayes.chain.len(),
        bayes.chain.len() - config.burn_in,
        bayes.acceptance_rate
    );
    for (name, s) in names.iter().zip(&bayes.summary) {
        println!(
            "  {:<10} mean {:>7.4}  sd {:.4}  95% CrI [{:.4}, {:.4}]",
            name, s.mean, s.sd, s.lower, s.upper
        );
    }

    Ok(())
}
