pub mod bayesian_logit;
pub mod conjoint;
pub mod k_means;
pub mod k_nearest;
pub mod multinomial_logit;

// Re-export public types and functions
pub use bayesian_logit::{fit_bayes, BayesFit, IndependentNormalPrior, LogPosterior};
pub use conjoint::{simulate_conjoint, ConjointEncoder, ConjointRow, DummyCoder, SimulationConfig};
pub use k_means::{
    evaluate_k_range, kmeans, kmeans_from_centroids, silhouette_score, wcss, KEvaluation,
    KMeansConfig, KMeansIteration, KMeansResult,
};
pub use k_nearest::{
    accuracy, accuracy_sweep, synthetic_boundary_dataset, KAccuracy, KNNClassifier, KnnSweep,
    KnnSweepConfig,
};
pub use multinomial_logit::{
    fit_mle, log_likelihood, FitStatus, MleConfig, MleFit, ObservationTable, TaskKey,
};
