pub mod linalg;
pub mod monte_carlo;
pub mod optimization;

pub use optimization::{
    bfgs_minimize, finite_difference, ObjectiveFunction, OptimizationConfig, OptimizationResult,
};

pub use monte_carlo::metropolis_hastings::{
    metropolis_hastings, run_chains, Chain, MetropolisConfig, ParameterSummary,
};
