pub mod bfgs;
pub mod finite_difference;

use num_traits::{Float, Zero};
use std::fmt::Debug;

pub use bfgs::minimize as bfgs_minimize;

/// A trait for objective functions that can be optimized.
pub trait ObjectiveFunction<T>
where
    T: Float + Debug,
{
    /// Evaluates the objective function at the given point.
    fn evaluate(&self, point: &[T]) -> T;

    /// Computes the gradient of the objective function at the given point.
    /// Returns None if the gradient is not available.
    fn gradient(&self, _point: &[T]) -> Option<Vec<T>> {
        None
    }

    /// Computes the Hessian matrix at the given point.
    /// Returns None if the Hessian is not available.
    fn hessian(&self, _point: &[T]) -> Option<Vec<Vec<T>>> {
        None
    }
}

/// Configuration options for optimization algorithms.
#[derive(Debug, Clone)]
pub struct OptimizationConfig<T>
where
    T: Float + Debug,
{
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence tolerance on the gradient norm, relative to `max(1, |f|)`
    pub tolerance: T,
    /// First step length tried by the line search
    pub learning_rate: T,
}

impl<T> Default for OptimizationConfig<T>
where
    T: Float + Debug + Zero,
{
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: T::from(1e-6).unwrap_or_else(T::epsilon),
            learning_rate: T::one(),
        }
    }
}

impl<T> OptimizationConfig<T>
where
    T: Float + Debug,
{
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: T) -> Self {
        self.learning_rate = learning_rate;
        self
    }
}

/// Result of an optimization process.
#[derive(Debug, Clone)]
pub struct OptimizationResult<T>
where
    T: Float + Debug,
{
    /// The optimal point found
    pub optimal_point: Vec<T>,
    /// The value of the objective function at the optimal point
    pub optimal_value: T,
    /// Number of iterations performed
    pub iterations: usize,
    /// Whether the optimization converged
    pub converged: bool,
}
