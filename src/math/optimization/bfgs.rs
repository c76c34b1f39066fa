use log::{debug, warn};
use num_traits::Float;
use std::fmt::Debug;

use crate::math::optimization::finite_difference;
use crate::math::optimization::{ObjectiveFunction, OptimizationConfig, OptimizationResult};

/// Minimizes an objective function using the BFGS (Broyden–Fletcher–Goldfarb–Shanno) method.
///
/// BFGS is a quasi-Newton method that approximates the inverse Hessian from successive
/// gradient differences. Objectives without an analytic gradient are differentiated
/// numerically. Steps come from a backtracking line search on the Armijo condition;
/// the inverse Hessian is only updated when the curvature `yᵀs` is positive, which
/// keeps the approximation positive definite.
///
/// The run stops with `converged == true` once the gradient norm falls below
/// `tolerance * max(1, |f|)`, and with `converged == false` when the iteration limit
/// runs out or no step along the search direction decreases `f`.
///
/// # Examples
///
/// ```
/// use estimators::math::optimization::{ObjectiveFunction, OptimizationConfig};
/// use estimators::math::optimization::bfgs::minimize;
///
/// struct Quadratic;
///
/// impl ObjectiveFunction<f64> for Quadratic {
///     fn evaluate(&self, point: &[f64]) -> f64 {
///         point.iter().map(|x| x * x).sum()
///     }
///
///     fn gradient(&self, point: &[f64]) -> Option<Vec<f64>> {
///         Some(point.iter().map(|x| 2.0 * x).collect())
///     }
/// }
///
/// let result = minimize(&Quadratic, &[1.0, 1.0], &OptimizationConfig::default());
/// assert!(result.converged);
/// ```
pub fn minimize<T>(
    f: &impl ObjectiveFunction<T>,
    initial_point: &[T],
    config: &OptimizationConfig<T>,
) -> OptimizationResult<T>
where
    T: Float + Debug,
{
    let n = initial_point.len();
    let mut current_point = initial_point.to_vec();
    let mut current_value = f.evaluate(&current_point);
    let mut gradient = gradient_at(f, &current_point);
    let mut iterations = 0;
    let mut converged = false;

    // Inverse Hessian approximation, rescaled after the first accepted step.
    let mut h_inv = identity::<T>(n);
    let mut scaled = false;

    let c1 = T::from(1e-4).unwrap_or_else(T::epsilon); // sufficient decrease
    let shrink = T::from(0.5).unwrap_or_else(T::one);
    let max_line_search = 60;

    if !current_value.is_finite() {
        warn!("BFGS: objective is not finite at the starting point");
        return OptimizationResult {
            optimal_point: current_point,
            optimal_value: current_value,
            iterations,
            converged,
        };
    }

    while iterations < config.max_iterations {
        let gradient_norm = dot(&gradient, &gradient).sqrt();
        let scale = T::one().max(current_value.abs());
        if gradient_norm <= config.tolerance * scale {
            converged = true;
            break;
        }

        // p = -H⁻¹∇f
        let direction: Vec<T> = h_inv
            .iter()
            .map(|row| T::zero() - dot(row, &gradient))
            .collect();
        let directional_derivative = dot(&gradient, &direction);
        if directional_derivative >= T::zero() {
            // Lost descent; restart from steepest descent. A restart uses up an
            // iteration so a stalled search still ends.
            h_inv = identity(n);
            scaled = false;
            iterations += 1;
            continue;
        }

        // Backtracking line search on the Armijo condition.
        let mut alpha = config.learning_rate;
        let mut accepted = None;
        for _ in 0..max_line_search {
            let candidate: Vec<T> = current_point
                .iter()
                .zip(&direction)
                .map(|(&x, &d)| x + alpha * d)
                .collect();
            let value = f.evaluate(&candidate);
            if value <= current_value + c1 * alpha * directional_derivative {
                accepted = Some((candidate, value));
                break;
            }
            alpha = alpha * shrink;
        }

        let Some((new_point, new_value)) = accepted else {
            debug!("BFGS: line search found no decrease at iteration {iterations}");
            break;
        };

        let new_gradient = gradient_at(f, &new_point);
        let s: Vec<T> = new_point
            .iter()
            .zip(&current_point)
            .map(|(&x_new, &x_old)| x_new - x_old)
            .collect();
        let y: Vec<T> = new_gradient
            .iter()
            .zip(&gradient)
            .map(|(&g_new, &g_old)| g_new - g_old)
            .collect();
        let ys = dot(&y, &s);

        if ys > T::epsilon() * dot(&y, &y).sqrt() * dot(&s, &s).sqrt() {
            if !scaled {
                let gamma = ys / dot(&y, &y);
                h_inv = (0..n)
                    .map(|i| {
                        (0..n)
                            .map(|j| if i == j { gamma } else { T::zero() })
                            .collect()
                    })
                    .collect();
                scaled = true;
            }
            h_inv = bfgs_update(&h_inv, &s, &y, T::one() / ys);
        }

        current_point = new_point;
        current_value = new_value;
        gradient = new_gradient;
        iterations += 1;
    }

    debug!(
        "BFGS finished after {iterations} iterations (converged: {converged}), f = {current_value:?}"
    );

    OptimizationResult {
        optimal_point: current_point,
        optimal_value: current_value,
        iterations,
        converged,
    }
}

fn gradient_at<T: Float + Debug>(f: &impl ObjectiveFunction<T>, point: &[T]) -> Vec<T> {
    f.gradient(point)
        .unwrap_or_else(|| finite_difference::gradient(f, point))
}

fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b)
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

fn identity<T: Float>(n: usize) -> Vec<Vec<T>> {
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if i == j { T::one() } else { T::zero() })
                .collect()
        })
        .collect()
}

/// H' = (I - ρsyᵀ) H (I - ρysᵀ) + ρssᵀ
fn bfgs_update<T: Float>(h_inv: &[Vec<T>], s: &[T], y: &[T], rho: T) -> Vec<Vec<T>> {
    let n = s.len();
    // Hy and yᵀHy; H is symmetric so yᵀH = (Hy)ᵀ.
    let hy: Vec<T> = h_inv.iter().map(|row| dot(row, y)).collect();
    let yhy = dot(y, &hy);

    let mut next = vec![vec![T::zero(); n]; n];
    for i in 0..n {
        for j in 0..n {
            next[i][j] = h_inv[i][j] - rho * (s[i] * hy[j] + hy[i] * s[j])
                + (rho * rho * yhy + rho) * s[i] * s[j];
        }
    }
    next
}
