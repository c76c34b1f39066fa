//! Central finite differences for objectives that do not supply derivatives.

use num_traits::Float;
use std::fmt::Debug;

use crate::math::optimization::ObjectiveFunction;

fn step<T: Float>(x: T, base: T) -> T {
    base * T::one().max(x.abs())
}

/// Central-difference gradient with step `cbrt(eps) * max(1, |x_i|)`.
pub fn gradient<T, F>(f: &F, point: &[T]) -> Vec<T>
where
    T: Float + Debug,
    F: ObjectiveFunction<T> + ?Sized,
{
    let base = T::epsilon().cbrt();
    let two = T::one() + T::one();
    let mut x = point.to_vec();
    (0..point.len())
        .map(|i| {
            let h = step(point[i], base);
            x[i] = point[i] + h;
            let forward = f.evaluate(&x);
            x[i] = point[i] - h;
            let backward = f.evaluate(&x);
            x[i] = point[i];
            (forward - backward) / (two * h)
        })
        .collect()
}

/// Central-difference Hessian with step `eps^(1/4) * max(1, |x_i|)`.
///
/// Off-diagonal entries use the four-point stencil; the result is symmetric.
pub fn hessian<T, F>(f: &F, point: &[T]) -> Vec<Vec<T>>
where
    T: Float + Debug,
    F: ObjectiveFunction<T> + ?Sized,
{
    let n = point.len();
    let base = T::epsilon().sqrt().sqrt();
    let two = T::one() + T::one();
    let four = two + two;
    let h: Vec<T> = point.iter().map(|&x| step(x, base)).collect();
    let center = f.evaluate(point);
    let mut x = point.to_vec();
    let mut eval_at = |moves: &[(usize, T)]| {
        for &(i, d) in moves {
            x[i] = x[i] + d;
        }
        let value = f.evaluate(&x);
        for &(i, _) in moves {
            x[i] = point[i];
        }
        value
    };

    let mut out = vec![vec![T::zero(); n]; n];
    for i in 0..n {
        let plus = eval_at(&[(i, h[i])]);
        let minus = eval_at(&[(i, -h[i])]);
        out[i][i] = (plus - two * center + minus) / (h[i] * h[i]);

        for j in 0..i {
            let pp = eval_at(&[(i, h[i]), (j, h[j])]);
            let pm = eval_at(&[(i, h[i]), (j, -h[j])]);
            let mp = eval_at(&[(i, -h[i]), (j, h[j])]);
            let mm = eval_at(&[(i, -h[i]), (j, -h[j])]);
            let value = (pp - pm - mp + mm) / (four * h[i] * h[j]);
            out[i][j] = value;
            out[j][i] = value;
        }
    }
    out
}
