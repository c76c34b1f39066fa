use ndarray::Array2;

use crate::error::{Error, Result};

/// Squared Euclidean distance between two points of the same dimension.
/// Comparisons use this form to skip the square root.
pub fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0, |acc, (&x, &y)| acc + (x - y).powi(2))
}

/// Euclidean distance between two points of the same dimension.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    squared_euclidean(a, b).sqrt()
}

/// Checks that `points` is non-empty and rectangular, returning the shared dimension.
pub(crate) fn check_points(points: &[Vec<f64>]) -> Result<usize> {
    let first = points.first().ok_or(Error::EmptyInput)?;
    let dim = first.len();
    if dim == 0 {
        return Err(Error::invalid(
            "points",
            "points must have at least one dimension",
        ));
    }
    for p in points {
        if p.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: p.len(),
            });
        }
    }
    Ok(dim)
}

/// Inverts a square matrix by Gauss-Jordan elimination with partial pivoting.
///
/// Returns `None` when the matrix is not square or is numerically singular
/// (a pivot falls below `n * EPSILON` times the largest entry).
pub fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let (n, m) = matrix.dim();
    if n != m || n == 0 {
        return None;
    }

    let scale = matrix.iter().fold(0.0_f64, |acc, &x| acc.max(x.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let threshold = scale * f64::EPSILON * n as f64;

    let mut a = matrix.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        // Partial pivot: bring the largest remaining entry of this column up.
        let pivot_row = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot_row, col]].abs() <= threshold {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                a.swap([pivot_row, j], [col, j]);
                inv.swap([pivot_row, j], [col, j]);
            }
        }

        let pivot = a[[col, col]];
        for j in 0..n {
            a[[col, j]] /= pivot;
            inv[[col, j]] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[[row, j]] -= factor * a[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }

    Some(inv)
}
