use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::math::linalg::{check_points, euclidean, squared_euclidean};
use crate::{seeded_rng, DEFAULT_SEED};

/// Configuration options for k-means clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    /// Number of clusters to find.
    pub k: usize,
    /// Maximum number of assignment/update passes.
    pub max_iterations: usize,
    /// Seed for centroid initialization. `None` uses [`DEFAULT_SEED`].
    pub seed: Option<u64>,
}

impl KMeansConfig {
    /// Create a new config with `max_iterations = 10` and no explicit seed.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 10,
            seed: None,
        }
    }

    /// Customize the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Fix the initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Snapshot of one assignment/update pass. Each pass owns fresh containers,
/// so the history can be inspected or plotted after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansIteration {
    /// 1-based pass number.
    pub iteration: usize,
    /// Cluster index (`0..k`) of every point after the assignment step.
    pub assignments: Vec<usize>,
    /// Centroids after the update step.
    pub centroids: Vec<Vec<f64>>,
    /// WCSS of the new assignment measured against the previous centroids.
    pub wcss_before_update: f64,
    /// WCSS of the new assignment measured against the updated centroids.
    pub wcss: f64,
}

/// Outcome of a k-means run. Non-convergence is not an error: the last pass is
/// reported with `converged == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Number of passes executed.
    pub iterations: usize,
    /// Whether the final pass left every centroid bit-for-bit unchanged.
    pub converged: bool,
    pub history: Vec<KMeansIteration>,
}

impl KMeansResult {
    /// Within-cluster sum of squares of the final partition.
    pub fn wcss(&self) -> f64 {
        self.history.last().map_or(0.0, |it| it.wcss)
    }
}

/// Diagnostics for one value of k in a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct KEvaluation {
    pub k: usize,
    pub wcss: f64,
    /// Mean silhouette; `None` when fewer than two clusters are populated.
    pub silhouette: Option<f64>,
    pub converged: bool,
    pub iterations: usize,
}

/// Runs k-means with centroids initialized from `config.k` distinct data points,
/// drawn with a generator seeded from `config.seed`.
///
/// # Example
///
/// ```
/// use estimators::ml::classic::k_means::{kmeans, KMeansConfig};
///
/// let data = vec![
///     vec![1.0, 2.0],
///     vec![1.5, 1.8],
///     vec![5.0, 8.0],
///     vec![8.0, 8.0],
/// ];
///
/// let result = kmeans(&data, &KMeansConfig::new(2).with_seed(7)).unwrap();
/// assert_eq!(result.assignments.len(), 4);
/// assert_eq!(result.centroids.len(), 2);
/// ```
pub fn kmeans(data: &[Vec<f64>], config: &KMeansConfig) -> Result<KMeansResult> {
    let mut rng = seeded_rng(config.seed);
    kmeans_with_rng(data, config, &mut rng)
}

/// Same as [`kmeans`], drawing the initial centroids from a caller-owned generator.
pub fn kmeans_with_rng<R: Rng + ?Sized>(
    data: &[Vec<f64>],
    config: &KMeansConfig,
    rng: &mut R,
) -> Result<KMeansResult> {
    let n = data.len();
    check_points(data)?;
    if config.k == 0 || config.k > n {
        return Err(Error::invalid(
            "k",
            format!("{} clusters requested for a dataset of size {}", config.k, n),
        ));
    }

    // Sample k distinct points without replacement.
    let centroids: Vec<Vec<f64>> = data.choose_multiple(rng, config.k).cloned().collect();
    run(data, centroids, config.max_iterations)
}

/// Runs k-means from caller-chosen initial centroids.
pub fn kmeans_from_centroids(
    data: &[Vec<f64>],
    initial_centroids: Vec<Vec<f64>>,
    max_iterations: usize,
) -> Result<KMeansResult> {
    let dim = check_points(data)?;
    let centroid_dim = check_points(&initial_centroids)?;
    if centroid_dim != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: centroid_dim,
        });
    }
    run(data, initial_centroids, max_iterations)
}

fn run(
    data: &[Vec<f64>],
    initial_centroids: Vec<Vec<f64>>,
    max_iterations: usize,
) -> Result<KMeansResult> {
    if max_iterations == 0 {
        return Err(Error::invalid("max_iterations", "must be at least 1"));
    }

    let k = initial_centroids.len();
    let mut centroids = initial_centroids;
    let mut history: Vec<KMeansIteration> = Vec::with_capacity(max_iterations);
    let mut converged = false;

    for iteration in 1..=max_iterations {
        let assignments = assign(data, &centroids);
        let wcss_before_update = within_cluster_ss(data, &assignments, &centroids);
        let (updated, empty) = update(data, &assignments, &centroids);
        let wcss = within_cluster_ss(data, &assignments, &updated);

        if empty > 0 {
            debug!("k-means pass {iteration}: {empty} of {k} clusters empty, keeping their centroids");
        }
        debug!("k-means pass {iteration}: wcss {wcss_before_update:.6} -> {wcss:.6}");

        let unchanged = same_bits(&centroids, &updated);
        history.push(KMeansIteration {
            iteration,
            assignments,
            centroids: updated.clone(),
            wcss_before_update,
            wcss,
        });
        centroids = updated;

        if unchanged {
            converged = true;
            info!("k-means with k = {k} converged after {iteration} passes");
            break;
        }
    }

    if !converged {
        warn!("k-means with k = {k} did not converge within {max_iterations} passes");
    }

    let iterations = history.len();
    let assignments = history
        .last()
        .map(|it| it.assignments.clone())
        .unwrap_or_default();

    Ok(KMeansResult {
        assignments,
        centroids,
        iterations,
        converged,
        history,
    })
}

/// Nearest centroid for every point; ties go to the lowest cluster index.
fn assign(data: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    data.iter()
        .map(|point| {
            let mut best_cluster = 0;
            let mut best_dist = f64::INFINITY;
            for (cluster_idx, centroid) in centroids.iter().enumerate() {
                let dist = squared_euclidean(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = cluster_idx;
                }
            }
            best_cluster
        })
        .collect()
}

/// Coordinate-wise means of each cluster. An empty cluster keeps its previous
/// centroid. Returns the new centroids and the number of empty clusters.
fn update(
    data: &[Vec<f64>],
    assignments: &[usize],
    centroids: &[Vec<f64>],
) -> (Vec<Vec<f64>>, usize) {
    let k = centroids.len();
    let dim = centroids[0].len();
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![0_usize; k];
    for (point, &c) in data.iter().zip(assignments) {
        counts[c] += 1;
        for (s, &x) in sums[c].iter_mut().zip(point) {
            *s += x;
        }
    }

    let mut empty = 0;
    let updated = sums
        .into_iter()
        .zip(counts)
        .zip(centroids)
        .map(|((sum, count), previous)| {
            if count == 0 {
                empty += 1;
                previous.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect();
    (updated, empty)
}

fn same_bits(a: &[Vec<f64>], b: &[Vec<f64>]) -> bool {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .all(|(x, y)| x.to_bits() == y.to_bits())
}

fn within_cluster_ss(data: &[Vec<f64>], assignments: &[usize], centroids: &[Vec<f64>]) -> f64 {
    data.iter()
        .zip(assignments)
        .map(|(point, &c)| squared_euclidean(point, &centroids[c]))
        .sum()
}

fn check_assignments(data: &[Vec<f64>], assignments: &[usize]) -> Result<()> {
    check_points(data)?;
    if assignments.len() != data.len() {
        return Err(Error::DimensionMismatch {
            expected: data.len(),
            found: assignments.len(),
        });
    }
    Ok(())
}

/// Total within-cluster sum of squared Euclidean distances.
pub fn wcss(data: &[Vec<f64>], assignments: &[usize], centroids: &[Vec<f64>]) -> Result<f64> {
    check_assignments(data, assignments)?;
    if let Some(&bad) = assignments.iter().find(|&&c| c >= centroids.len()) {
        return Err(Error::invalid(
            "assignments",
            format!("cluster {bad} has no centroid"),
        ));
    }
    Ok(within_cluster_ss(data, assignments, centroids))
}

/// Mean silhouette coefficient over all points.
///
/// For point `i`, `a` is the mean distance to the other members of its cluster
/// and `b` the smallest mean distance to the members of another cluster;
/// `s = (b - a) / max(a, b)`. A point alone in its cluster scores 0.
/// Returns `None` when fewer than two clusters have members.
pub fn silhouette_score(data: &[Vec<f64>], assignments: &[usize]) -> Result<Option<f64>> {
    check_assignments(data, assignments)?;

    let n_clusters = assignments.iter().max().map_or(0, |&m| m + 1);
    let mut sizes = vec![0_usize; n_clusters];
    for &c in assignments {
        sizes[c] += 1;
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return Ok(None);
    }

    let n = data.len();
    let total: f64 = (0..n)
        .map(|i| {
            let own = assignments[i];
            if sizes[own] == 1 {
                return 0.0;
            }
            let mut dist_sums = vec![0.0; n_clusters];
            for j in 0..n {
                if j != i {
                    dist_sums[assignments[j]] += euclidean(&data[i], &data[j]);
                }
            }
            let a = dist_sums[own] / (sizes[own] - 1) as f64;
            let b = (0..n_clusters)
                .filter(|&c| c != own && sizes[c] > 0)
                .map(|c| dist_sums[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let max_ab = a.max(b);
            if max_ab == 0.0 {
                0.0
            } else {
                (b - a) / max_ab
            }
        })
        .sum();

    Ok(Some(total / n as f64))
}

/// Re-runs k-means for every k in `ks` and reports WCSS and mean silhouette.
///
/// Runs are independent and execute in parallel; run `k` seeds its own generator
/// with `seed + k`, so the output does not depend on scheduling. No k is selected.
pub fn evaluate_k_range(
    data: &[Vec<f64>],
    ks: impl IntoIterator<Item = usize>,
    config: &KMeansConfig,
) -> Result<Vec<KEvaluation>> {
    let ks: Vec<usize> = ks.into_iter().collect();
    let base_seed = config.seed.unwrap_or(DEFAULT_SEED);

    ks.par_iter()
        .map(|&k| -> Result<KEvaluation> {
            let run_config = KMeansConfig {
                k,
                max_iterations: config.max_iterations,
                seed: Some(base_seed.wrapping_add(k as u64)),
            };
            let result = kmeans(data, &run_config)?;
            let silhouette = silhouette_score(data, &result.assignments)?;
            Ok(KEvaluation {
                k,
                wcss: result.wcss(),
                silhouette,
                converged: result.converged,
                iterations: result.iterations,
            })
        })
        .collect()
}
