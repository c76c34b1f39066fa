use std::collections::HashMap;
use std::hash::Hash;

use log::info;
use rand::distributions::Uniform;
use rand::Rng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::math::linalg::{check_points, squared_euclidean};

/// A k-NN classifier that stores training data and performs majority-vote classification.
///
/// # Tie rules
///
/// - Neighbors at equal distance keep their training order (stable selection).
/// - When several labels share the highest vote count, the winner is the tied
///   label whose nearest representative is closest to the query, i.e. the one
///   that appears first in the neighbor list.
#[derive(Debug, Clone)]
pub struct KNNClassifier<L: Eq + Hash + Clone> {
    k: usize,
    features: Vec<Vec<f64>>,
    labels: Vec<L>,
}

impl<L: Eq + Hash + Clone> KNNClassifier<L> {
    /// Constructs a new `KNNClassifier`.
    ///
    /// Fails if the training set is empty or ragged, if `features` and `labels`
    /// differ in length, or if `k` is not in `1..=features.len()`.
    pub fn new(k: usize, features: Vec<Vec<f64>>, labels: Vec<L>) -> Result<Self> {
        check_points(&features)?;
        if labels.len() != features.len() {
            return Err(Error::DimensionMismatch {
                expected: features.len(),
                found: labels.len(),
            });
        }
        check_k(k, features.len())?;
        Ok(Self {
            k,
            features,
            labels,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Predict the label for a single query point using majority vote among its `k` nearest neighbors.
    ///
    /// # Example
    ///
    /// ```
    /// use estimators::ml::classic::KNNClassifier;
    ///
    /// let features = vec![
    ///     vec![1.0, 2.0],
    ///     vec![2.0, 3.0],
    ///     vec![3.0, 3.0],
    ///     vec![6.0, 7.0],
    /// ];
    /// let labels = vec!["A", "A", "B", "B"];
    ///
    /// let knn = KNNClassifier::new(3, features, labels).unwrap();
    /// assert_eq!(knn.predict(&[2.1, 2.9]).unwrap(), "A");
    /// ```
    pub fn predict(&self, point: &[f64]) -> Result<L> {
        let neighbors = self.neighbors(point)?;
        Ok(majority_vote(neighbors.iter().map(|&i| &self.labels[i])))
    }

    /// Predict labels for multiple query points at once.
    pub fn predict_batch(&self, points: &[Vec<f64>]) -> Result<Vec<L>> {
        points.iter().map(|p| self.predict(p)).collect()
    }

    /// Indices of the `k` nearest training points, nearest first.
    pub fn neighbors(&self, point: &[f64]) -> Result<Vec<usize>> {
        self.check_query(point)?;
        let mut order = self.ordering(point);
        order.truncate(self.k);
        Ok(order)
    }

    fn check_query(&self, point: &[f64]) -> Result<()> {
        let dim = self.features[0].len();
        if point.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: point.len(),
            });
        }
        Ok(())
    }

    /// All training indices sorted by distance to `point`. The sort is stable,
    /// so equal distances keep training order.
    fn ordering(&self, point: &[f64]) -> Vec<usize> {
        let mut dists: Vec<(f64, usize)> = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (squared_euclidean(f, point), i))
            .collect();
        dists.sort_by(|(d1, _), (d2, _)| d1.total_cmp(d2));
        dists.into_iter().map(|(_, i)| i).collect()
    }
}

fn check_k(k: usize, n: usize) -> Result<()> {
    if k == 0 || k > n {
        return Err(Error::invalid(
            "k",
            format!("k = {k} must be between 1 and the training set size {n}"),
        ));
    }
    Ok(())
}

/// Majority vote over labels given nearest first. Ties go to the tied label
/// seen first.
fn majority_vote<'a, L, I>(labels: I) -> L
where
    L: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = &'a L>,
{
    // Counts kept in first-seen order; the map only locates a label's slot.
    let mut slots = HashMap::<&L, usize>::new();
    let mut counts: Vec<(&L, usize)> = Vec::new();
    for label in labels {
        match slots.get(label) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                slots.insert(label, counts.len());
                counts.push((label, 1));
            }
        }
    }

    let mut best = counts[0];
    for &entry in &counts[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best.0.clone()
}

/// Fraction of predictions equal to the true label.
pub fn accuracy<L: PartialEq>(predicted: &[L], truth: &[L]) -> Result<f64> {
    if truth.is_empty() {
        return Err(Error::EmptyInput);
    }
    if predicted.len() != truth.len() {
        return Err(Error::DimensionMismatch {
            expected: truth.len(),
            found: predicted.len(),
        });
    }
    let correct = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    Ok(correct as f64 / truth.len() as f64)
}

/// Configuration for [`accuracy_sweep`].
#[derive(Debug, Clone, PartialEq)]
pub struct KnnSweepConfig {
    /// Largest k evaluated; the sweep covers `1..=max_k`.
    pub max_k: usize,
}

impl Default for KnnSweepConfig {
    fn default() -> Self {
        Self { max_k: 30 }
    }
}

impl KnnSweepConfig {
    pub fn with_max_k(mut self, max_k: usize) -> Self {
        self.max_k = max_k;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KAccuracy {
    pub k: usize,
    pub accuracy: f64,
}

/// Held-out accuracy for every k plus the best k (first one if tied).
#[derive(Debug, Clone, PartialEq)]
pub struct KnnSweep {
    pub accuracies: Vec<KAccuracy>,
    pub best_k: usize,
    pub best_accuracy: f64,
}

/// Evaluates k-NN on a held-out set for `k = 1..=config.max_k`.
///
/// Each query's neighbor ordering is computed once and shared by every k.
pub fn accuracy_sweep<L>(
    train_features: &[Vec<f64>],
    train_labels: &[L],
    test_features: &[Vec<f64>],
    test_labels: &[L],
    config: &KnnSweepConfig,
) -> Result<KnnSweep>
where
    L: Eq + Hash + Clone + Send + Sync,
{
    let dim = check_points(train_features)?;
    if train_labels.len() != train_features.len() {
        return Err(Error::DimensionMismatch {
            expected: train_features.len(),
            found: train_labels.len(),
        });
    }
    check_k(config.max_k, train_features.len())?;
    let test_dim = check_points(test_features)?;
    if test_dim != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: test_dim,
        });
    }
    if test_labels.len() != test_features.len() {
        return Err(Error::DimensionMismatch {
            expected: test_features.len(),
            found: test_labels.len(),
        });
    }

    let classifier = KNNClassifier::new(
        config.max_k,
        train_features.to_vec(),
        train_labels.to_vec(),
    )?;
    let orderings: Vec<Vec<usize>> = test_features
        .par_iter()
        .map(|q| {
            let mut order = classifier.ordering(q);
            order.truncate(config.max_k);
            order
        })
        .collect();

    let accuracies: Vec<KAccuracy> = (1..=config.max_k)
        .into_par_iter()
        .map(|k| {
            let correct = orderings
                .iter()
                .zip(test_labels)
                .filter(|(order, truth)| {
                    majority_vote(order[..k].iter().map(|&i| &train_labels[i])) == **truth
                })
                .count();
            KAccuracy {
                k,
                accuracy: correct as f64 / test_labels.len() as f64,
            }
        })
        .collect();

    let mut best = &accuracies[0];
    for entry in &accuracies[1..] {
        if entry.accuracy > best.accuracy {
            best = entry;
        }
    }
    info!(
        "k-NN sweep over k = 1..={}: best k = {} with accuracy {:.4}",
        config.max_k, best.k, best.accuracy
    );

    Ok(KnnSweep {
        best_k: best.k,
        best_accuracy: best.accuracy,
        accuracies,
    })
}

/// Draws `n` points uniformly on `[-3, 3]^2`, labelled `true` when the point lies
/// above the wiggly boundary `x2 = sin(4 * x1) + x1`.
pub fn synthetic_boundary_dataset<R: Rng + ?Sized>(
    n: usize,
    rng: &mut R,
) -> (Vec<Vec<f64>>, Vec<bool>) {
    let uniform = Uniform::new_inclusive(-3.0, 3.0);
    let features: Vec<Vec<f64>> = (0..n)
        .map(|_| vec![rng.sample(uniform), rng.sample(uniform)])
        .collect();
    let labels = features
        .iter()
        .map(|p| p[1] > (4.0 * p[0]).sin() + p[0])
        .collect();
    (features, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded_rng;

    #[test]
    fn test_basic_knn() {
        let features = vec![
            vec![1.0, 2.0],
            vec![2.0, 3.0],
            vec![2.5, 2.7],
            vec![10.0, 10.0],
        ];
        let labels = vec!["A", "A", "B", "B"];

        let knn = KNNClassifier::new(3, features, labels).unwrap();

        // 2 of the 3 nearest neighbors are A
        assert_eq!(knn.predict(&[2.1, 2.9]).unwrap(), "A");
        assert_eq!(knn.predict(&[9.5, 9.7]).unwrap(), "B");
    }

    #[test]
    fn test_k_one_is_nearest_label() {
        let features = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![5.0, 5.0],
            vec![6.0, 5.0],
        ];
        let labels = vec![0, 0, 1, 1];
        let knn = KNNClassifier::new(1, features.clone(), labels.clone()).unwrap();

        for query in [[0.2, 0.1], [0.9, 0.3], [4.0, 4.0], [5.8, 5.1], [3.0, 2.9]] {
            let nearest = (0..features.len())
                .min_by(|&a, &b| {
                    squared_euclidean(&features[a], &query)
                        .total_cmp(&squared_euclidean(&features[b], &query))
                })
                .unwrap();
            assert_eq!(knn.predict(&query).unwrap(), labels[nearest]);
        }
    }

    #[test]
    fn test_invalid_k() {
        let features = vec![vec![0.0], vec![1.0]];
        assert!(KNNClassifier::new(3, features.clone(), vec![1, 2]).is_err());
        assert!(KNNClassifier::new(0, features, vec![1, 2]).is_err());
    }

    #[test]
    fn test_invalid_training_data() {
        let empty: Vec<Vec<f64>> = vec![];
        assert_eq!(
            KNNClassifier::<u8>::new(1, empty, vec![]).unwrap_err(),
            Error::EmptyInput
        );
        assert!(KNNClassifier::new(1, vec![vec![0.0]], vec![1, 2]).is_err());
        let knn = KNNClassifier::new(1, vec![vec![0.0, 0.0]], vec![1]).unwrap();
        assert!(knn.predict(&[0.0]).is_err());
    }

    #[test]
    fn test_label_tie_goes_to_nearest() {
        let features = vec![vec![0.0], vec![1.0], vec![2.5], vec![3.0]];
        let knn = KNNClassifier::new(2, features.clone(), vec!["A", "B", "A", "B"]).unwrap();
        // Neighbors of 0.9: B (0.1) then A (0.9).
        assert_eq!(knn.predict(&[0.9]).unwrap(), "B");
        // Neighbors of 0.1: A (0.1) then B (0.9).
        assert_eq!(knn.predict(&[0.1]).unwrap(), "A");
    }

    #[test]
    fn test_equal_distances_keep_training_order() {
        let features = vec![vec![1.0], vec![-1.0], vec![1.0]];
        let knn = KNNClassifier::new(2, features, vec!["x", "y", "z"]).unwrap();
        assert_eq!(knn.neighbors(&[0.0]).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[1, 0, 1, 1], &[1, 1, 1, 1]).unwrap(), 0.75);
        assert!(accuracy::<u8>(&[], &[]).is_err());
        assert!(accuracy(&[1], &[1, 1]).is_err());
    }

    #[test]
    fn test_sweep_on_synthetic_boundary() {
        let mut rng = seeded_rng(Some(42));
        let (train_x, train_y) = synthetic_boundary_dataset(100, &mut rng);
        let mut rng = seeded_rng(Some(20));
        let (test_x, test_y) = synthetic_boundary_dataset(100, &mut rng);

        let config = KnnSweepConfig::default();
        let sweep = accuracy_sweep(&train_x, &train_y, &test_x, &test_y, &config).unwrap();
        assert_eq!(sweep.accuracies.len(), 30);
        assert!(sweep.best_accuracy > 0.7);

        // First occurrence of the maximum.
        let first = sweep
            .accuracies
            .iter()
            .find(|a| a.accuracy == sweep.best_accuracy)
            .unwrap();
        assert_eq!(first.k, sweep.best_k);

        // Sweep agrees with the classifier for an arbitrary k.
        let knn = KNNClassifier::new(7, train_x.clone(), train_y.clone()).unwrap();
        let predicted = knn.predict_batch(&test_x).unwrap();
        assert_eq!(
            accuracy(&predicted, &test_y).unwrap(),
            sweep.accuracies[6].accuracy
        );
    }

    #[test]
    fn test_sweep_rejects_large_k() {
        let train = vec![vec![0.0], vec![1.0]];
        let config = KnnSweepConfig::default().with_max_k(3);
        assert!(accuracy_sweep(&train, &[1, 2], &train, &[1, 2], &config).is_err());
    }

    #[test]
    fn test_synthetic_labels() {
        let mut rng = seeded_rng(None);
        let (x, y) = synthetic_boundary_dataset(50, &mut rng);
        assert_eq!(x.len(), 50);
        for (p, label) in x.iter().zip(&y) {
            assert!(p.iter().all(|v| (-3.0..=3.0).contains(v)));
            assert_eq!(*label, p[1] > (4.0 * p[0]).sin() + p[0]);
        }
    }
}
