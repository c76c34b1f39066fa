use std::collections::BTreeMap;

use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{Error, Result};
use crate::math::linalg::invert;
use crate::math::optimization::{
    bfgs, finite_difference, ObjectiveFunction, OptimizationConfig,
};

/// Grouping key of a choice task: one respondent answering one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub respondent: u32,
    pub task: u32,
}

impl TaskKey {
    pub fn new(respondent: u32, task: u32) -> Self {
        Self { respondent, task }
    }
}

/// One numerically encoded alternative, one row per alternative as delivered upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternativeRow {
    pub key: TaskKey,
    pub features: Vec<f64>,
    pub chosen: bool,
}

/// The alternatives of one task (rows of `features`) and the index of the chosen one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceTask {
    key: TaskKey,
    features: Array2<f64>,
    chosen: usize,
}

impl ChoiceTask {
    pub fn key(&self) -> TaskKey {
        self.key
    }

    /// `J x P` design matrix, one row per alternative.
    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn chosen(&self) -> usize {
        self.chosen
    }

    pub fn n_alternatives(&self) -> usize {
        self.features.nrows()
    }

    /// Softmax choice probabilities under `beta`, stabilized by subtracting the
    /// largest utility before exponentiating.
    fn probabilities(&self, beta: ArrayView1<f64>) -> Array1<f64> {
        let utilities = self.features.dot(&beta);
        let max = utilities.fold(f64::NEG_INFINITY, |m, &u| m.max(u));
        let exp = utilities.mapv(|u| (u - max).exp());
        let total = exp.sum();
        exp / total
    }

    /// log P(chosen) = u_chosen - logsumexp(u).
    fn log_prob_chosen(&self, beta: ArrayView1<f64>) -> f64 {
        let utilities = self.features.dot(&beta);
        let max = utilities.fold(f64::NEG_INFINITY, |m, &u| m.max(u));
        let log_total = max + utilities.mapv(|u| (u - max).exp()).sum().ln();
        utilities[self.chosen] - log_total
    }
}

/// Validated choice data: every task has the same number of alternatives, the
/// same number of features and exactly one chosen alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    tasks: Vec<ChoiceTask>,
    n_alternatives: usize,
    n_features: usize,
}

impl ObservationTable {
    /// Groups rows by [`TaskKey`] and validates each group. Tasks come out ordered by
    /// key; alternatives keep their input order within a task.
    pub fn from_rows(rows: impl IntoIterator<Item = AlternativeRow>) -> Result<Self> {
        let mut groups: BTreeMap<TaskKey, Vec<AlternativeRow>> = BTreeMap::new();
        let mut n_features = None;
        for row in rows {
            let expected = *n_features.get_or_insert(row.features.len());
            if row.features.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    found: row.features.len(),
                });
            }
            groups.entry(row.key).or_default().push(row);
        }
        let n_features = n_features.ok_or(Error::EmptyInput)?;
        if n_features == 0 {
            return Err(Error::invalid("features", "alternatives need at least one feature"));
        }

        let mut n_alternatives = None;
        let mut tasks = Vec::with_capacity(groups.len());
        for (key, alternatives) in groups {
            let expected = *n_alternatives.get_or_insert(alternatives.len());
            if alternatives.len() != expected {
                return Err(Error::UnequalAlternatives {
                    respondent: key.respondent,
                    task: key.task,
                    expected,
                    found: alternatives.len(),
                });
            }

            let chosen: Vec<usize> = alternatives
                .iter()
                .enumerate()
                .filter(|(_, a)| a.chosen)
                .map(|(j, _)| j)
                .collect();
            if chosen.len() != 1 {
                return Err(Error::InvalidChoiceTask {
                    respondent: key.respondent,
                    task: key.task,
                    chosen: chosen.len(),
                });
            }

            let flat: Vec<f64> = alternatives
                .iter()
                .flat_map(|a| a.features.iter().copied())
                .collect();
            let features = Array2::from_shape_vec((expected, n_features), flat).map_err(|e| {
                Error::invalid("features", e.to_string())
            })?;
            tasks.push(ChoiceTask {
                key,
                features,
                chosen: chosen[0],
            });
        }

        Ok(Self {
            tasks,
            n_alternatives: n_alternatives.unwrap_or(0),
            n_features,
        })
    }

    pub fn tasks(&self) -> &[ChoiceTask] {
        &self.tasks
    }

    pub fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn n_alternatives(&self) -> usize {
        self.n_alternatives
    }

    /// Number of coefficients the model takes.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn check_beta(&self, beta: &[f64]) -> Result<()> {
        if beta.len() != self.n_features {
            return Err(Error::DimensionMismatch {
                expected: self.n_features,
                found: beta.len(),
            });
        }
        Ok(())
    }

    fn log_likelihood_unchecked(&self, beta: &[f64]) -> f64 {
        let beta = ArrayView1::from(beta);
        self.tasks.iter().map(|t| t.log_prob_chosen(beta)).sum()
    }
}

/// Choice probabilities of every alternative of `task` under `beta`.
pub fn choice_probabilities(task: &ChoiceTask, beta: &[f64]) -> Result<Array1<f64>> {
    let p = task.features.ncols();
    if beta.len() != p {
        return Err(Error::DimensionMismatch {
            expected: p,
            found: beta.len(),
        });
    }
    Ok(task.probabilities(ArrayView1::from(beta)))
}

/// Multinomial-logit log-likelihood: the sum over tasks of the log probability of
/// the chosen alternative.
pub fn log_likelihood(table: &ObservationTable, beta: &[f64]) -> Result<f64> {
    table.check_beta(beta)?;
    Ok(table.log_likelihood_unchecked(beta))
}

/// Gradient of the log-likelihood: `Σ_t (x_chosen - Σ_j p_j x_j)`.
pub fn log_likelihood_gradient(table: &ObservationTable, beta: &[f64]) -> Result<Vec<f64>> {
    table.check_beta(beta)?;
    let view = ArrayView1::from(beta);
    let mut gradient = Array1::<f64>::zeros(table.n_features);
    for task in &table.tasks {
        let p = task.probabilities(view);
        let expected = task.features.t().dot(&p);
        gradient += &task.features.row(task.chosen);
        gradient -= &expected;
    }
    Ok(gradient.to_vec())
}

/// Hessian of the negative log-likelihood: `Σ_t Σ_j p_j (x_j - x̄_t)(x_j - x̄_t)ᵀ`,
/// where `x̄_t` is the probability-weighted mean alternative of task `t`.
pub fn negative_log_likelihood_hessian(
    table: &ObservationTable,
    beta: &[f64],
) -> Result<Array2<f64>> {
    table.check_beta(beta)?;
    let view = ArrayView1::from(beta);
    let n = table.n_features;
    let mut hessian = Array2::<f64>::zeros((n, n));
    for task in &table.tasks {
        let p = task.probabilities(view);
        let mean = task.features.t().dot(&p);
        let centered = &task.features - &mean.view().insert_axis(Axis(0));
        let weighted = &centered * &p.view().insert_axis(Axis(1));
        hessian += &centered.t().dot(&weighted);
    }
    Ok(hessian)
}

/// The negative log-likelihood as an [`ObjectiveFunction`], with analytic derivatives.
/// Evaluating at a point of the wrong length yields NaN.
#[derive(Debug, Clone, Copy)]
pub struct NegLogLikelihood<'a> {
    table: &'a ObservationTable,
}

impl<'a> NegLogLikelihood<'a> {
    pub fn new(table: &'a ObservationTable) -> Self {
        Self { table }
    }
}

impl ObjectiveFunction<f64> for NegLogLikelihood<'_> {
    fn evaluate(&self, point: &[f64]) -> f64 {
        match self.table.check_beta(point) {
            Ok(()) => -self.table.log_likelihood_unchecked(point),
            Err(_) => f64::NAN,
        }
    }

    fn gradient(&self, point: &[f64]) -> Option<Vec<f64>> {
        log_likelihood_gradient(self.table, point)
            .ok()
            .map(|g| g.into_iter().map(|v| -v).collect())
    }

    fn hessian(&self, point: &[f64]) -> Option<Vec<Vec<f64>>> {
        negative_log_likelihood_hessian(self.table, point)
            .ok()
            .map(|h| h.outer_iter().map(|row| row.to_vec()).collect())
    }
}

/// How the curvature at the optimum is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HessianMethod {
    #[default]
    Analytic,
    /// Central finite differences of the negative log-likelihood.
    Numerical,
}

/// Configuration for [`fit_mle`].
#[derive(Debug, Clone)]
pub struct MleConfig {
    pub optimization: OptimizationConfig<f64>,
    /// Starting point; zeros when `None`.
    pub initial: Option<Vec<f64>>,
    pub hessian: HessianMethod,
    /// Normal quantile used for the confidence bounds.
    pub z: f64,
}

impl Default for MleConfig {
    fn default() -> Self {
        Self {
            optimization: OptimizationConfig::default(),
            initial: None,
            hessian: HessianMethod::Analytic,
            z: 1.96,
        }
    }
}

impl MleConfig {
    pub fn with_initial(mut self, initial: Vec<f64>) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_hessian(mut self, hessian: HessianMethod) -> Self {
        self.hessian = hessian;
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationConfig<f64>) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Quality of a maximum-likelihood fit. When the optimizer stops early the status
/// is `NotConverged` whatever the Hessian looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    NotConverged,
    /// The Hessian at the optimum could not be inverted (or its inverse has a
    /// non-positive diagonal); standard errors are NaN.
    SingularHessian,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MleFit {
    pub estimates: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// `estimate - z * se`
    pub lower: Vec<f64>,
    /// `estimate + z * se`
    pub upper: Vec<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub status: FitStatus,
}

impl MleFit {
    /// Turns a degraded fit into [`Error::FittingFailure`].
    pub fn ensure_converged(self) -> Result<Self> {
        match self.status {
            FitStatus::Converged => Ok(self),
            FitStatus::NotConverged => Err(Error::FittingFailure(format!(
                "optimizer did not converge after {} iterations",
                self.iterations
            ))),
            FitStatus::SingularHessian => Err(Error::FittingFailure(
                "Hessian at the optimum is singular".to_string(),
            )),
        }
    }
}

/// Maximum-likelihood estimates by BFGS minimization of the negative
/// log-likelihood, with standard errors `sqrt(diag(H⁻¹))` and `estimate ± z·se`
/// confidence bounds.
pub fn fit_mle(table: &ObservationTable, config: &MleConfig) -> Result<MleFit> {
    let n = table.n_features();
    let initial = config.initial.clone().unwrap_or_else(|| vec![0.0; n]);
    table.check_beta(&initial)?;
    let tolerance = config.optimization.tolerance;
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(Error::invalid(
            "tolerance",
            format!("{tolerance} must be finite and non-negative"),
        ));
    }

    let objective = NegLogLikelihood::new(table);
    let result = bfgs::minimize(&objective, &initial, &config.optimization);
    let estimates = result.optimal_point;

    let rows = match config.hessian {
        HessianMethod::Analytic => objective.hessian(&estimates).ok_or_else(|| {
            Error::invalid("hessian", "analytic Hessian unavailable at the optimum")
        })?,
        HessianMethod::Numerical => finite_difference::hessian(&objective, &estimates),
    };
    let hessian = Array2::from_shape_vec((n, n), rows.into_iter().flatten().collect())
        .map_err(|e| Error::invalid("hessian", e.to_string()))?;

    let std_errors: Option<Vec<f64>> = invert(&hessian).and_then(|inv| {
        let se: Vec<f64> = inv.diag().iter().map(|&v| v.sqrt()).collect();
        se.iter().all(|s| s.is_finite() && *s > 0.0).then_some(se)
    });

    let status = match (&std_errors, result.converged) {
        (_, false) => FitStatus::NotConverged,
        (None, true) => FitStatus::SingularHessian,
        (Some(_), true) => FitStatus::Converged,
    };
    let std_errors = std_errors.unwrap_or_else(|| vec![f64::NAN; n]);

    let lower = estimates
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| b - config.z * se)
        .collect();
    let upper = estimates
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| b + config.z * se)
        .collect();

    match status {
        FitStatus::Converged => info!(
            "MNL fit converged after {} iterations: log-likelihood {:.4}, estimates {:?}",
            result.iterations, -result.optimal_value, estimates
        ),
        FitStatus::NotConverged => warn!(
            "MNL fit stopped after {} iterations without converging",
            result.iterations
        ),
        FitStatus::SingularHessian => {
            warn!("MNL Hessian at the optimum is singular; standard errors are undefined")
        }
    }

    Ok(MleFit {
        log_likelihood: -result.optimal_value,
        iterations: result.iterations,
        estimates,
        std_errors,
        lower,
        upper,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn row(respondent: u32, task: u32, features: Vec<f64>, chosen: bool) -> AlternativeRow {
        AlternativeRow {
            key: TaskKey::new(respondent, task),
            features,
            chosen,
        }
    }

    /// Two respondents, two tasks each, three alternatives, two features.
    fn small_table() -> ObservationTable {
        let rows = vec![
            row(1, 1, vec![1.0, 0.5], true),
            row(1, 1, vec![0.0, 1.0], false),
            row(1, 1, vec![0.0, 0.0], false),
            row(1, 2, vec![1.0, 1.5], false),
            row(1, 2, vec![0.0, 0.2], true),
            row(1, 2, vec![1.0, 0.1], false),
            row(2, 1, vec![0.0, 2.0], false),
            row(2, 1, vec![1.0, 0.3], true),
            row(2, 1, vec![0.0, 0.7], false),
            row(2, 2, vec![1.0, 1.0], false),
            row(2, 2, vec![1.0, 0.0], false),
            row(2, 2, vec![0.0, 0.4], true),
        ];
        ObservationTable::from_rows(rows).unwrap()
    }

    #[test]
    fn test_two_alternatives_at_zero() {
        let table = ObservationTable::from_rows(vec![
            row(1, 1, vec![3.0], true),
            row(1, 1, vec![-2.0], false),
        ])
        .unwrap();
        let p = choice_probabilities(&table.tasks()[0], &[0.0]).unwrap();
        assert_relative_eq!(p[0], 0.5);
        assert_relative_eq!(p[1], 0.5);
        assert_relative_eq!(log_likelihood(&table, &[0.0]).unwrap(), 0.5_f64.ln());
    }

    #[test]
    fn test_grouping_orders_by_key() {
        let table = ObservationTable::from_rows(vec![
            row(2, 1, vec![0.0], true),
            row(1, 2, vec![1.0], false),
            row(2, 1, vec![1.0], false),
            row(1, 2, vec![2.0], true),
        ])
        .unwrap();
        let keys: Vec<TaskKey> = table.tasks().iter().map(|t| t.key()).collect();
        assert_eq!(keys, vec![TaskKey::new(1, 2), TaskKey::new(2, 1)]);
        assert_eq!(table.tasks()[0].chosen(), 1);
        assert_eq!(table.tasks()[1].chosen(), 0);
        assert_eq!(table.n_alternatives(), 2);
    }

    #[test]
    fn test_rejects_bad_tasks() {
        let none_chosen = vec![row(1, 1, vec![0.0], false), row(1, 1, vec![1.0], false)];
        assert_eq!(
            ObservationTable::from_rows(none_chosen),
            Err(Error::InvalidChoiceTask {
                respondent: 1,
                task: 1,
                chosen: 0
            })
        );

        let two_chosen = vec![row(3, 4, vec![0.0], true), row(3, 4, vec![1.0], true)];
        assert!(matches!(
            ObservationTable::from_rows(two_chosen),
            Err(Error::InvalidChoiceTask { chosen: 2, .. })
        ));

        let unequal = vec![
            row(1, 1, vec![0.0], true),
            row(1, 1, vec![1.0], false),
            row(1, 2, vec![0.0], true),
        ];
        assert!(matches!(
            ObservationTable::from_rows(unequal),
            Err(Error::UnequalAlternatives {
                expected: 2,
                found: 1,
                ..
            })
        ));

        let ragged = vec![row(1, 1, vec![0.0], true), row(1, 1, vec![1.0, 2.0], false)];
        assert!(matches!(
            ObservationTable::from_rows(ragged),
            Err(Error::DimensionMismatch { .. })
        ));

        assert_eq!(
            ObservationTable::from_rows(Vec::<AlternativeRow>::new()),
            Err(Error::EmptyInput)
        );
    }

    #[test]
    fn test_beta_dimension_checked() {
        let table = small_table();
        assert!(log_likelihood(&table, &[0.0]).is_err());
        assert!(NegLogLikelihood::new(&table).evaluate(&[0.0]).is_nan());
    }

    #[test]
    fn test_large_utilities_stay_finite() {
        let table = small_table();
        let ll = log_likelihood(&table, &[800.0, -900.0]).unwrap();
        assert!(ll.is_finite());
        let p = choice_probabilities(&table.tasks()[0], &[800.0, -900.0]).unwrap();
        assert_relative_eq!(p.sum(), 1.0);
    }

    #[test]
    fn test_gradient_and_hessian_match_finite_differences() {
        let table = small_table();
        let objective = NegLogLikelihood::new(&table);
        let beta = [0.3, -0.7];

        let analytic = objective.gradient(&beta).unwrap();
        let numeric = finite_difference::gradient(&objective, &beta);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert_abs_diff_eq!(*a, *n, epsilon = 1e-6);
        }

        let analytic = objective.hessian(&beta).unwrap();
        let numeric = finite_difference::hessian(&objective, &beta);
        for (ra, rn) in analytic.iter().zip(&numeric) {
            for (a, n) in ra.iter().zip(rn) {
                assert_abs_diff_eq!(*a, *n, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_fit_mle_small_table() {
        let table = small_table();
        let fit = fit_mle(&table, &MleConfig::default()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);

        // Score is zero at the optimum.
        let g = log_likelihood_gradient(&table, &fit.estimates).unwrap();
        for v in g {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-4);
        }
        let at_zero = log_likelihood(&table, &[0.0, 0.0]).unwrap();
        assert!(fit.log_likelihood >= at_zero);

        for i in 0..2 {
            assert!(fit.std_errors[i] > 0.0);
            assert_relative_eq!(
                fit.upper[i] - fit.lower[i],
                2.0 * 1.96 * fit.std_errors[i],
                epsilon = 1e-12
            );
        }

        let numerical = fit_mle(
            &table,
            &MleConfig::default().with_hessian(HessianMethod::Numerical),
        )
        .unwrap();
        for (a, b) in fit.std_errors.iter().zip(&numerical.std_errors) {
            assert_relative_eq!(*a, *b, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_constant_feature_gives_singular_hessian() {
        // The second feature never varies within a task, so it is not identified.
        let table = ObservationTable::from_rows(vec![
            row(1, 1, vec![1.0, 5.0], true),
            row(1, 1, vec![0.0, 5.0], false),
            row(1, 2, vec![0.0, 2.0], true),
            row(1, 2, vec![1.0, 2.0], false),
            row(1, 3, vec![1.0, 1.0], true),
            row(1, 3, vec![0.0, 1.0], false),
        ])
        .unwrap();
        let fit = fit_mle(&table, &MleConfig::default()).unwrap();
        assert_eq!(fit.status, FitStatus::SingularHessian);
        assert!(fit.std_errors.iter().all(|s| s.is_nan()));
        assert!(matches!(
            fit.ensure_converged(),
            Err(Error::FittingFailure(_))
        ));
    }

    #[test]
    fn test_iteration_limit_reported() {
        let table = small_table();
        let config = MleConfig::default()
            .with_optimization(OptimizationConfig::default().with_max_iterations(1));
        let fit = fit_mle(&table, &config).unwrap();
        assert_eq!(fit.status, FitStatus::NotConverged);
        assert!(fit.ensure_converged().is_err());
    }

    #[test]
    fn test_initial_point_dimension() {
        let table = small_table();
        let config = MleConfig::default().with_initial(vec![0.0; 3]);
        assert!(fit_mle(&table, &config).is_err());
    }

    #[test]
    fn test_zero_score_start_with_zero_tolerance() {
        // Mirrored tasks: the score is exactly zero at beta = 0.
        let table = ObservationTable::from_rows(vec![
            row(1, 1, vec![1.0], true),
            row(1, 1, vec![-1.0], false),
            row(1, 2, vec![1.0], false),
            row(1, 2, vec![-1.0], true),
        ])
        .unwrap();
        let config = MleConfig::default().with_optimization(
            OptimizationConfig::default()
                .with_tolerance(0.0)
                .with_max_iterations(5),
        );
        let fit = fit_mle(&table, &config).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert_eq!(fit.estimates, vec![0.0]);
        assert_eq!(fit.iterations, 0);
        assert_relative_eq!(fit.std_errors[0], 0.5_f64.sqrt());

        let config = MleConfig::default()
            .with_optimization(OptimizationConfig::default().with_tolerance(-1.0));
        assert!(matches!(
            fit_mle(&table, &config),
            Err(Error::InvalidParameter {
                name: "tolerance",
                ..
            })
        ));
        let config = MleConfig::default()
            .with_optimization(OptimizationConfig::default().with_tolerance(f64::NAN));
        assert!(fit_mle(&table, &config).is_err());
    }

    #[test]
    fn test_standard_errors_use_objective_hessian() {
        let table = small_table();
        let fit = fit_mle(&table, &MleConfig::default()).unwrap();
        let rows = NegLogLikelihood::new(&table).hessian(&fit.estimates).unwrap();
        let hessian = Array2::from_shape_vec((2, 2), rows.into_iter().flatten().collect()).unwrap();
        let inverse = invert(&hessian).unwrap();
        for i in 0..2 {
            assert_relative_eq!(fit.std_errors[i], inverse[[i, i]].sqrt(), epsilon = 1e-12);
        }
    }
}
