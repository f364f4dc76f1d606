//! Specifications and the Seldonian algorithm.
//!
//! A `Spec` ties together the parsed constraints, the model, the two data
//! partitions and the optimizer hyperparameters. `Spec::run()` performs
//! candidate selection on the candidate partition, then the safety test on
//! the safety partition, and returns the solution only if the safety test
//! passes.
use std::collections::BTreeSet;

use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bounds::BoundMethod;
use crate::data::{Dataset, Partition, PartitionRole};
use crate::error::{Result, SeldonianError};
use crate::measures::{MeasureRegistry, Regime};
use crate::models::Model;
use crate::optimizer::{CandidateResult, CandidateSelection, OptimizerConfig};
use crate::safety::{SafetyReport, SafetyTest};
use crate::tree::Constraint;


/// A behavioral constraint as written in a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    pub expression: String,
    /// Confidence parameter; the specification's `delta` if absent.
    #[serde(default)]
    pub delta: Option<f64>,
}

/// Configuration of a specification, as read from JSON:
///
/// ```json
/// {
///     "regime": {"supervised_learning": "classification"},
///     "constraints": [{"expression": "abs((PR | [M]) - (PR | [F])) <= 0.15"}],
///     "delta": 0.05,
///     "optimization_technique": "gradient_descent",
///     "initial_solution": "default",
///     "num_iters": 500
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecConfig {
    pub regime: Regime,
    pub constraints: Vec<ConstraintConfig>,
    /// Default confidence parameter of the constraints.
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub bound_method: BoundMethod,
    #[serde(flatten)]
    pub optimizer: OptimizerConfig,
}

impl SpecConfig {
    pub fn from_json_str(s: &str) -> Result<SpecConfig> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parses the constraints against `registry`, with filters over
    /// `sensitive_columns`.
    pub fn parse_constraints(&self, sensitive_columns: &[String], registry: &MeasureRegistry)
            -> Result<Vec<Constraint>> {
        self.constraints
            .iter()
            .map(|c| -> Result<Constraint> {
                let delta = c.delta.or(self.delta).ok_or_else(|| SeldonianError::InvalidConfig(
                    format!("no delta given for constraint '{}'", c.expression)))?;
                Ok(Constraint::parse_with_registry(&c.expression, delta, self.regime,
                                                   sensitive_columns, registry)?)
            })
            .collect()
    }
}

/// Result of the Seldonian algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The candidate solution if it passed the safety test, `None` for
    /// "No Solution Found".
    pub solution: Option<Array1<f64>>,
    pub candidate: CandidateResult,
    pub safety: SafetyReport,
}

impl Outcome {
    pub fn found_solution(&self) -> bool {
        self.solution.is_some()
    }
}

/// A Seldonian specification.
pub struct Spec {
    regime: Regime,
    constraints: Vec<Constraint>,
    model: Model,
    candidate: Partition,
    safety: Partition,
    optimizer: OptimizerConfig,
    bound_method: BoundMethod,
}

fn check_regime(regime: Regime, model: &Model, partition: &Partition) -> Result<()> {
    let consistent = match (model, partition.dataset()) {
        (Model::Supervised(_), Dataset::Supervised(_)) => regime.is_supervised(),
        (Model::Reinforcement(_), Dataset::Episodes(_)) => !regime.is_supervised(),
        _ => false,
    };
    if consistent {
        Ok(())
    } else {
        Err(SeldonianError::RegimeMismatch(
            format!("model or {} partition does not belong to the {} regime",
                    partition.role(), regime)))
    }
}

/// Filters name sensitive columns, so both partitions must carry the same
/// ones.
fn check_sensitive_columns(candidate: &Partition, safety: &Partition) -> Result<()> {
    let columns = |p: &Partition| p.dataset()
                                   .sensitive_columns()
                                   .iter()
                                   .cloned()
                                   .collect::<BTreeSet<_>>();
    let (c, s) = (columns(candidate), columns(safety));

    if c != s {
        return Err(SeldonianError::Shape(
            format!("candidate partition has sensitive columns [{}] but safety partition has [{}]",
                    c.iter().join(", "), s.iter().join(", "))));
    }
    Ok(())
}

impl Spec {
    /// Builds a specification, parsing the configured constraints against
    /// the built-in measures.
    ///
    /// # Arguments
    ///
    /// * `config` - Regime, constraints and optimizer hyperparameters.
    /// * `model` - Model of the configured regime.
    /// * `candidate` - Candidate partition.
    /// * `safety` - Safety partition, disjoint from `candidate`.
    pub fn new(config: SpecConfig, model: Model, candidate: Partition, safety: Partition)
            -> Result<Spec> {
        Spec::with_registry(config, model, candidate, safety, MeasureRegistry::global())
    }

    /// Builds a specification whose constraints may use the measures of
    /// `registry`.
    pub fn with_registry(config: SpecConfig, model: Model, candidate: Partition,
                         safety: Partition, registry: &MeasureRegistry) -> Result<Spec> {
        let constraints = config.parse_constraints(candidate.dataset().sensitive_columns(),
                                                   registry)?;

        Spec::from_constraints(config.regime, constraints, model, candidate, safety,
                               config.optimizer, config.bound_method)
    }

    /// Builds a specification from constraints parsed beforehand.
    pub fn from_constraints(regime: Regime, constraints: Vec<Constraint>, model: Model,
                            candidate: Partition, safety: Partition,
                            optimizer: OptimizerConfig, bound_method: BoundMethod)
            -> Result<Spec> {
        if candidate.role() != PartitionRole::Candidate {
            return Err(SeldonianError::PartitionMisuse(
                format!("{} partition given as candidate partition", candidate.role())));
        }
        if safety.role() != PartitionRole::Safety {
            return Err(SeldonianError::PartitionMisuse(
                format!("{} partition given as safety partition", safety.role())));
        }
        check_regime(regime, &model, &candidate)?;
        check_regime(regime, &model, &safety)?;
        check_sensitive_columns(&candidate, &safety)?;
        optimizer.validate()?;

        Ok(Spec { regime, constraints, model, candidate, safety, optimizer, bound_method })
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Runs candidate selection from the configured initial solution.
    pub fn candidate_selection(&self) -> Result<CandidateResult> {
        let theta_init = self.optimizer.initial_solution.resolve(&self.model, &self.candidate)?;

        CandidateSelection::new(&self.constraints, &self.model, &self.candidate,
                                self.safety.len(), &self.optimizer)
            .with_bound_method(self.bound_method)
            .optimize(theta_init)
    }

    /// Runs the safety test on `theta`.
    pub fn safety_test(&self, theta: ArrayView1<f64>) -> Result<SafetyReport> {
        SafetyTest::new(&self.constraints, &self.model, &self.safety)
            .with_bound_method(self.bound_method)
            .run(theta)
    }

    /// Runs the Seldonian algorithm.
    pub fn run(&self) -> Result<Outcome> {
        let candidate = self.candidate_selection()?;
        let safety = self.safety_test(candidate.theta.view())?;

        let solution = if safety.passed() {
            info!("solution passed the safety test");
            Some(candidate.theta.clone())
        } else {
            info!(upper_bounds = ?safety.upper_bounds, "No Solution Found");
            None
        };

        Ok(Outcome { solution, candidate, safety })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::data::SupervisedData;
    use crate::measures::SubRegime;
    use crate::models::{LinearRegression, TabularSoftmax};
    use crate::optimizer::{InitialSolution, OptimizationTechnique};

    const CONFIG: &str = r#"{
        "regime": {"supervised_learning": "regression"},
        "constraints": [{"expression": "Mean_Squared_Error <= 2.0"},
                        {"expression": "Mean_Error >= -1", "delta": 0.1}],
        "delta": 0.05,
        "bound_method": "ttest",
        "optimization_technique": "black_box",
        "initial_solution": [0.0, 1.0],
        "num_iters": 20,
        "seed": 3
    }"#;

    fn partitions() -> (Partition, Partition) {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let y = array![0., 1.1, 1.9, 3.];
        let d = SupervisedData::without_sensitive(x, y).unwrap();

        (Partition::candidate(Dataset::Supervised(d.clone())),
         Partition::safety(Dataset::Supervised(d)))
    }

    #[test]
    fn config_from_json() {
        let config = SpecConfig::from_json_str(CONFIG).unwrap();

        assert_eq!(config.regime, Regime::SupervisedLearning(SubRegime::Regression));
        assert_eq!(config.optimizer.optimization_technique, OptimizationTechnique::BlackBox);
        assert_eq!(config.optimizer.initial_solution, InitialSolution::Vector(vec![0., 1.]));
        assert_eq!(config.optimizer.seed, 3);
        assert_eq!(config.bound_method, BoundMethod::TTest);

        let constraints = config.parse_constraints(&[], MeasureRegistry::global()).unwrap();
        assert_eq!(constraints[0].delta(), 0.05);
        assert_eq!(constraints[1].delta(), 0.1);
    }

    #[test]
    fn missing_delta() {
        let mut config = SpecConfig::from_json_str(CONFIG).unwrap();
        config.delta = None;

        assert!(matches!(config.parse_constraints(&[], MeasureRegistry::global()),
                         Err(SeldonianError::InvalidConfig(_))));
    }

    #[test]
    fn parse_errors_surface() {
        let mut config = SpecConfig::from_json_str(CONFIG).unwrap();
        config.constraints[0].expression = "Mean_Squared_Error < 2".to_string();
        let (candidate, safety) = partitions();

        let res = Spec::new(config, Model::supervised(LinearRegression), candidate, safety);

        assert!(matches!(res, Err(SeldonianError::Parse(_))));
    }

    #[test]
    fn regime_mismatch() {
        let config = SpecConfig::from_json_str(CONFIG).unwrap();
        let (candidate, safety) = partitions();

        let res = Spec::new(config, Model::reinforcement(TabularSoftmax::new(1, 2)), candidate,
                            safety);

        assert!(matches!(res, Err(SeldonianError::RegimeMismatch(_))));
    }

    #[test]
    fn swapped_partitions() {
        let config = SpecConfig::from_json_str(CONFIG).unwrap();
        let (candidate, safety) = partitions();

        let res = Spec::new(config, Model::supervised(LinearRegression), safety, candidate);

        assert!(matches!(res, Err(SeldonianError::PartitionMisuse(_))));
    }

    #[test]
    fn safety_partition_lacks_sensitive_columns() {
        let config = SpecConfig::from_json_str(CONFIG).unwrap();
        let (candidate, _) = partitions();
        let d = SupervisedData::new(array![[1., 0.], [1., 1.]], array![0., 1.],
                                    vec!["M".to_string()], array![[1.], [0.]]).unwrap();

        let res = Spec::new(config, Model::supervised(LinearRegression), candidate,
                            Partition::safety(Dataset::Supervised(d)));

        assert!(matches!(res, Err(SeldonianError::Shape(_))));
    }

    /// An explicit initial solution of the wrong length is reported, not
    /// left to fail inside the model.
    #[test]
    fn initial_solution_length() {
        let mut config = SpecConfig::from_json_str(CONFIG).unwrap();
        config.optimizer.initial_solution = InitialSolution::Vector(vec![0.5]);
        let (candidate, safety) = partitions();

        let spec = Spec::new(config, Model::supervised(LinearRegression), candidate, safety)
                       .unwrap();

        assert!(matches!(spec.run(), Err(SeldonianError::Shape(_))));
    }

    #[test]
    fn malformed_json() {
        assert!(matches!(SpecConfig::from_json_str("{\"regime\": 3}"),
                         Err(SeldonianError::Json(_))));
    }
}
