//! Confidence bounds on the value of a constraint tree.
//!
//! Each distinct base node gets a confidence interval on its measure's
//! population mean, at an even share of the constraint's `delta`. The
//! intervals are then propagated bottom-up through the operators with
//! interval arithmetic. Base nodes are only bounded on the side(s) the
//! root's upper bound depends on; a one-sided interval spends its whole
//! share on that side, a two-sided one spends half on each.
//!
//! Two modes are provided. `Safety` bounds the measure from the safety
//! partition itself. `Candidate` predicts what the safety test will
//! compute, from candidate data, for a safety partition of known size;
//! the interval is inflated by a factor of two to make candidate
//! selection conservative.
use std::f64;

use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::data::{Dataset, Partition};
use crate::error::{Result, SeldonianError};
use crate::interval::Interval;
use crate::models::{mismatch, Model};
use crate::tree::{leaf_requirements, BaseNode, BoundsNeeded, Constraint, Node, OperatorKind};
use crate::utils::tinv;


/// How the interval of a base node is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundMode {
    /// Predict the safety test's bound from candidate data, for a safety
    /// partition of `n_safety` rows.
    Candidate { n_safety: usize },
    /// Bound from the safety data itself.
    Safety,
}

/// Concentration inequality used for base nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundMethod {
    /// Student's t interval.
    #[serde(rename = "ttest")]
    TTest,
    /// Hoeffding's inequality. Only valid for measures with a known range.
    Hoeffding,
}

impl Default for BoundMethod {
    fn default() -> BoundMethod {
        BoundMethod::TTest
    }
}

/// Computes bounds of constraint trees for one model, parameter vector
/// and data partition.
pub struct BoundEngine<'a> {
    model: &'a Model,
    theta: ArrayView1<'a, f64>,
    partition: &'a Partition,
    mode: BoundMode,
    method: BoundMethod,
}

impl<'a> BoundEngine<'a> {
    /// Constructs a new bound engine using Student's t intervals.
    ///
    /// # Arguments
    ///
    /// * `model` - Model whose predictions the measures sample.
    /// * `theta` - Model parameters.
    /// * `partition` - Data to estimate the measures on.
    /// * `mode` - Whether to predict the safety bound or compute it.
    pub fn new(model: &'a Model, theta: ArrayView1<'a, f64>, partition: &'a Partition,
               mode: BoundMode) -> BoundEngine<'a> {
        BoundEngine {
            model,
            theta,
            partition,
            mode,
            method: BoundMethod::default(),
        }
    }

    pub fn with_method(mut self, method: BoundMethod) -> BoundEngine<'a> {
        self.method = method;
        self
    }

    /// Interval on the value of `constraint`'s tree at confidence
    /// `1 - delta`. Only the upper end is guaranteed; the lower end may
    /// be -infinity.
    pub fn evaluate_bound(&self, constraint: &Constraint) -> Result<Interval> {
        self.evaluate_tree(constraint.tree(), constraint.delta(), BoundsNeeded::UPPER)
    }

    /// Upper bound on the value of `constraint`'s tree.
    pub fn upper_bound(&self, constraint: &Constraint) -> Result<f64> {
        Ok(self.evaluate_bound(constraint)?.upper)
    }

    /// Upper bounds of several constraints, evaluated in parallel.
    pub fn upper_bounds(&self, constraints: &[Constraint]) -> Result<Vec<f64>> {
        constraints.par_iter()
                   .map(|c| self.upper_bound(c))
                   .collect()
    }

    /// Interval on the value of `tree`, bounded on the ends in `needed`,
    /// with `delta` split evenly over its distinct base nodes.
    pub fn evaluate_tree(&self, tree: &Node, delta: f64, needed: BoundsNeeded)
            -> Result<Interval> {
        let requirements = leaf_requirements(tree, needed);
        let leaf_delta = delta / (requirements.len().max(1) as f64);

        let leaves = requirements.into_par_iter()
                                 .map(|(leaf, need)| {
                                     self.leaf_bound(leaf, leaf_delta, need)
                                         .map(|bound| (leaf, bound))
                                 })
                                 .collect::<Result<Vec<_>>>()?;

        Ok(propagate(tree, &leaves))
    }

    /// Per-row samples of a base node's measure, on the rows matching its
    /// filter.
    pub fn leaf_samples(&self, leaf: &BaseNode) -> Result<Array1<f64>> {
        let filtered;
        let data = match (&leaf.filter, self.partition.dataset()) {
            (None, data) => data,
            (Some(columns), Dataset::Supervised(d)) => {
                filtered = Dataset::Supervised(d.filter(columns)?);
                &filtered
            },
            (Some(_), Dataset::Episodes(_)) => return Err(mismatch()),
        };

        let samples = leaf.measure.samples(self.model, self.theta, data)?;
        if samples.is_empty() {
            return Err(SeldonianError::InsufficientData {
                measure: leaf.measure.name().to_string(),
                filter: leaf.filter_label(),
            });
        }
        Ok(samples)
    }

    /// Confidence interval on the mean of a base node's measure, at
    /// confidence `1 - delta` overall.
    pub fn leaf_bound(&self, leaf: &BaseNode, delta: f64, needed: BoundsNeeded)
            -> Result<Interval> {
        let samples = self.leaf_samples(leaf)?;
        let n = samples.len();
        let side_delta = if needed.is_two_sided() { delta / 2. } else { delta };

        // Sample size the width is computed for, and inflation factor.
        let (n_eff, inflation) = match self.mode {
            BoundMode::Safety => (n, 1.),
            BoundMode::Candidate { n_safety } => {
                let scaled = n as f64 / self.partition.len() as f64 * n_safety as f64;
                (scaled.round() as usize, 2.)
            },
        };

        let mean = samples.iter().mean();
        let width = match self.method {
            BoundMethod::TTest => {
                if n_eff < 2 || n < 2 {
                    warn!(leaf = %leaf, n = n_eff, "too few samples for a t bound");
                    return Ok(Interval::unbounded());
                }
                let std = samples.iter().std_dev();
                match tinv(1. - side_delta, (n_eff - 1) as f64) {
                    Some(t) => inflation * std / (n_eff as f64).sqrt() * t,
                    None => return Ok(Interval::unbounded()),
                }
            },
            BoundMethod::Hoeffding => {
                let (a, b) = leaf.measure.range().ok_or_else(|| SeldonianError::InvalidConfig(
                    format!("Hoeffding bound needs a measure with a known range, {} has none",
                            leaf.measure.name())))?;
                if n_eff == 0 {
                    return Ok(Interval::unbounded());
                }
                inflation * (b - a) * ((1. / side_delta).ln() / (2. * n_eff as f64)).sqrt()
            },
        };

        let lower = if needed.lower { mean - width } else { f64::NEG_INFINITY };
        let upper = if needed.upper { mean + width } else { f64::INFINITY };
        debug!(leaf = %leaf, n, mean, lower, upper, "leaf bound");

        Ok(Interval::new(lower, upper))
    }
}

/// Combines the intervals of `leaves` up to the root of `tree`.
///
/// Division by an interval containing zero cannot be bounded; it yields
/// `(-infinity, +infinity)`.
fn propagate(tree: &Node, leaves: &[(&BaseNode, Interval)]) -> Interval {
    match tree {
        Node::Constant(c) => Interval::point(*c),
        Node::Base(b) => leaves.iter()
                               .find(|(leaf, _)| *leaf == b)
                               .map(|&(_, bound)| bound)
                               .unwrap_or_else(Interval::unbounded),
        Node::Operator { kind, children } => {
            let bounds = children.iter()
                                 .map(|c| propagate(c, leaves))
                                 .collect::<Vec<_>>();
            match kind {
                OperatorKind::Add => bounds[0].add(&bounds[1]),
                OperatorKind::Sub => bounds[0].sub(&bounds[1]),
                OperatorKind::Mul => bounds[0].mul(&bounds[1]),
                OperatorKind::Div => match bounds[0].div(&bounds[1]) {
                    Ok(bound) => bound,
                    Err(e) => {
                        warn!(node = %tree, "{}; widening to (-inf, inf)", e);
                        Interval::unbounded()
                    },
                },
                OperatorKind::Abs => bounds[0].abs(),
                OperatorKind::Exp => bounds[0].exp(),
                OperatorKind::Min => bounds[1..].iter().fold(bounds[0], |acc, b| acc.min(b)),
                OperatorKind::Max => bounds[1..].iter().fold(bounds[0], |acc, b| acc.max(b)),
            }
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use crate::data::SupervisedData;
    use crate::measures::{Regime, SubRegime};
    use crate::models::{LinearRegression, LogisticRegression};

    fn regression() -> (Model, Partition) {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.], [1., 4.], [1., 5.]];
        let y = array![0.5, 0.7, 2.4, 2.6, 4.1, 5.3];
        let data = SupervisedData::without_sensitive(x, y).unwrap();

        (Model::supervised(LinearRegression), Partition::safety(Dataset::Supervised(data)))
    }

    fn mse(s: &str, delta: f64) -> Constraint {
        Constraint::parse(s, delta, Regime::SupervisedLearning(SubRegime::Regression), &[])
                  .unwrap()
    }

    /// Verify that equivalent ways of writing a constraint give the same
    /// bound.
    #[test]
    fn equivalent_forms() {
        let (model, partition) = regression();
        let theta = array![0.2, 0.9];
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);

        let forms = ["Mean_Squared_Error <= 4.0", "Mean_Squared_Error - 4.0 <= 0",
                     "Mean_Squared_Error - 4.0", "4.0 >= Mean_Squared_Error"];
        let bounds = forms.iter()
                          .map(|s| engine.upper_bound(&mse(s, 0.1)).unwrap())
                          .collect::<Vec<_>>();

        for b in &bounds[1..] {
            assert_abs_diff_eq!(*b, bounds[0], epsilon = 1e-12);
        }
    }

    /// Verify the t bound of a single leaf against a hand computation.
    #[test]
    fn single_leaf_t_bound() {
        let (model, partition) = regression();
        let theta = array![0.2, 0.9];
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);
        let c = mse("Mean_Squared_Error", 0.05);

        let samples = engine.leaf_samples(&c.tree().base_nodes()[0]).unwrap();
        let expected = samples.iter().mean()
                       + samples.iter().std_dev() / 6f64.sqrt() * tinv(0.95, 5.).unwrap();

        assert_abs_diff_eq!(engine.upper_bound(&c).unwrap(), expected, epsilon = 1e-12);
        assert_eq!(engine.evaluate_bound(&c).unwrap().lower, f64::NEG_INFINITY);
    }

    /// Verify that lowering delta never narrows the root bound.
    #[test]
    fn monotone_in_delta() {
        let (model, partition) = regression();
        let theta = array![0.2, 0.9];
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);
        let s = "abs(Mean_Error) + 2 * Mean_Squared_Error - 1";

        let deltas = [0.4, 0.2, 0.1, 0.05, 0.01];
        let bounds = deltas.iter()
                           .map(|&d| engine.upper_bound(&mse(s, d)).unwrap())
                           .collect::<Vec<_>>();

        for w in bounds.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    /// Verify that the candidate bound is wider than the safety bound for a
    /// safety partition of the same size.
    #[test]
    fn candidate_is_inflated() {
        let (model, partition) = regression();
        let theta = array![0.2, 0.9];
        let c = mse("Mean_Squared_Error", 0.05);

        let safety = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety)
                                .upper_bound(&c).unwrap();
        let candidate = BoundEngine::new(&model, theta.view(), &partition,
                                         BoundMode::Candidate { n_safety: 6 })
                                   .upper_bound(&c).unwrap();

        assert!(candidate > safety);
    }

    fn classification() -> (Model, Partition, Vec<String>) {
        let columns = vec!["M".to_string(), "F".to_string(), "R2".to_string()];
        let data = SupervisedData::new(
            array![[1., 0.], [1., 1.], [1., -1.], [1., 2.]],
            array![0., 1., 0., 1.],
            columns.clone(),
            array![[1., 0., 0.], [0., 1., 0.], [1., 0., 0.], [0., 1., 0.]]).unwrap();

        (Model::supervised(LogisticRegression::default()),
         Partition::safety(Dataset::Supervised(data)),
         columns)
    }

    #[test]
    fn empty_filter_is_insufficient() {
        let (model, partition, columns) = classification();
        let theta = array![0., 1.];
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);
        let c = Constraint::parse("(PR | [R2]) <= 0.5", 0.05,
                                  Regime::SupervisedLearning(SubRegime::Classification),
                                  &columns).unwrap();

        assert!(matches!(engine.evaluate_bound(&c),
                         Err(SeldonianError::InsufficientData { .. })));
    }

    /// Verify that dividing by an interval around zero gives an unbounded
    /// result rather than an error.
    #[test]
    fn division_widens() {
        let (model, partition, columns) = classification();
        // theta = 0 predicts 0.5 on every row, with zero variance.
        let theta = array![0., 0.];
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);
        let c = Constraint::parse("1 / (PR - 0.5)", 0.05,
                                  Regime::SupervisedLearning(SubRegime::Classification),
                                  &columns).unwrap();

        assert_eq!(engine.evaluate_bound(&c).unwrap(), Interval::unbounded());
    }

    #[test]
    fn hoeffding() {
        let (model, partition, columns) = classification();
        let theta = array![0., 0.];
        let regime = Regime::SupervisedLearning(SubRegime::Classification);
        let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety)
                                .with_method(BoundMethod::Hoeffding);

        let pr = Constraint::parse("PR", 0.05, regime, &columns).unwrap();
        let expected = 0.5 + (20f64.ln() / 8.).sqrt();
        assert_abs_diff_eq!(engine.upper_bound(&pr).unwrap(), expected, epsilon = 1e-12);

        let loss = Constraint::parse("logistic_loss", 0.05, regime, &columns).unwrap();
        assert!(matches!(engine.upper_bound(&loss), Err(SeldonianError::InvalidConfig(_))));
    }
}
