//! The safety test.
//!
//! A single evaluation pass: the safety-mode upper bound of every
//! constraint, computed on the safety partition for the candidate
//! solution, must be at most zero for the solution to be returned.
use std::fmt;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bounds::{BoundEngine, BoundMethod, BoundMode};
use crate::data::{Partition, PartitionRole};
use crate::error::{Result, SeldonianError};
use crate::models::Model;
use crate::tree::Constraint;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Verdict of the safety test, with the upper bound of each constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub verdict: Verdict,
    pub upper_bounds: Vec<f64>,
}

impl SafetyReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

pub struct SafetyTest<'a> {
    constraints: &'a [Constraint],
    model: &'a Model,
    partition: &'a Partition,
    method: BoundMethod,
}

impl<'a> SafetyTest<'a> {
    /// Constructs a safety test.
    ///
    /// # Arguments
    ///
    /// * `constraints` - Behavioral constraints.
    /// * `model` - Model the solution parametrizes.
    /// * `partition` - The safety partition. It must be disjoint from the
    ///                 partition the solution was selected on.
    pub fn new(constraints: &'a [Constraint], model: &'a Model, partition: &'a Partition)
            -> SafetyTest<'a> {
        SafetyTest { constraints, model, partition, method: BoundMethod::default() }
    }

    pub fn with_bound_method(mut self, method: BoundMethod) -> SafetyTest<'a> {
        self.method = method;
        self
    }

    /// Runs the safety test on `theta`.
    ///
    /// Fails with `PartitionMisuse` unless the partition is the safety
    /// partition.
    pub fn run(&self, theta: ArrayView1<f64>) -> Result<SafetyReport> {
        if self.partition.role() != PartitionRole::Safety {
            return Err(SeldonianError::PartitionMisuse(self.partition.role().to_string()));
        }
        self.model.check_params(theta, self.partition.dataset())?;
        info!(constraints = self.constraints.len(), rows = self.partition.len(),
              "safety test started");

        let upper_bounds = BoundEngine::new(self.model, theta.view(), self.partition,
                                            BoundMode::Safety)
                                      .with_method(self.method)
                                      .upper_bounds(self.constraints)?;
        let verdict = if upper_bounds.iter().all(|&u| u <= 0.) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        info!(%verdict, upper_bounds = ?upper_bounds, "safety test finished");

        Ok(SafetyReport { verdict, upper_bounds })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::data::{Dataset, SupervisedData};
    use crate::measures::{Regime, SubRegime};
    use crate::models::LinearRegression;

    fn data() -> Dataset {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.], [1., 4.], [1., 5.]];
        let y = array![0.1, 0.9, 2.1, 3.0, 3.8, 5.2];
        Dataset::Supervised(SupervisedData::without_sensitive(x, y).unwrap())
    }

    fn constraints() -> Vec<Constraint> {
        let regime = Regime::SupervisedLearning(SubRegime::Regression);
        vec![Constraint::parse("Mean_Squared_Error <= 1", 0.05, regime, &[]).unwrap(),
             Constraint::parse("Mean_Squared_Error <= 0.01", 0.05, regime, &[]).unwrap()]
    }

    #[test]
    fn verdicts() {
        let model = Model::supervised(LinearRegression);
        let partition = Partition::safety(data());
        let constraints = constraints();
        let theta = array![0., 1.];

        let loose = SafetyTest::new(&constraints[..1], &model, &partition)
                               .run(theta.view()).unwrap();
        let both = SafetyTest::new(&constraints, &model, &partition)
                              .run(theta.view()).unwrap();

        assert_eq!(loose.verdict, Verdict::Pass);
        assert_eq!(both.verdict, Verdict::Fail);
        assert!(both.upper_bounds[1] > 0.);
    }

    #[test]
    fn deterministic() {
        let model = Model::supervised(LinearRegression);
        let partition = Partition::safety(data());
        let constraints = constraints();
        let test = SafetyTest::new(&constraints, &model, &partition);
        let theta = array![0.05, 0.98];

        assert_eq!(test.run(theta.view()).unwrap(), test.run(theta.view()).unwrap());
    }

    #[test]
    fn refuses_candidate_partition() {
        let model = Model::supervised(LinearRegression);
        let partition = Partition::candidate(data());
        let constraints = constraints();

        let res = SafetyTest::new(&constraints, &model, &partition).run(array![0., 1.].view());

        assert!(matches!(res, Err(SeldonianError::PartitionMisuse(_))));
    }
}
