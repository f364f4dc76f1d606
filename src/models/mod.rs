//! Model capability consumed by the core.
//!
//! The core never trains models itself. It needs, for a parameter vector
//! `theta`, per-row predictions (supervised learning) or action
//! probabilities (reinforcement learning), plus the value and gradient
//! of the primary objective. `SupervisedModel` and `PolicyModel` describe
//! those capabilities; `Model` tags which regime a model belongs to, and
//! callers dispatch on that tag where the capability is invoked.
pub mod linear;
pub mod softmax;

use ndarray::prelude::*;

use crate::data::{Dataset, Episode, EpisodeData};
use crate::error::{Result, SeldonianError};

pub use self::linear::{LinearRegression, LogisticRegression};
pub use self::softmax::TabularSoftmax;


/// A supervised model parametrized by a vector `theta`.
pub trait SupervisedModel: Send + Sync {
    /// Returns one prediction per row of `features`; for classifiers,
    /// the probability of the positive class.
    fn predict(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>) -> Array1<f64>;

    /// Mean loss of the primary objective.
    fn loss(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
            labels: ArrayView1<f64>) -> f64;

    /// Gradient of `loss()` with respect to `theta`.
    fn loss_gradient(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
                     labels: ArrayView1<f64>) -> Array1<f64>;

    /// Default initial solution, fit without regard to the constraints.
    fn fit(&self, features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Length of `theta` for rows of `features`; one weight per column
    /// unless overridden.
    fn num_params(&self, features: ArrayView2<f64>) -> usize {
        features.ncols()
    }
}

/// A stochastic policy parametrized by a vector `theta`.
pub trait PolicyModel: Send + Sync {
    fn num_params(&self) -> usize;

    /// Probability of taking `action` after `observation`.
    fn action_probability(&self, theta: ArrayView1<f64>, observation: usize,
                          action: usize) -> f64;

    /// Gradient of `ln action_probability()` with respect to `theta`.
    fn log_probability_gradient(&self, theta: ArrayView1<f64>, observation: usize,
                                action: usize) -> Array1<f64>;

    /// Fails if `episode` has an observation or action the policy does
    /// not define.
    fn check_episode(&self, _episode: &Episode) -> Result<()> {
        Ok(())
    }
}

/// A model, tagged with its regime.
pub enum Model {
    Supervised(Box<dyn SupervisedModel>),
    Reinforcement(Box<dyn PolicyModel>),
}

impl Model {
    pub fn supervised<M: SupervisedModel + 'static>(model: M) -> Model {
        Model::Supervised(Box::new(model))
    }

    pub fn reinforcement<M: PolicyModel + 'static>(model: M) -> Model {
        Model::Reinforcement(Box::new(model))
    }

    /// Default initial solution: the unconstrained fit for supervised
    /// models, the uniform policy (all zeros) for policies.
    pub fn initial_solution(&self, data: &Dataset) -> Result<Array1<f64>> {
        match (self, data) {
            (Model::Supervised(m), Dataset::Supervised(d)) =>
                m.fit(d.features(), d.labels()),
            (Model::Reinforcement(m), Dataset::Episodes(_)) =>
                Ok(Array1::zeros(m.num_params())),
            _ => Err(mismatch()),
        }
    }

    /// Length of the parameter vector on `data`.
    pub fn num_params(&self, data: &Dataset) -> Result<usize> {
        match (self, data) {
            (Model::Supervised(m), Dataset::Supervised(d)) => Ok(m.num_params(d.features())),
            (Model::Reinforcement(m), Dataset::Episodes(_)) => Ok(m.num_params()),
            _ => Err(mismatch()),
        }
    }

    /// Fails with `Shape` unless `theta` has one entry per parameter and,
    /// for policies, every episode of `data` lies in the policy's
    /// observation and action spaces.
    pub fn check_params(&self, theta: ArrayView1<f64>, data: &Dataset) -> Result<()> {
        let expected = self.num_params(data)?;
        if theta.len() != expected {
            return Err(SeldonianError::Shape(
                format!("expected {} parameters, got {}", expected, theta.len())));
        }
        if let (Model::Reinforcement(m), Dataset::Episodes(d)) = (self, data) {
            d.episodes().iter().try_for_each(|e| m.check_episode(e))?;
        }
        Ok(())
    }
}

pub(crate) fn mismatch() -> SeldonianError {
    SeldonianError::RegimeMismatch("model and dataset belong to different regimes".to_string())
}

/// Per-episode importance weights `prod_t pi(a_t | o_t) / pi_b(a_t | o_t)`.
pub fn importance_weights(policy: &dyn PolicyModel, theta: ArrayView1<f64>,
                          data: &EpisodeData) -> Array1<f64> {
    data.episodes()
        .iter()
        .map(|e| {
            e.observations.iter()
                          .zip(&e.actions)
                          .zip(&e.behavior_probabilities)
                          .map(|((&o, &a), &pb)| policy.action_probability(theta, o, a) / pb)
                          .product::<f64>()
        })
        .collect()
}

/// The primary objective minimised by candidate selection.
pub trait Objective: Sync {
    fn value(&self, theta: ArrayView1<f64>, data: &Dataset) -> Result<f64>;

    fn gradient(&self, theta: ArrayView1<f64>, data: &Dataset) -> Result<Array1<f64>>;
}

/// A model's built-in objective: the supervised loss, or the negated
/// importance-sampling estimate of the normalised return.
impl Objective for Model {
    fn value(&self, theta: ArrayView1<f64>, data: &Dataset) -> Result<f64> {
        match (self, data) {
            (Model::Supervised(m), Dataset::Supervised(d)) =>
                Ok(m.loss(theta, d.features(), d.labels())),
            (Model::Reinforcement(m), Dataset::Episodes(d)) => {
                let w = importance_weights(&**m, theta, d);
                Ok(-(w * d.normalized_returns()).mean().unwrap_or(0.))
            },
            _ => Err(mismatch()),
        }
    }

    fn gradient(&self, theta: ArrayView1<f64>, data: &Dataset) -> Result<Array1<f64>> {
        match (self, data) {
            (Model::Supervised(m), Dataset::Supervised(d)) =>
                Ok(m.loss_gradient(theta, d.features(), d.labels())),
            (Model::Reinforcement(m), Dataset::Episodes(d)) => {
                // grad of w_i * G_i is w_i * G_i * sum_t grad ln pi(a_t | o_t).
                let w = importance_weights(&**m, theta, d) * d.normalized_returns();
                let mut grad = Array1::<f64>::zeros(theta.len());

                for (e, wi) in d.episodes().iter().zip(w.iter()) {
                    for (&o, &a) in e.observations.iter().zip(&e.actions) {
                        grad.scaled_add(*wi, &m.log_probability_gradient(theta, o, a));
                    }
                }
                Ok(grad.mapv(|g| -g / (d.len().max(1) as f64)))
            },
            _ => Err(mismatch()),
        }
    }
}

