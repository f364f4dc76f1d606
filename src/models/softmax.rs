//! Tabular softmax policy.
use ndarray::prelude::*;
use ndarray::s;

use crate::data::Episode;
use crate::error::{Result, SeldonianError};
use crate::models::PolicyModel;


/// A policy over `n_observations` discrete observations and `n_actions`
/// discrete actions, with one preference per (observation, action) pair:
/// `pi(a | o) = exp(theta[o, a]) / sum_b exp(theta[o, b])`.
///
/// `theta` is laid out row-major, observation by observation.
#[derive(Debug, Clone, Copy)]
pub struct TabularSoftmax {
    n_observations: usize,
    n_actions: usize,
}

impl TabularSoftmax {
    pub fn new(n_observations: usize, n_actions: usize) -> TabularSoftmax {
        assert!(n_actions > 0, "A policy needs at least one action");

        TabularSoftmax { n_observations, n_actions }
    }

    /// Action probabilities after `observation`.
    fn probabilities(&self, theta: ArrayView1<f64>, observation: usize) -> Array1<f64> {
        let start = observation * self.n_actions;
        let prefs = theta.slice(s![start..start + self.n_actions]);
        // Shift by the max preference for numerical stability.
        let top = prefs.fold(f64::NEG_INFINITY, |m, &p| m.max(p));
        let exps = prefs.mapv(|p| (p - top).exp());
        let total = exps.sum();

        exps / total
    }
}

impl PolicyModel for TabularSoftmax {
    fn num_params(&self) -> usize {
        self.n_observations * self.n_actions
    }

    fn action_probability(&self, theta: ArrayView1<f64>, observation: usize,
                          action: usize) -> f64 {
        self.probabilities(theta, observation)[action]
    }

    fn log_probability_gradient(&self, theta: ArrayView1<f64>, observation: usize,
                                action: usize) -> Array1<f64> {
        let probs = self.probabilities(theta, observation);
        let mut grad = Array1::<f64>::zeros(self.num_params());
        let start = observation * self.n_actions;

        for (b, p) in probs.iter().enumerate() {
            let indicator = if b == action { 1. } else { 0. };
            grad[start + b] = indicator - p;
        }
        grad
    }

    fn check_episode(&self, episode: &Episode) -> Result<()> {
        if let Some(&o) = episode.observations.iter().find(|&&o| o >= self.n_observations) {
            return Err(SeldonianError::Shape(
                format!("observation {} outside a policy of {} observations",
                        o, self.n_observations)));
        }
        if let Some(&a) = episode.actions.iter().find(|&&a| a >= self.n_actions) {
            return Err(SeldonianError::Shape(
                format!("action {} outside a policy of {} actions", a, self.n_actions)));
        }
        Ok(())
    }
}
