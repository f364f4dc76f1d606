//! Barrier candidate selection.
//!
//! Minimises `f(theta) + P(theta)`, where the penalty
//! `P = scale * sum_i (g_i + g_i^2)` runs over the constraints whose
//! candidate upper bound `g_i` is positive. The penalty is treated as a
//! black box: its gradient is estimated by simultaneous perturbation,
//! from two bound evaluations per iteration whatever the dimension.
use ndarray::prelude::*;
use pcg_rand::Pcg32;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::optimizer::{Adam, CandidateSelection, OptimizerConfig, Strategy};


/// Barrier penalty of upper bounds `g`.
pub fn penalty(g: &[f64], scale: f64) -> f64 {
    g.iter()
     .filter(|&&gi| gi > 0.)
     .map(|&gi| scale * (gi + gi * gi))
     .sum()
}

pub struct Barrier {
    adam: Adam,
    rng: Pcg32,
    scale: f64,
    perturbation: f64,
}

impl Barrier {
    /// Constructs the strategy for a parameter vector of length `dim`,
    /// with perturbations drawn from a PRNG seeded by `config.seed`.
    pub fn new(dim: usize, config: &OptimizerConfig) -> Barrier {
        Barrier {
            adam: Adam::new(dim, config.alpha_theta, config.beta_velocity, config.beta_rmsprop),
            rng: Pcg32::seed_from_u64(config.seed),
            scale: config.barrier_scale,
            perturbation: config.fd_step,
        }
    }

    /// Simultaneous perturbation estimate of the penalty gradient at
    /// `theta`, with Rademacher directions.
    fn penalty_gradient(&mut self, selection: &CandidateSelection, theta: ArrayView1<f64>)
            -> Result<Array1<f64>> {
        let c = self.perturbation;
        let rng = &mut self.rng;
        let direction = Array1::from_shape_fn(theta.len(),
                                              |_| if rng.gen_bool(0.5) { 1. } else { -1. });

        let up = &theta + &(&direction * c);
        let down = &theta - &(&direction * c);
        let p_up = penalty(&selection.upper_bounds(up.view())?, self.scale);
        let p_down = penalty(&selection.upper_bounds(down.view())?, self.scale);

        Ok(direction.mapv(|d| (p_up - p_down) / (2. * c * d)))
    }
}

impl Strategy for Barrier {
    fn step(&mut self, selection: &CandidateSelection, theta: &mut Array1<f64>, _f: f64,
            g: &[f64]) -> Result<()> {
        let mut grad = selection.objective_gradient(theta.view())?;

        // Far inside the feasible region the penalty is flat.
        if g.iter().any(|&gi| gi > -self.perturbation.sqrt()) {
            let penalty_grad = self.penalty_gradient(selection, theta.view())?;
            grad += &penalty_grad;
        }
        self.adam.step(theta, &grad);

        Ok(())
    }
}
