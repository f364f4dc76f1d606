//! Lagrangian candidate selection.
//!
//! Minimises `L(theta, lambda) = f(theta) + sum_i lambda_i * g_i(theta)`,
//! where `g_i` is the candidate upper bound of constraint `i`, with Adam
//! descent steps on `theta` and projected ascent steps on `lambda`.
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::error::Result;
use crate::optimizer::{Adam, CandidateSelection, OptimizerConfig, Strategy};


pub struct Lagrangian {
    adam: Adam,
    lambdas: Vec<f64>,
    alpha_lamb: f64,
    fd_step: f64,
}

impl Lagrangian {
    /// Constructs the strategy for `n_constraints` constraints and a
    /// parameter vector of length `dim`.
    pub fn new(n_constraints: usize, dim: usize, config: &OptimizerConfig) -> Lagrangian {
        Lagrangian {
            adam: Adam::new(dim, config.alpha_theta, config.beta_velocity, config.beta_rmsprop),
            lambdas: vec![config.lambda_init; n_constraints],
            alpha_lamb: config.alpha_lamb,
            fd_step: config.fd_step,
        }
    }
}

/// Jacobian of the candidate upper bounds at `theta` by central finite
/// differences: row `i` is the gradient of constraint `i`'s bound.
pub fn bounds_jacobian(selection: &CandidateSelection, theta: ArrayView1<f64>, h: f64)
        -> Result<Array2<f64>> {
    let dim = theta.len();
    let columns = (0..dim).into_par_iter()
                          .map(|j| -> Result<Vec<f64>> {
                              let mut up = theta.to_owned();
                              let mut down = theta.to_owned();
                              up[j] += h;
                              down[j] -= h;
                              let g_up = selection.upper_bounds(up.view())?;
                              let g_down = selection.upper_bounds(down.view())?;

                              Ok(g_up.iter()
                                     .zip(&g_down)
                                     .map(|(u, d)| (u - d) / (2. * h))
                                     .collect::<Vec<_>>())
                          })
                          .collect::<Result<Vec<_>>>()?;

    let mut jacobian = Array2::<f64>::zeros((selection.constraints().len(), dim));
    for (j, column) in columns.iter().enumerate() {
        for (i, d) in column.iter().enumerate() {
            jacobian[[i, j]] = *d;
        }
    }
    Ok(jacobian)
}

impl Strategy for Lagrangian {
    fn step(&mut self, selection: &CandidateSelection, theta: &mut Array1<f64>, _f: f64,
            g: &[f64]) -> Result<()> {
        let mut grad = selection.objective_gradient(theta.view())?;

        // Inactive multipliers contribute nothing; skip the Jacobian.
        if self.lambdas.iter().any(|&l| l > 0.) {
            let jacobian = bounds_jacobian(selection, theta.view(), self.fd_step)?;
            for (row, &lambda) in jacobian.outer_iter().zip(&self.lambdas) {
                if lambda > 0. {
                    grad.scaled_add(lambda, &row);
                }
            }
        }
        self.adam.step(theta, &grad);

        // dL/dlambda_i = g_i.
        for (lambda, &gi) in self.lambdas.iter_mut().zip(g) {
            *lambda = (*lambda + self.alpha_lamb * gi).max(0.);
        }
        Ok(())
    }

    fn lambdas(&self) -> Vec<f64> {
        self.lambdas.clone()
    }
}
