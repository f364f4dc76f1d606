//! Candidate selection.
//!
//! Candidate selection searches for a parameter vector that minimises the
//! primary objective on the candidate partition while the candidate-mode
//! upper bound of every constraint, which predicts the safety test's
//! bound, stays at or below zero.
//!
//! Two strategies are provided, chosen by `optimization_technique`:
//!
//! * `gradient_descent`: Lagrangian descent on `theta` and projected
//!   ascent on one multiplier per constraint (see `gradient_descent`);
//! * `black_box`: a barrier penalty on predicted violations, added to the
//!   objective (see `barrier`).
//!
//! Both run the same loop: evaluate, record, check the stop conditions,
//! step. The best iterate, not the last one, is returned.
pub mod adam;
pub mod barrier;
pub mod gradient_descent;

use std::time::{Duration, Instant};

use ndarray::prelude::*;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bounds::{BoundEngine, BoundMethod, BoundMode};
use crate::data::{Partition, PartitionRole};
use crate::error::{Result, SeldonianError};
use crate::models::{Model, Objective};
use crate::tree::Constraint;

pub use self::adam::Adam;
pub use self::barrier::Barrier;
pub use self::gradient_descent::Lagrangian;


/// Consecutive stable iterations needed to declare convergence.
pub const CONVERGENCE_PATIENCE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTechnique {
    /// Lagrangian descent-ascent.
    GradientDescent,
    /// Barrier penalty on predicted violations.
    BlackBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialKeyword {
    Default,
}

/// Where candidate selection starts: an explicit vector, or `"default"`
/// for the model's own initial solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialSolution {
    Keyword(InitialKeyword),
    Vector(Vec<f64>),
}

impl Default for InitialSolution {
    fn default() -> InitialSolution {
        InitialSolution::Keyword(InitialKeyword::Default)
    }
}

impl InitialSolution {
    /// Returns the starting point for `model` on `partition`.
    ///
    /// Fails with `Shape` if an explicit vector does not have one entry
    /// per model parameter.
    pub fn resolve(&self, model: &Model, partition: &Partition) -> Result<Array1<f64>> {
        let theta = match self {
            InitialSolution::Keyword(InitialKeyword::Default) =>
                model.initial_solution(partition.dataset())?,
            InitialSolution::Vector(v) => Array1::from(v.clone()),
        };
        model.check_params(theta.view(), partition.dataset())?;
        Ok(theta)
    }
}

fn default_num_iters() -> usize { 200 }
fn default_alpha_theta() -> f64 { 0.05 }
fn default_alpha_lamb() -> f64 { 0.05 }
fn default_beta_velocity() -> f64 { 0.9 }
fn default_beta_rmsprop() -> f64 { 0.95 }
fn default_lambda_init() -> f64 { 0.5 }
fn default_tolerance() -> f64 { 1e-6 }
fn default_fd_step() -> f64 { 1e-4 }
fn default_barrier_scale() -> f64 { 10. }

/// Hyperparameters of candidate selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub optimization_technique: OptimizationTechnique,
    #[serde(default)]
    pub initial_solution: InitialSolution,
    /// Iteration budget.
    #[serde(default = "default_num_iters")]
    pub num_iters: usize,
    /// Adam step size on `theta`.
    #[serde(default = "default_alpha_theta")]
    pub alpha_theta: f64,
    /// Ascent step size on the Lagrange multipliers.
    #[serde(default = "default_alpha_lamb")]
    pub alpha_lamb: f64,
    #[serde(default = "default_beta_velocity")]
    pub beta_velocity: f64,
    #[serde(default = "default_beta_rmsprop")]
    pub beta_rmsprop: f64,
    /// Initial value of every Lagrange multiplier.
    #[serde(default = "default_lambda_init")]
    pub lambda_init: f64,
    /// Largest change of the objective and of every bound for an
    /// iteration to count as stable.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Wall-clock budget, checked once per iteration.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    /// Step of finite differences and of simultaneous perturbations.
    #[serde(default = "default_fd_step")]
    pub fd_step: f64,
    /// Weight of the barrier penalty.
    #[serde(default = "default_barrier_scale")]
    pub barrier_scale: f64,
    /// Seed of the perturbations drawn by `black_box`.
    #[serde(default)]
    pub seed: u64,
}

impl OptimizerConfig {
    /// Default hyperparameters for `technique`.
    pub fn new(technique: OptimizationTechnique) -> OptimizerConfig {
        OptimizerConfig {
            optimization_technique: technique,
            initial_solution: InitialSolution::default(),
            num_iters: default_num_iters(),
            alpha_theta: default_alpha_theta(),
            alpha_lamb: default_alpha_lamb(),
            beta_velocity: default_beta_velocity(),
            beta_rmsprop: default_beta_rmsprop(),
            lambda_init: default_lambda_init(),
            tolerance: default_tolerance(),
            time_limit_secs: None,
            fd_step: default_fd_step(),
            barrier_scale: default_barrier_scale(),
            seed: 0,
        }
    }

    /// Rejects hyperparameters no strategy can run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SeldonianError::InvalidConfig(msg));

        if !(0. ..1.).contains(&self.beta_velocity) || !(0. ..1.).contains(&self.beta_rmsprop) {
            return invalid(format!("Adam decay rates must lie in [0, 1), got {} and {}",
                                   self.beta_velocity, self.beta_rmsprop));
        }
        if !(self.alpha_theta > 0.) || !(self.alpha_lamb >= 0.) {
            return invalid("step sizes must be positive".to_string());
        }
        if !(self.fd_step > 0.) {
            return invalid(format!("fd_step must be positive, got {}", self.fd_step));
        }
        if let Some(secs) = self.time_limit_secs {
            time_limit(secs)?;
        }
        if !(self.lambda_init >= 0.) {
            return invalid(format!("lambda_init must be nonnegative, got {}",
                                   self.lambda_init));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Converged,
    MaxIterReached,
    /// A numerical failure, or a bound that could not be computed.
    Infeasible,
}

/// One recorded iterate.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterate {
    pub theta: Array1<f64>,
    pub objective: f64,
    /// Candidate-mode upper bound of each constraint.
    pub upper_bounds: Vec<f64>,
    /// Lagrange multipliers, empty for `black_box`.
    pub lambdas: Vec<f64>,
}

impl Iterate {
    pub fn is_feasible(&self) -> bool {
        self.upper_bounds.iter().all(|&g| g <= 0.)
    }

    /// Sum of the positive upper bounds.
    pub fn total_violation(&self) -> f64 {
        self.upper_bounds.iter().map(|&g| g.max(0.)).sum()
    }
}

/// Outcome of candidate selection.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    /// Best iterate's parameters, or the initial solution if no iterate
    /// could be evaluated.
    pub theta: Array1<f64>,
    pub status: OptimizationStatus,
    pub objective: f64,
    pub upper_bounds: Vec<f64>,
    pub trajectory: Vec<Iterate>,
}

impl CandidateResult {
    /// True if the best iterate is predicted to pass the safety test.
    pub fn predicted_feasible(&self) -> bool {
        self.objective.is_finite() && self.upper_bounds.iter().all(|&g| g <= 0.)
    }

    pub fn iterations(&self) -> usize {
        self.trajectory.len()
    }
}

/// The best iterate: lowest objective among those predicted feasible or,
/// if none is, smallest total violation.
pub fn best_iterate(trajectory: &[Iterate]) -> Option<&Iterate> {
    let feasible = trajectory.iter()
                             .filter(|it| it.is_feasible())
                             .min_by_key(|it| OrderedFloat(it.objective));

    feasible.or_else(|| trajectory.iter()
                                  .min_by_key(|it| OrderedFloat(it.total_violation())))
}

/// A candidate selection strategy: one update of `theta` per iteration.
pub trait Strategy {
    /// Updates `theta`, given its objective `f` and candidate upper
    /// bounds `g`.
    fn step(&mut self, selection: &CandidateSelection, theta: &mut Array1<f64>, f: f64,
            g: &[f64]) -> Result<()>;

    /// Current Lagrange multipliers, if the strategy has any.
    fn lambdas(&self) -> Vec<f64> {
        vec![]
    }
}

fn time_limit(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| SeldonianError::InvalidConfig(
        format!("time_limit_secs must be a nonnegative number of seconds, got {}", secs)))
}

/// Errors after which the optimization stops as `Infeasible` instead of
/// failing.
fn is_infeasibility(e: &SeldonianError) -> bool {
    matches!(e, SeldonianError::InsufficientData { .. })
}

/// Candidate selection of one specification.
pub struct CandidateSelection<'a> {
    constraints: &'a [Constraint],
    model: &'a Model,
    objective: &'a dyn Objective,
    partition: &'a Partition,
    n_safety: usize,
    config: &'a OptimizerConfig,
    method: BoundMethod,
}

impl<'a> CandidateSelection<'a> {
    /// Constructs a candidate selection minimising the model's own
    /// objective.
    ///
    /// # Arguments
    ///
    /// * `constraints` - Behavioral constraints.
    /// * `model` - Model whose parameters are searched.
    /// * `partition` - Candidate partition.
    /// * `n_safety` - Size of the safety partition the bounds predict for.
    /// * `config` - Hyperparameters.
    pub fn new(constraints: &'a [Constraint], model: &'a Model, partition: &'a Partition,
               n_safety: usize, config: &'a OptimizerConfig) -> CandidateSelection<'a> {
        CandidateSelection {
            constraints,
            model,
            objective: model,
            partition,
            n_safety,
            config,
            method: BoundMethod::default(),
        }
    }

    /// Minimises `objective` instead of the model's own objective.
    pub fn with_objective(mut self, objective: &'a dyn Objective) -> CandidateSelection<'a> {
        self.objective = objective;
        self
    }

    pub fn with_bound_method(mut self, method: BoundMethod) -> CandidateSelection<'a> {
        self.method = method;
        self
    }

    pub fn constraints(&self) -> &[Constraint] {
        self.constraints
    }

    pub fn config(&self) -> &OptimizerConfig {
        self.config
    }

    /// Primary objective at `theta`.
    pub fn objective(&self, theta: ArrayView1<f64>) -> Result<f64> {
        self.objective.value(theta, self.partition.dataset())
    }

    /// Gradient of the primary objective at `theta`.
    pub fn objective_gradient(&self, theta: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.objective.gradient(theta, self.partition.dataset())
    }

    /// Candidate-mode upper bound of every constraint at `theta`.
    pub fn upper_bounds(&self, theta: ArrayView1<f64>) -> Result<Vec<f64>> {
        BoundEngine::new(self.model, theta.view(), self.partition,
                         BoundMode::Candidate { n_safety: self.n_safety })
            .with_method(self.method)
            .upper_bounds(self.constraints)
    }

    /// Runs the strategy named by the configuration from `theta_init`.
    pub fn optimize(&self, theta_init: Array1<f64>) -> Result<CandidateResult> {
        self.config.validate()?;
        if self.partition.role() != PartitionRole::Candidate {
            return Err(SeldonianError::PartitionMisuse(self.partition.role().to_string()));
        }
        self.model.check_params(theta_init.view(), self.partition.dataset())?;

        match self.config.optimization_technique {
            OptimizationTechnique::GradientDescent => {
                let mut strategy = Lagrangian::new(self.constraints.len(), theta_init.len(),
                                                   self.config);
                self.run(&mut strategy, theta_init)
            },
            OptimizationTechnique::BlackBox => {
                let mut strategy = Barrier::new(theta_init.len(), self.config);
                self.run(&mut strategy, theta_init)
            },
        }
    }

    /// Runs `strategy` until convergence, the iteration or time budget
    /// runs out, or a numerical failure.
    pub fn run<S: Strategy>(&self, strategy: &mut S, theta_init: Array1<f64>)
            -> Result<CandidateResult> {
        let start = Instant::now();
        let time_limit = self.config.time_limit_secs.map(time_limit).transpose()?;
        let mut theta = theta_init.clone();
        let mut trajectory: Vec<Iterate> = vec![];
        let mut stable = 0;
        let mut status = OptimizationStatus::MaxIterReached;

        info!(constraints = self.constraints.len(), rows = self.partition.len(),
              technique = ?self.config.optimization_technique, "candidate selection started");

        for iter in 0..self.config.num_iters {
            if time_limit.map_or(false, |limit| start.elapsed() >= limit) {
                info!(iter, "time limit reached");
                break;
            }

            let evaluation = self.objective(theta.view())
                                 .and_then(|f| Ok((f, self.upper_bounds(theta.view())?)));
            let (f, g) = match evaluation {
                Ok(v) => v,
                Err(ref e) if is_infeasibility(e) => {
                    warn!(iter, "{}", e);
                    status = OptimizationStatus::Infeasible;
                    break;
                },
                Err(e) => return Err(e),
            };
            if !f.is_finite() {
                warn!(iter, objective = f, "non-finite objective");
                status = OptimizationStatus::Infeasible;
                break;
            }
            debug!(iter, objective = f, upper_bounds = ?g, "iterate");

            if let Some(last) = trajectory.last() {
                let df = (f - last.objective).abs();
                let dg = g.iter()
                          .zip(&last.upper_bounds)
                          .map(|(a, b)| (a - b).abs())
                          .fold(0., f64::max);
                let dg = if g.iter().any(|x| !x.is_finite()) { f64::INFINITY } else { dg };
                stable = if df < self.config.tolerance && dg < self.config.tolerance {
                    stable + 1
                } else {
                    0
                };
            }
            trajectory.push(Iterate {
                theta: theta.clone(),
                objective: f,
                upper_bounds: g.clone(),
                lambdas: strategy.lambdas(),
            });
            if stable >= CONVERGENCE_PATIENCE {
                status = OptimizationStatus::Converged;
                break;
            }

            match strategy.step(self, &mut theta, f, &g) {
                Ok(()) => {},
                Err(ref e) if is_infeasibility(e) => {
                    warn!(iter, "{}", e);
                    status = OptimizationStatus::Infeasible;
                    break;
                },
                Err(e) => return Err(e),
            }
            if theta.iter().any(|x| !x.is_finite()) {
                warn!(iter, "non-finite parameters after step");
                status = OptimizationStatus::Infeasible;
                break;
            }
        }

        let result = match best_iterate(&trajectory) {
            Some(best) => CandidateResult {
                theta: best.theta.clone(),
                status,
                objective: best.objective,
                upper_bounds: best.upper_bounds.clone(),
                trajectory: vec![],
            },
            None => CandidateResult {
                theta: theta_init,
                status,
                objective: f64::NAN,
                upper_bounds: vec![],
                trajectory: vec![],
            },
        };
        info!(status = ?result.status, iterations = trajectory.len(),
              objective = result.objective, "candidate selection finished");

        Ok(CandidateResult { trajectory, ..result })
    }
}
