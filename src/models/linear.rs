//! Linear and logistic regression models.
//!
//! Unconstrained fits, used as default initial solutions, go through
//! rusty-machine: the normal equations are solved with its LU solver and
//! the logistic loss is minimised with its gradient descent.
use ndarray::prelude::*;
use rusty_machine::learning::optim::grad_desc::GradientDesc;
use rusty_machine::learning::optim::{OptimAlgorithm, Optimizable};
use rusty_machine::linalg::{Matrix, Vector};

use crate::error::{Result, SeldonianError};
use crate::models::SupervisedModel;


fn sigmoid(z: f64) -> f64 {
    1. / (1. + (-z).exp())
}

/// Least-squares linear regression, `y_hat = X theta`.
///
/// Features should include a column of ones if an intercept is wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearRegression;

impl SupervisedModel for LinearRegression {
    fn predict(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>) -> Array1<f64> {
        features.dot(&theta)
    }

    /// Mean squared error.
    fn loss(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
            labels: ArrayView1<f64>) -> f64 {
        let residuals = self.predict(theta, features) - &labels;
        residuals.mapv(|r| r * r).mean().unwrap_or(0.)
    }

    fn loss_gradient(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
                     labels: ArrayView1<f64>) -> Array1<f64> {
        let n = labels.len().max(1) as f64;
        let residuals = self.predict(theta, features) - &labels;
        features.t().dot(&residuals) * (2. / n)
    }

    /// Solves the normal equations `X^T X theta = X^T y`.
    fn fit(&self, features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<Array1<f64>> {
        let d = features.ncols();
        let gram = features.t().dot(&features);
        let moments = features.t().dot(&labels);

        let theta = Matrix::new(d, d, gram.iter().cloned().collect::<Vec<_>>())
                           .solve(Vector::new(moments.to_vec()))
                           .map_err(|e| SeldonianError::Shape(
                               format!("cannot solve the normal equations: {}", e)))?;
        let theta = Array1::from(theta.into_vec());

        if theta.iter().any(|x| !x.is_finite()) {
            return Err(SeldonianError::Shape("singular normal equations".to_string()));
        }
        Ok(theta)
    }
}

/// Binary logistic regression, `p(y = 1 | x) = sigmoid(x . theta)`.
#[derive(Debug, Clone, Copy)]
pub struct LogisticRegression {
    /// Step size of the gradient descent used by `fit()`.
    pub learning_rate: f64,
    /// Number of gradient descent steps used by `fit()`.
    pub fit_iters: usize,
}

impl Default for LogisticRegression {
    fn default() -> LogisticRegression {
        LogisticRegression {
            learning_rate: 0.5,
            fit_iters: 500,
        }
    }
}

impl SupervisedModel for LogisticRegression {
    fn predict(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>) -> Array1<f64> {
        features.dot(&theta).mapv(sigmoid)
    }

    /// Mean logistic loss (cross entropy).
    fn loss(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
            labels: ArrayView1<f64>) -> f64 {
        let p = self.predict(theta, features);
        p.iter()
         .zip(labels.iter())
         .map(|(&p, &y)| -(y * p.max(1e-15).ln() + (1. - y) * (1. - p).max(1e-15).ln()))
         .sum::<f64>() / (labels.len().max(1) as f64)
    }

    fn loss_gradient(&self, theta: ArrayView1<f64>, features: ArrayView2<f64>,
                     labels: ArrayView1<f64>) -> Array1<f64> {
        let n = labels.len().max(1) as f64;
        let residuals = self.predict(theta, features) - &labels;
        features.t().dot(&residuals) / n
    }

    fn fit(&self, features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<Array1<f64>> {
        if !(self.learning_rate > 0.) {
            return Err(SeldonianError::InvalidConfig(
                format!("learning rate must be positive, got {}", self.learning_rate)));
        }
        let start = vec![0.; features.ncols()];
        let theta = GradientDesc::new(self.learning_rate, self.fit_iters)
                        .optimize(self, &start, &features.to_owned(), &labels.to_owned());

        Ok(Array1::from(theta))
    }
}

/// Mean logistic loss and its gradient, for rusty-machine's optimizers.
impl Optimizable for LogisticRegression {
    type Inputs = Array2<f64>;
    type Targets = Array1<f64>;

    fn compute_grad(&self, params: &[f64], inputs: &Array2<f64>, targets: &Array1<f64>)
            -> (f64, Vec<f64>) {
        let theta = ArrayView1::from(params);

        (self.loss(theta, inputs.view(), targets.view()),
         self.loss_gradient(theta, inputs.view(), targets.view()).to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Verify that least squares recovers an exact linear relation.
    #[test]
    fn linear_fit() {
        let x = array![[1., 0.], [1., 1.], [1., 2.], [1., 3.]];
        let y = array![1., 3., 5., 7.];

        let theta = LinearRegression.fit(x.view(), y.view()).unwrap();

        assert_abs_diff_eq!(theta[0], 1., epsilon = 1e-9);
        assert_abs_diff_eq!(theta[1], 2., epsilon = 1e-9);
        assert_abs_diff_eq!(LinearRegression.loss(theta.view(), x.view(), y.view()),
                            0., epsilon = 1e-12);
    }

    #[test]
    fn linear_gradient_matches_finite_differences() {
        let x = array![[1., 0.5], [1., -1.], [1., 2.]];
        let y = array![0., 1., 3.];
        let theta = array![0.3, -0.2];
        let h = 1e-6;

        let grad = LinearRegression.loss_gradient(theta.view(), x.view(), y.view());
        for j in 0..2 {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[j] += h;
            down[j] -= h;
            let fd = (LinearRegression.loss(up.view(), x.view(), y.view())
                      - LinearRegression.loss(down.view(), x.view(), y.view())) / (2. * h);
            assert_abs_diff_eq!(grad[j], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn logistic_fit_separates() {
        let x = array![[1., -2.], [1., -1.], [1., 1.], [1., 2.]];
        let y = array![0., 0., 1., 1.];
        let model = LogisticRegression::default();

        let theta = model.fit(x.view(), y.view()).unwrap();
        let p = model.predict(theta.view(), x.view());

        assert!(p[0] < 0.5 && p[1] < 0.5);
        assert!(p[2] > 0.5 && p[3] > 0.5);
    }

    #[test]
    fn singular() {
        let x = array![[1., 1.], [1., 1.]];
        let y = array![0., 1.];

        assert!(LinearRegression.fit(x.view(), y.view()).is_err());
    }
}
