//! Adam updates.
use ndarray::azip;
use ndarray::prelude::*;


/// Per-parameter Adam step sizes: moving averages of the gradient and of
/// its square, bias-corrected.
#[derive(Debug, Clone)]
pub struct Adam {
    alpha: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl Adam {
    /// Constructs Adam moments for `dim` parameters.
    ///
    /// # Arguments
    ///
    /// * `dim` - Number of parameters.
    /// * `alpha` - Step size.
    /// * `beta1` - Decay of the gradient average ("velocity").
    /// * `beta2` - Decay of the squared gradient average ("rmsprop").
    pub fn new(dim: usize, alpha: f64, beta1: f64, beta2: f64) -> Adam {
        assert!((0. ..1.).contains(&beta1) && (0. ..1.).contains(&beta2));

        Adam {
            alpha,
            beta1,
            beta2,
            epsilon: 1e-8,
            m: Array1::zeros(dim),
            v: Array1::zeros(dim),
            t: 0,
        }
    }

    /// Moves `theta` one step against `grad`.
    pub fn step(&mut self, theta: &mut Array1<f64>, grad: &Array1<f64>) {
        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);

        self.m.zip_mut_with(grad, |m, &g| *m = b1 * *m + (1. - b1) * g);
        self.v.zip_mut_with(grad, |v, &g| *v = b2 * *v + (1. - b2) * g * g);

        let m_correction = 1. - b1.powi(self.t);
        let v_correction = 1. - b2.powi(self.t);
        let (alpha, epsilon) = (self.alpha, self.epsilon);

        azip!((x in theta, &m in &self.m, &v in &self.v)
              *x -= alpha * (m / m_correction) / ((v / v_correction).sqrt() + epsilon));
    }

    /// Number of steps taken.
    pub fn steps(&self) -> i32 {
        self.t
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// The first bias-corrected step has length `alpha` in every
    /// coordinate with a nonzero gradient.
    #[test]
    fn first_step() {
        let mut adam = Adam::new(3, 0.1, 0.9, 0.95);
        let mut theta = array![1., 1., 1.];

        adam.step(&mut theta, &array![4., -0.5, 0.]);

        assert_abs_diff_eq!(theta[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(theta[1], 1.1, epsilon = 1e-6);
        assert_abs_diff_eq!(theta[2], 1.);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn minimises_quadratic() {
        let mut adam = Adam::new(2, 0.05, 0.9, 0.95);
        let mut theta = array![3., -2.];

        for _ in 0..2000 {
            let grad = theta.mapv(|x| 2. * (x - 1.));
            adam.step(&mut theta, &grad);
        }

        assert_abs_diff_eq!(theta[0], 1., epsilon = 5e-2);
        assert_abs_diff_eq!(theta[1], 1., epsilon = 5e-2);
    }
}
