//! Statistical helper routines.
use statrs::distribution::{ContinuousCDF, StudentsT};


/// Returns the `p`-quantile of Student's t distribution with `df`
/// degrees of freedom.
///
/// Returns `None` if the quantile is undefined (`df <= 0` or `p`
/// outside (0, 1)).
pub fn tinv(p: f64, df: f64) -> Option<f64> {
    if !(p > 0. && p < 1.) {
        return None;
    }
    StudentsT::new(0., 1., df).ok()
                              .map(|t| t.inverse_cdf(p))
}

/// Discounted sum of rewards: `sum_t gamma^t * r_t`.
pub fn discounted_return(rewards: &[f64], gamma: f64) -> f64 {
    rewards.iter()
           .rev()
           .fold(0., |acc, r| r + gamma * acc)
}
