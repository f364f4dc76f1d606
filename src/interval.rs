//! Confidence intervals and interval arithmetic.
//!
//! An `Interval` is the (lower, upper) confidence interval of a real-valued
//! quantity at some confidence level. Intervals are never mutated: the
//! operators below always produce a fresh interval which contains every
//! value the operation can take when its operands range over their
//! respective intervals.
use std::f64;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeldonianError};


/// A closed interval `[lower, upper]`, with infinite ends permitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

/// Replaces a NaN lower bound by -infinity.
fn protect_lower(x: f64) -> f64 {
    if x.is_nan() { f64::NEG_INFINITY } else { x }
}

/// Replaces a NaN upper bound by +infinity.
fn protect_upper(x: f64) -> f64 {
    if x.is_nan() { f64::INFINITY } else { x }
}

impl Interval {
    /// Constructs an interval, widening NaN ends to the matching infinity.
    ///
    /// # Panics
    ///
    /// - if `lower > upper`.
    pub fn new(lower: f64, upper: f64) -> Interval {
        let lower = protect_lower(lower);
        let upper = protect_upper(upper);
        assert!(lower <= upper, "Interval lower bound exceeds upper bound");

        Interval { lower, upper }
    }

    /// The degenerate interval `[value, value]`.
    pub fn point(value: f64) -> Interval {
        Interval::new(value, value)
    }

    /// `(-infinity, +infinity)`.
    pub fn unbounded() -> Interval {
        Interval { lower: f64::NEG_INFINITY, upper: f64::INFINITY }
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    pub fn add(&self, rhs: &Interval) -> Interval {
        Interval::new(self.lower + rhs.lower, self.upper + rhs.upper)
    }

    pub fn sub(&self, rhs: &Interval) -> Interval {
        Interval::new(self.lower - rhs.upper, self.upper - rhs.lower)
    }

    /// Sign-aware product: the bounds are the extreme corners
    /// `{l1*l2, l1*u2, u1*l2, u1*u2}`.
    ///
    /// A corner of the form `0 * inf` is undefined and does not
    /// contribute.
    pub fn mul(&self, rhs: &Interval) -> Interval {
        let corners = [self.lower * rhs.lower,
                       self.lower * rhs.upper,
                       self.upper * rhs.lower,
                       self.upper * rhs.upper];

        let lower = corners.iter().cloned().fold(f64::INFINITY, f64::min);
        let upper = corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        if lower > upper {
            // Every corner was undefined.
            return Interval::unbounded();
        }
        Interval::new(lower, upper)
    }

    /// Reciprocal `1 / self`.
    ///
    /// Fails with `DivisionBound` if zero lies in the interior of the
    /// interval, or if the interval is exactly `[0, 0]`.
    pub fn recip(&self) -> Result<Interval> {
        let Interval { lower, upper } = *self;

        if (lower < 0. && 0. < upper) || (lower == 0. && upper == 0.) {
            return Err(SeldonianError::DivisionBound { divisor: *self });
        }

        let recip = if upper == 0. {
            Interval::new(f64::NEG_INFINITY, 1. / lower)
        } else if lower == 0. {
            Interval::new(1. / upper, f64::INFINITY)
        } else {
            Interval::new(1. / upper, 1. / lower)
        };
        Ok(recip)
    }

    /// Quotient `self / rhs`, as `self * (1 / rhs)`.
    pub fn div(&self, rhs: &Interval) -> Result<Interval> {
        Ok(self.mul(&rhs.recip()?))
    }

    pub fn abs(&self) -> Interval {
        let Interval { lower, upper } = *self;

        if lower >= 0. {
            *self
        } else if upper <= 0. {
            Interval::new(-upper, -lower)
        } else {
            Interval::new(0., (-lower).max(upper))
        }
    }

    /// `exp` is monotone, so it maps the ends.
    pub fn exp(&self) -> Interval {
        Interval::new(self.lower.exp(), self.upper.exp())
    }

    /// Pointwise minimum of two intervals.
    pub fn min(&self, rhs: &Interval) -> Interval {
        Interval::new(self.lower.min(rhs.lower), self.upper.min(rhs.upper))
    }

    /// Pointwise maximum of two intervals.
    pub fn max(&self, rhs: &Interval) -> Interval {
        Interval::new(self.lower.max(rhs.lower), self.upper.max(rhs.upper))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let open = if self.lower.is_infinite() { '(' } else { '[' };
        let close = if self.upper.is_infinite() { ')' } else { ']' };

        write!(f, "{}{}, {}{}", open, self.lower, self.upper, close)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn samples(iv: &Interval) -> Vec<f64> {
        (0..=10).map(|i| iv.lower + (iv.upper - iv.lower) * (i as f64) / 10.)
                .collect()
    }

    /// Verify that the product interval contains every product of
    /// points drawn from the operands, for all sign combinations.
    #[test]
    fn mul_contains_products() {
        let intervals = vec![Interval::new(-3., -1.),
                             Interval::new(-2., 5.),
                             Interval::new(0., 4.),
                             Interval::new(1.5, 2.5),
                             Interval::point(-0.5)];

        for a in &intervals {
            for b in &intervals {
                let prod = a.mul(b);
                for x in samples(a) {
                    for y in samples(b) {
                        assert!(prod.contains(x * y),
                                "{} * {} = {} does not contain {}", a, b, prod, x * y);
                    }
                }
            }
        }
    }

    #[test]
    fn sub_is_crossed() {
        let a = Interval::new(1., 2.);
        let b = Interval::new(0.5, 3.);

        assert_eq!(a.sub(&b), Interval::new(-2., 1.5));
        assert_eq!(a.add(&b), Interval::new(1.5, 5.));
    }

    #[test]
    fn div_fails_on_interior_zero() {
        let a = Interval::new(1., 2.);

        assert!(matches!(a.div(&Interval::new(-1., 1.)),
                         Err(SeldonianError::DivisionBound { .. })));
        assert!(a.div(&Interval::point(0.)).is_err());
    }

    #[test]
    fn div_by_half_open_divisor() {
        let a = Interval::new(1., 2.);

        assert_eq!(a.div(&Interval::new(2., 4.)).unwrap(), Interval::new(0.25, 1.));
        assert_eq!(a.div(&Interval::new(0., 4.)).unwrap(),
                   Interval::new(0.25, f64::INFINITY));
        assert_eq!(a.div(&Interval::new(-4., 0.)).unwrap(),
                   Interval::new(f64::NEG_INFINITY, -0.25));
    }

    #[test]
    fn abs_cases() {
        assert_eq!(Interval::new(-3., 2.).abs(), Interval::new(0., 3.));
        assert_eq!(Interval::new(-3., -2.).abs(), Interval::new(2., 3.));
        assert_eq!(Interval::new(1., 2.).abs(), Interval::new(1., 2.));
    }

    #[test]
    fn min_max_pointwise() {
        let a = Interval::new(0., 3.);
        let b = Interval::new(1., 2.);

        assert_eq!(a.min(&b), Interval::new(0., 2.));
        assert_eq!(a.max(&b), Interval::new(1., 3.));
    }

    #[test]
    fn infinite_corners() {
        let a = Interval::new(0., 1.);
        let b = Interval::new(1., f64::INFINITY);

        assert_eq!(a.mul(&b), Interval::new(0., f64::INFINITY));
        assert_eq!(Interval::new(f64::NAN, 1.).lower, f64::NEG_INFINITY);
    }
}
