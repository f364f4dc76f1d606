//! The seldonian crate.
//!
//! A crate implementing Seldonian algorithms: training procedures that
//! return a model only if they can certify, with confidence `1 - delta`,
//! that user-specified behavioral constraints (e.g., fairness or safety
//! bounds) hold for it; otherwise they return "No Solution Found".
//!
//!
//! # Overview
//! * Constraints are plain strings, such as
//!   `abs((PR | [M]) - (PR | [F])) <= 0.15`, compiled into expression
//!   trees by the [parser](tree/parser/index.html).
//! * The [bound engine](bounds/index.html) computes confidence bounds on
//!   a tree's value by propagating confidence intervals of its measure
//!   functions through interval arithmetic.
//! * [Candidate selection](optimizer/index.html) searches for parameters
//!   predicted to satisfy every constraint, on the candidate partition.
//! * The [safety test](safety/index.html) issues the binding verdict on
//!   the safety partition.
//!
//! Models are consumed through the capability traits in `models`; a few
//! reference models are included.
//!
//! # Examples
//!
//! Bound the mean squared error of a linear regression on a safety
//! partition.
//!
//! ```
//! use ndarray::array;
//! use seldonian::bounds::{BoundEngine, BoundMode};
//! use seldonian::data::{Dataset, Partition, SupervisedData};
//! use seldonian::measures::{Regime, SubRegime};
//! use seldonian::models::{LinearRegression, Model};
//! use seldonian::tree::Constraint;
//!
//! let regime = Regime::SupervisedLearning(SubRegime::Regression);
//! let constraint = Constraint::parse("Mean_Squared_Error <= 1.0", 0.05, regime, &[])
//!                            .expect("Failed to parse");
//!
//! let data = SupervisedData::without_sensitive(array![[1., 0.],
//!                                                     [1., 1.],
//!                                                     [1., 2.],
//!                                                     [1., 3.]],
//!                                              array![0.1, 0.9, 2.2, 2.9])
//!                           .expect("Bad shapes");
//! let partition = Partition::safety(Dataset::Supervised(data));
//! let model = Model::supervised(LinearRegression);
//! let theta = array![0., 1.];
//!
//! let engine = BoundEngine::new(&model, theta.view(), &partition, BoundMode::Safety);
//! let upper = engine.upper_bound(&constraint)
//!                   .expect("Failed to bound");
//! assert!(upper < 0.);
//! ```
//!
//! The whole algorithm is run by [Spec](spec/struct.Spec.html).
pub mod bounds;
pub mod data;
pub mod error;
pub mod interval;
pub mod measures;
pub mod models;
pub mod optimizer;
pub mod safety;
pub mod spec;
pub mod tree;
pub mod utils;

pub use crate::error::{ParseError, Result, SeldonianError};
pub use crate::spec::{Outcome, Spec, SpecConfig};
