//! Measure functions and the registry that names them.
//!
//! A measure function is a statistical quantity whose population mean is
//! the target of a confidence bound, e.g. the positive rate `PR` of a
//! classifier or the mean squared error of a regressor. Each measure turns
//! the model's predictions on a data partition into one unbiased sample
//! per row (or per episode); the bound engine then bounds the mean of
//! those samples.
//!
//! Measures are looked up by name within a regime. The built-in measures
//! live in a process-wide registry, created on first use and never
//! mutated afterwards. Adding a measure means building a
//! `MeasureRegistry` with one more entry and passing it to the parser.
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ndarray::prelude::*;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::data::{Dataset, EpisodeData, SupervisedData};
use crate::error::Result;
use crate::models::{importance_weights, mismatch, Model, PolicyModel, SupervisedModel};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubRegime {
    Classification,
    Regression,
}

/// Learning regime. Measure functions and filters are only valid in the
/// regime they were registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    SupervisedLearning(SubRegime),
    ReinforcementLearning,
}

impl Regime {
    pub fn is_supervised(&self) -> bool {
        matches!(self, Regime::SupervisedLearning(_))
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Regime::SupervisedLearning(SubRegime::Classification) =>
                write!(f, "supervised classification"),
            Regime::SupervisedLearning(SubRegime::Regression) =>
                write!(f, "supervised regression"),
            Regime::ReinforcementLearning => write!(f, "reinforcement learning"),
        }
    }
}

pub type SupervisedSampler = fn(&dyn SupervisedModel, ArrayView1<f64>, &SupervisedData)
                                -> Array1<f64>;
pub type EpisodicSampler = fn(&dyn PolicyModel, ArrayView1<f64>, &EpisodeData)
                              -> Array1<f64>;

/// Produces the per-row samples of a measure.
#[derive(Clone, Copy)]
pub enum Sampler {
    Supervised(SupervisedSampler),
    Episodic(EpisodicSampler),
}

/// A named measure function.
#[derive(Clone)]
pub struct MeasureFunction {
    name: String,
    regime: Regime,
    sampler: Sampler,
    // Range of a single sample, if known. Needed by range-based bounds.
    range: Option<(f64, f64)>,
}

pub type Measure = Arc<MeasureFunction>;

impl MeasureFunction {
    pub fn new(name: &str, regime: Regime, sampler: Sampler, range: Option<(f64, f64)>)
            -> MeasureFunction {
        MeasureFunction { name: name.to_string(), regime, sampler, range }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Returns one sample per row (or episode) of `data`, whose mean
    /// estimates the measure at `theta`.
    pub fn samples(&self, model: &Model, theta: ArrayView1<f64>, data: &Dataset)
            -> Result<Array1<f64>> {
        match (&self.sampler, model, data) {
            (Sampler::Supervised(f), Model::Supervised(m), Dataset::Supervised(d)) =>
                Ok(f(&**m, theta, d)),
            (Sampler::Episodic(f), Model::Reinforcement(m), Dataset::Episodes(d)) =>
                Ok(f(&**m, theta, d)),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Debug for MeasureFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MeasureFunction")
         .field("name", &self.name)
         .field("regime", &self.regime)
         .finish()
    }
}

// Measures are identified by (regime, name).
impl PartialEq for MeasureFunction {
    fn eq(&self, other: &MeasureFunction) -> bool {
        self.name == other.name && self.regime == other.regime
    }
}

impl Eq for MeasureFunction {}

impl Hash for MeasureFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.regime.hash(state);
    }
}

/// Measure functions keyed by (regime, name).
#[derive(Debug, Clone, Default)]
pub struct MeasureRegistry {
    measures: HashMap<(Regime, String), Measure>,
}

static GLOBAL: Lazy<MeasureRegistry> = Lazy::new(MeasureRegistry::builtin);

impl MeasureRegistry {
    pub fn new() -> MeasureRegistry {
        MeasureRegistry::default()
    }

    /// The process-wide registry of built-in measures.
    pub fn global() -> &'static MeasureRegistry {
        &GLOBAL
    }

    /// A registry holding the built-in measures:
    ///
    /// * classification: `PR`, `NR`, `FPR`, `FNR`, `TPR`, `TNR`,
    ///   `logistic_loss`, `Error`;
    /// * regression: `Mean_Squared_Error`, `Mean_Error`, `MED_MF`;
    /// * reinforcement learning: `J_pi_new`.
    pub fn builtin() -> MeasureRegistry {
        let classification = Regime::SupervisedLearning(SubRegime::Classification);
        let regression = Regime::SupervisedLearning(SubRegime::Regression);
        let unit = Some((0., 1.));

        let mut registry = MeasureRegistry::new();
        let mut add = |name: &str, regime, f: SupervisedSampler, range| {
            registry.insert(MeasureFunction::new(name, regime, Sampler::Supervised(f), range))
        };
        add("PR", classification, positive_rate, unit);
        add("NR", classification, negative_rate, unit);
        add("FPR", classification, false_positive_rate, unit);
        add("FNR", classification, false_negative_rate, unit);
        add("TPR", classification, true_positive_rate, unit);
        add("TNR", classification, true_negative_rate, unit);
        add("logistic_loss", classification, logistic_loss, None);
        add("Error", classification, error_rate, unit);
        add("Mean_Squared_Error", regression, squared_error, None);
        add("Mean_Error", regression, signed_error, None);
        add("MED_MF", regression, paired_error_difference, None);

        // Returns are normalised to [0, 1] but importance weights are not
        // bounded, so no range is known.
        registry.insert(MeasureFunction::new("J_pi_new", Regime::ReinforcementLearning,
                                             Sampler::Episodic(importance_sampled_return),
                                             None));
        registry
    }

    /// Adds a measure, replacing any measure of the same name and regime.
    pub fn insert(&mut self, measure: MeasureFunction) {
        self.measures.insert((measure.regime, measure.name.clone()), Arc::new(measure));
    }

    pub fn get(&self, regime: Regime, name: &str) -> Option<Measure> {
        self.measures.get(&(regime, name.to_string())).cloned()
    }

    /// Sorted names of the measures available in `regime`.
    pub fn names(&self, regime: Regime) -> Vec<&str> {
        let mut names = self.measures
                            .keys()
                            .filter(|(r, _)| *r == regime)
                            .map(|(_, n)| n.as_str())
                            .collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

fn positive_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    model.predict(theta, data.features())
}

fn negative_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    model.predict(theta, data.features()).mapv(|p| 1. - p)
}

fn false_positive_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>,
                       data: &SupervisedData) -> Array1<f64> {
    positive_rate(model, theta, &data.with_label(0.))
}

fn false_negative_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>,
                       data: &SupervisedData) -> Array1<f64> {
    negative_rate(model, theta, &data.with_label(1.))
}

fn true_positive_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>,
                      data: &SupervisedData) -> Array1<f64> {
    positive_rate(model, theta, &data.with_label(1.))
}

fn true_negative_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>,
                      data: &SupervisedData) -> Array1<f64> {
    negative_rate(model, theta, &data.with_label(0.))
}

fn logistic_loss(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    let p = model.predict(theta, data.features());
    p.iter()
     .zip(data.labels())
     .map(|(&p, &y)| -(y * p.max(1e-15).ln() + (1. - y) * (1. - p).max(1e-15).ln()))
     .collect()
}

/// Probabilistic misclassification: the probability mass the classifier
/// puts on the wrong label.
fn error_rate(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    let p = model.predict(theta, data.features());
    p.iter()
     .zip(data.labels())
     .map(|(&p, &y)| y * (1. - p) + (1. - y) * p)
     .collect()
}

fn squared_error(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    (model.predict(theta, data.features()) - &data.labels()).mapv(|r| r * r)
}

fn signed_error(model: &dyn SupervisedModel, theta: ArrayView1<f64>, data: &SupervisedData)
        -> Array1<f64> {
    model.predict(theta, data.features()) - &data.labels()
}

/// Difference of signed errors between paired rows of group `M` and the
/// rows outside it. The i-th row with `M = 1` is paired with the i-th row
/// without, up to the size of the smaller group; data without an `M`
/// column has no pairs.
fn paired_error_difference(model: &dyn SupervisedModel, theta: ArrayView1<f64>,
                           data: &SupervisedData) -> Array1<f64> {
    let (male, female) = match data.split("M") {
        Some(groups) => groups,
        None => return Array1::zeros(0),
    };
    let pairs = (0..male.len().min(female.len())).collect::<Vec<_>>();

    signed_error(model, theta, &male.select(&pairs))
        - signed_error(model, theta, &female.select(&pairs))
}

/// Per-episode importance-sampling estimate of the normalised return of
/// the new policy.
fn importance_sampled_return(policy: &dyn PolicyModel, theta: ArrayView1<f64>,
                             data: &EpisodeData) -> Array1<f64> {
    importance_weights(policy, theta, data) * data.normalized_returns()
}
