//! Read-only data partitions handed to candidate selection and the
//! safety test.
//!
//! Supervised rows carry features, a label and a set of 0/1 sensitive
//! attribute columns. Reinforcement-learning data is a set of episodes
//! generated by a behavior policy. The core never splits data: callers
//! provide the candidate and safety partitions ready made.
use std::collections::BTreeSet;
use std::fmt;

use ndarray::prelude::*;

use crate::error::{Result, SeldonianError};
use crate::utils::discounted_return;


/// Supervised-learning rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedData {
    features: Array2<f64>,
    labels: Array1<f64>,
    sensitive_columns: Vec<String>,
    // One column per entry of `sensitive_columns`; a row belongs to a
    // group when the group's column is 1.
    sensitive: Array2<f64>,
}

impl SupervisedData {
    /// Constructs supervised data.
    ///
    /// # Arguments
    ///
    /// * `features` - Matrix of feature vectors, one row per example.
    /// * `labels` - Label of each example.
    /// * `sensitive_columns` - Names of the sensitive attribute columns.
    /// * `sensitive` - Matrix of 0/1 sensitive attribute values, one
    ///                 column per name in `sensitive_columns`.
    pub fn new(features: Array2<f64>, labels: Array1<f64>,
               sensitive_columns: Vec<String>, sensitive: Array2<f64>)
            -> Result<SupervisedData> {

        if features.nrows() != labels.len() {
            return Err(SeldonianError::Shape(
                format!("{} feature rows but {} labels", features.nrows(), labels.len())));
        }
        if sensitive.nrows() != labels.len() || sensitive.ncols() != sensitive_columns.len() {
            return Err(SeldonianError::Shape(
                format!("sensitive matrix is {:?}, expected ({}, {})",
                        sensitive.dim(), labels.len(), sensitive_columns.len())));
        }

        Ok(SupervisedData { features, labels, sensitive_columns, sensitive })
    }

    /// Constructs supervised data with no sensitive attributes.
    pub fn without_sensitive(features: Array2<f64>, labels: Array1<f64>)
            -> Result<SupervisedData> {
        let n = labels.len();
        SupervisedData::new(features, labels, vec![], Array2::zeros((n, 0)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> ArrayView2<f64> {
        self.features.view()
    }

    pub fn labels(&self) -> ArrayView1<f64> {
        self.labels.view()
    }

    pub fn sensitive_columns(&self) -> &[String] {
        &self.sensitive_columns
    }

    /// Returns the rows at `indices`, in order.
    pub fn select(&self, indices: &[usize]) -> SupervisedData {
        SupervisedData {
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
            sensitive_columns: self.sensitive_columns.clone(),
            sensitive: self.sensitive.select(Axis(0), indices),
        }
    }

    /// Returns the rows whose sensitive attributes named in `columns`
    /// are all equal to 1.
    ///
    /// The result may be empty; callers decide whether that is an error.
    pub fn filter(&self, columns: &BTreeSet<String>) -> Result<SupervisedData> {
        let col_indices = columns.iter()
                                 .map(|c| self.sensitive_columns
                                              .iter()
                                              .position(|s| s == c)
                                              .ok_or_else(|| SeldonianError::Shape(
                                                  format!("no sensitive column named {}", c))))
                                 .collect::<Result<Vec<_>>>()?;

        let rows = self.sensitive
                       .outer_iter()
                       .enumerate()
                       .filter(|(_, row)| col_indices.iter().all(|&j| row[j] == 1.))
                       .map(|(i, _)| i)
                       .collect::<Vec<_>>();

        Ok(self.select(&rows))
    }

    /// Splits the rows on the sensitive column `column`: the rows where it
    /// is 1, then the others. `None` if there is no such column.
    pub fn split(&self, column: &str) -> Option<(SupervisedData, SupervisedData)> {
        let j = self.sensitive_columns.iter().position(|s| s == column)?;
        let (inside, outside): (Vec<usize>, Vec<usize>) =
            (0..self.len()).partition(|&i| self.sensitive[[i, j]] == 1.);

        Some((self.select(&inside), self.select(&outside)))
    }

    /// Returns the rows with the given label.
    pub fn with_label(&self, label: f64) -> SupervisedData {
        let rows = self.labels
                       .iter()
                       .enumerate()
                       .filter(|&(_, &y)| y == label)
                       .map(|(i, _)| i)
                       .collect::<Vec<_>>();

        self.select(&rows)
    }
}

/// One episode generated by the behavior policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub observations: Vec<usize>,
    pub actions: Vec<usize>,
    pub rewards: Vec<f64>,
    /// Probability the behavior policy gave to each action taken.
    pub behavior_probabilities: Vec<f64>,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Reinforcement-learning episodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeData {
    episodes: Vec<Episode>,
    gamma: f64,
    min_return: f64,
    max_return: f64,
}

impl EpisodeData {
    /// Constructs episode data.
    ///
    /// # Arguments
    ///
    /// * `episodes` - Episodes generated by the behavior policy.
    /// * `gamma` - Discount factor in [0, 1].
    /// * `min_return`, `max_return` - Range of the discounted return,
    ///                                used to normalise returns to [0, 1].
    pub fn new(episodes: Vec<Episode>, gamma: f64, min_return: f64, max_return: f64)
            -> Result<EpisodeData> {

        if !(0. ..=1.).contains(&gamma) {
            return Err(SeldonianError::InvalidConfig(
                format!("discount factor must lie in [0, 1], got {}", gamma)));
        }
        if !(min_return < max_return) {
            return Err(SeldonianError::InvalidConfig(
                format!("empty return range [{}, {}]", min_return, max_return)));
        }
        for (i, e) in episodes.iter().enumerate() {
            if e.observations.len() != e.len()
                    || e.rewards.len() != e.len()
                    || e.behavior_probabilities.len() != e.len() {
                return Err(SeldonianError::Shape(
                    format!("episode {} has fields of different lengths", i)));
            }
            if let Some(p) = e.behavior_probabilities.iter().find(|&&p| !(p > 0. && p <= 1.)) {
                return Err(SeldonianError::InvalidConfig(
                    format!("episode {} has behavior probability {}, expected (0, 1]", i, p)));
            }
        }

        Ok(EpisodeData { episodes, gamma, min_return, max_return })
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Discounted return of each episode, normalised to [0, 1].
    pub fn normalized_returns(&self) -> Array1<f64> {
        let range = self.max_return - self.min_return;

        self.episodes
            .iter()
            .map(|e| (discounted_return(&e.rewards, self.gamma) - self.min_return) / range)
            .collect()
    }
}

/// Rows of one regime.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Supervised(SupervisedData),
    Episodes(EpisodeData),
}

impl Dataset {
    /// Number of rows (supervised) or episodes (reinforcement learning).
    pub fn len(&self) -> usize {
        match self {
            Dataset::Supervised(d) => d.len(),
            Dataset::Episodes(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sensitive_columns(&self) -> &[String] {
        match self {
            Dataset::Supervised(d) => d.sensitive_columns(),
            Dataset::Episodes(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
    Candidate,
    Safety,
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartitionRole::Candidate => write!(f, "candidate"),
            PartitionRole::Safety => write!(f, "safety"),
        }
    }
}

/// A named, disjoint slice of the full dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    role: PartitionRole,
    dataset: Dataset,
}

impl Partition {
    pub fn candidate(dataset: Dataset) -> Partition {
        Partition { role: PartitionRole::Candidate, dataset }
    }

    pub fn safety(dataset: Dataset) -> Partition {
        Partition { role: PartitionRole::Safety, dataset }
    }

    pub fn role(&self) -> PartitionRole {
        self.role
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}
