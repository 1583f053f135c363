//! ## Classifier
//!
//! A small k-nearest-neighbor classifier over dense `ndarray` matrices. The stability search
//! only needs `fit(X, y)` and `predict(X)`; `predict_proba` feeds the threshold sweep.
//!
//! - Distances are Euclidean. Among equidistant training rows the earlier one wins.
//! - The majority vote is unweighted; a tie between labels goes to the smaller label.
//! - Rows are predicted in parallel with `rayon`.

use crate::exceptions::{PreplineError, PreplineResult};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Label-predicting model consumed by the stability search.
pub trait Classifier: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &[i64]) -> PreplineResult<()>;

    fn predict(&self, x: &Array2<f64>) -> PreplineResult<Vec<i64>>;
}

#[derive(Debug, Clone)]
struct TrainingSet {
    x: Array2<f64>,
    y: Vec<i64>,
}

/// k-nearest-neighbor majority vote classifier.
#[derive(Debug, Clone)]
pub struct KNeighborsClassifier {
    pub n_neighbors: usize,
    training: Option<TrainingSet>,
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

impl KNeighborsClassifier {
    pub fn new(n_neighbors: usize) -> PreplineResult<Self> {
        if n_neighbors == 0 {
            return Err(PreplineError::InvalidParameter(
                "n_neighbors must be a positive integer.".to_string(),
            ));
        }
        Ok(Self {
            n_neighbors,
            training: None,
        })
    }

    fn training(&self, x: &Array2<f64>) -> PreplineResult<&TrainingSet> {
        let training = self.training.as_ref().ok_or(PreplineError::FitNotCalled)?;
        if x.ncols() != training.x.ncols() {
            return Err(PreplineError::InvalidData(format!(
                "X has {} features, but KNeighborsClassifier was fitted with {} features",
                x.ncols(),
                training.x.ncols()
            )));
        }
        Ok(training)
    }

    /// Labels of the `k` nearest training rows of `row`.
    fn neighbor_labels(&self, training: &TrainingSet, row: ArrayView1<f64>) -> Vec<i64> {
        let mut distances: Vec<(f64, usize)> = training
            .x
            .rows()
            .into_iter()
            .enumerate()
            .map(|(idx, train_row)| (euclidean(row, train_row), idx))
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances
            .iter()
            .take(self.n_neighbors)
            .map(|&(_, idx)| training.y[idx])
            .collect()
    }

    /// Fraction of the `k` nearest neighbors whose label is 1, for every row of `x`.
    pub fn predict_proba(&self, x: &Array2<f64>) -> PreplineResult<Vec<f64>> {
        let training = self.training(x)?;
        let k = self.n_neighbors as f64;
        Ok((0..x.nrows())
            .into_par_iter()
            .map(|r| {
                let labels = self.neighbor_labels(training, x.row(r));
                labels.iter().filter(|&&label| label == 1).count() as f64 / k
            })
            .collect())
    }
}

impl Classifier for KNeighborsClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[i64]) -> PreplineResult<()> {
        if x.nrows() != y.len() {
            return Err(PreplineError::InvalidData(format!(
                "Found input variables with inconsistent numbers of samples: [{}, {}]",
                x.nrows(),
                y.len()
            )));
        }
        if self.n_neighbors > x.nrows() {
            return Err(PreplineError::InvalidParameter(format!(
                "Expected n_neighbors <= n_samples, but n_samples = {}, n_neighbors = {}",
                x.nrows(),
                self.n_neighbors
            )));
        }
        self.training = Some(TrainingSet {
            x: x.clone(),
            y: y.to_vec(),
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> PreplineResult<Vec<i64>> {
        let training = self.training(x)?;
        Ok((0..x.nrows())
            .into_par_iter()
            .map(|r| {
                let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
                for label in self.neighbor_labels(training, x.row(r)) {
                    *votes.entry(label).or_insert(0) += 1;
                }
                // BTreeMap iterates labels in ascending order, so `>` keeps the smaller one on ties.
                let mut best = (0i64, 0usize);
                for (&label, &count) in &votes {
                    if count > best.1 {
                        best = (label, count);
                    }
                }
                best.0
            })
            .collect())
    }
}
