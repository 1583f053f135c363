//! ## Split Selection
//!
//! - [`stratified_split`]: a seeded train/test partition preserving class proportions.
//! - [`StabilitySearch`]: tries many split seeds and picks the one whose test/train F1 ratio is
//!   closest to the average ratio, so the chosen split is typical rather than the easiest one.
//! - [`dataset_setup`]: splits a labelled table, fits a transformer on the train partition and
//!   returns dense matrices ready for a classifier.
//!
//! Every seed is evaluated sequentially on the same transformer instance; each iteration refits
//! it, overwriting the previous state.

use crate::evaluation;
use crate::exceptions::{PreplineError, PreplineResult};
use crate::model::{Classifier, KNeighborsClassifier};
use crate::pipeline::Transformer;
use crate::table;
use arrow::record_batch::RecordBatch;
use datafusion::logical_expr::{ident, Expr};
use datafusion::prelude::DataFrame;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits row indices so that every class keeps (up to rounding) its share in both partitions.
///
/// Each class contributes `round(count * test_size)` rows to the test partition, clamped so
/// that both partitions receive at least one member. Classes with fewer than two members
/// cannot be stratified and are rejected. The result only depends on `labels`, `test_size`
/// and `seed`.
pub fn stratified_split(labels: &[i64], test_size: f64, seed: u64) -> PreplineResult<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PreplineError::InvalidParameter(format!(
            "test_size={} should be strictly between 0 and 1",
            test_size
        )));
    }
    let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        classes.entry(label).or_default().push(idx);
    }
    if let Some((label, members)) = classes.iter().find(|(_, members)| members.len() < 2) {
        return Err(PreplineError::InvalidData(format!(
            "The least populated class in y has only {} member ({}), which is too few. \
             The minimum number of groups for any class cannot be less than 2.",
            members.len(),
            label
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for members in classes.values_mut() {
        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64 * test_size).round() as usize).clamp(1, members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok(SplitIndices { train, test })
}

/// Train and test partitions of a table with their labels.
pub struct TableSplit {
    pub train: DataFrame,
    pub test: DataFrame,
    pub y_train: Vec<i64>,
    pub y_test: Vec<i64>,
}

fn split_batch(
    batch: &RecordBatch,
    labels: &[i64],
    test_size: f64,
    seed: u64,
) -> PreplineResult<TableSplit> {
    let indices = stratified_split(labels, test_size, seed)?;
    Ok(TableSplit {
        train: table::from_batch(table::take_rows(batch, &indices.train)?)?,
        test: table::from_batch(table::take_rows(batch, &indices.test)?)?,
        y_train: indices.train.iter().map(|&i| labels[i]).collect(),
        y_test: indices.test.iter().map(|&i| labels[i]).collect(),
    })
}

fn check_label_count(batch: &RecordBatch, labels: &[i64]) -> PreplineResult<()> {
    if batch.num_rows() != labels.len() {
        return Err(PreplineError::InvalidData(format!(
            "Found input variables with inconsistent numbers of samples: [{}, {}]",
            batch.num_rows(),
            labels.len()
        )));
    }
    Ok(())
}

/// Stratified split of a table (see [`stratified_split`]).
pub async fn split_table(
    df: &DataFrame,
    labels: &[i64],
    test_size: f64,
    seed: u64,
) -> PreplineResult<TableSplit> {
    let batch = table::collect_batch(df).await?;
    check_label_count(&batch, labels)?;
    split_batch(&batch, labels, test_size, seed)
}

fn as_targets(labels: &[i64]) -> Vec<f64> {
    labels.iter().map(|&l| l as f64).collect()
}

/// Result of a [`StabilitySearch`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSelection {
    /// The chosen split seed.
    pub seed: u64,
    /// Mean of all recorded ratios.
    pub mean_ratio: f64,
    /// test F1 / train F1 for every seed that was not discarded, in seed order.
    pub ratios: Vec<f64>,
    /// The seed that produced each entry of `ratios`.
    pub seeds: Vec<u64>,
}

/// Parameters of the split-seed stability search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilitySearch {
    /// Seeds `0..iterations` are tried.
    pub iterations: usize,
    pub test_size: f64,
    /// Neighbor count of the scoring classifier.
    pub n_neighbors: usize,
    /// Seeds whose train F1 falls below this are discarded.
    pub min_train_f1: f64,
}

impl Default for StabilitySearch {
    fn default() -> Self {
        Self {
            iterations: 200,
            test_size: 0.2,
            n_neighbors: 5,
            min_train_f1: 0.1,
        }
    }
}

impl StabilitySearch {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Scores one seed; `None` when its train F1 is below `min_train_f1`.
    async fn score_seed<T: Transformer + ?Sized>(
        &self,
        batch: &RecordBatch,
        labels: &[i64],
        transformer: &mut T,
        seed: u64,
    ) -> PreplineResult<Option<f64>> {
        let split = split_batch(batch, labels, self.test_size, seed)?;
        let targets = as_targets(&split.y_train);
        transformer.fit(&split.train, Some(targets.as_slice())).await?;
        let (train_t, test_t) = futures::try_join!(
            transformer.transform(split.train),
            transformer.transform(split.test)
        )?;
        let (x_train, x_test) =
            futures::try_join!(table::to_matrix(&train_t), table::to_matrix(&test_t))?;

        let mut model = KNeighborsClassifier::new(self.n_neighbors)?;
        model.fit(&x_train, &split.y_train)?;
        let train_f1 = evaluation::f1(&split.y_train, &model.predict(&x_train)?)?;
        if train_f1 < self.min_train_f1 {
            debug!(seed, train_f1, "discarding split seed");
            return Ok(None);
        }
        let test_f1 = evaluation::f1(&split.y_test, &model.predict(&x_test)?)?;
        debug!(seed, train_f1, test_f1, "scored split seed");
        Ok(Some(test_f1 / train_f1))
    }

    /// Runs the search over seeds `0..iterations`.
    ///
    /// Returns [`PreplineError::NoUsableSeeds`] when every seed was discarded. Among seeds
    /// equally close to the mean ratio the lowest one is chosen.
    pub async fn run<T: Transformer + ?Sized>(
        &self,
        features: &DataFrame,
        labels: &[i64],
        transformer: &mut T,
    ) -> PreplineResult<SeedSelection> {
        let batch = table::collect_batch(features).await?;
        check_label_count(&batch, labels)?;

        let mut ratios = Vec::new();
        let mut seeds = Vec::new();
        for seed in 0..self.iterations as u64 {
            if let Some(ratio) = self.score_seed(&batch, labels, transformer, seed).await? {
                ratios.push(ratio);
                seeds.push(seed);
            }
        }
        if ratios.is_empty() {
            return Err(PreplineError::NoUsableSeeds {
                iterations: self.iterations,
                min_train_f1: self.min_train_f1,
            });
        }

        let mean_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;
        let mut best = 0;
        for (i, ratio) in ratios.iter().enumerate() {
            if (ratio - mean_ratio).abs() < (ratios[best] - mean_ratio).abs() {
                best = i;
            }
        }
        info!(
            seed = seeds[best],
            mean_ratio,
            kept = ratios.len(),
            iterations = self.iterations,
            "stability search finished"
        );
        Ok(SeedSelection {
            seed: seeds[best],
            mean_ratio,
            ratios,
            seeds,
        })
    }
}

/// Runs a [`StabilitySearch`] with default parameters and `n` iterations.
pub async fn find_random_state<T: Transformer + ?Sized>(
    features: &DataFrame,
    labels: &[i64],
    transformer: &mut T,
    n: usize,
) -> PreplineResult<SeedSelection> {
    StabilitySearch::new(n)
        .run(features, labels, transformer)
        .await
}

/// Dense train/test matrices and labels produced by [`dataset_setup`].
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Vec<i64>,
    pub y_test: Vec<i64>,
    /// Column names of the transformed matrices.
    pub feature_names: Vec<String>,
}

/// Reads an integer label column; missing or fractional labels are rejected.
pub fn labels_from_batch(batch: &RecordBatch, column: &str) -> PreplineResult<Vec<i64>> {
    table::float_values(batch, column)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v.fract() == 0.0 => Ok(v as i64),
            Some(v) => Err(PreplineError::InvalidData(format!(
                "label column '{}' holds non-integer value {} at row {}",
                column, v, row
            ))),
            None => Err(PreplineError::InvalidData(format!(
                "label column '{}' is missing a value at row {}",
                column, row
            ))),
        })
        .collect()
}

/// Separates `label_column` from `df`, splits with `seed`, fits `transformer` on the train
/// partition and transforms both partitions.
pub async fn dataset_setup<T: Transformer + ?Sized>(
    df: &DataFrame,
    label_column: &str,
    transformer: &mut T,
    seed: u64,
    test_size: f64,
) -> PreplineResult<PreparedDataset> {
    if !table::has_column(df, label_column) {
        return Err(PreplineError::MissingColumn(format!(
            "label column '{}' not found in DataFrame",
            label_column
        )));
    }
    let batch = table::collect_batch(df).await?;
    let labels = labels_from_batch(&batch, label_column)?;
    let feature_exprs: Vec<Expr> = table::column_names(df)
        .into_iter()
        .filter(|name| name != label_column)
        .map(ident)
        .collect();
    let features = table::from_batch(batch)?.select(feature_exprs)?;

    let split = split_table(&features, &labels, test_size, seed).await?;
    let targets = as_targets(&split.y_train);
    let train_t = transformer
        .fit_transform(split.train, Some(targets.as_slice()))
        .await?;
    let test_t = transformer.transform(split.test).await?;
    let feature_names = table::column_names(&train_t);
    let (x_train, x_test) =
        futures::try_join!(table::to_matrix(&train_t), table::to_matrix(&test_t))?;
    Ok(PreparedDataset {
        x_train,
        x_test,
        y_train: split.y_train,
        y_test: split.y_test,
        feature_names,
    })
}
