//! ## Evaluation
//!
//! Binary classification metrics (positive label `1`) and the threshold sweep.
//!
//! Precision, recall and F1 treat a zero denominator as a score of 0 rather than an error, so a
//! classifier that never predicts the positive class scores 0 instead of failing. ROC AUC is
//! computed from the rank statistic of the scores with ties sharing their average rank.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::table;
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::DataFrame;
use std::sync::Arc;

const POSITIVE: i64 = 1;

fn check_lengths(y_true: usize, y_pred: usize) -> PreplineResult<()> {
    if y_true != y_pred {
        return Err(PreplineError::InvalidData(format!(
            "Found input variables with inconsistent numbers of samples: [{}, {}]",
            y_true, y_pred
        )));
    }
    if y_true == 0 {
        return Err(PreplineError::InvalidData(
            "metrics require at least one sample".to_string(),
        ));
    }
    Ok(())
}

/// `(true positives, false positives, false negatives, correct)` counts.
fn confusion(y_true: &[i64], y_pred: &[i64]) -> (usize, usize, usize, usize) {
    y_true
        .iter()
        .zip(y_pred)
        .fold((0, 0, 0, 0), |(tp, fp, fn_, correct), (&t, &p)| {
            (
                tp + usize::from(t == POSITIVE && p == POSITIVE),
                fp + usize::from(t != POSITIVE && p == POSITIVE),
                fn_ + usize::from(t == POSITIVE && p != POSITIVE),
                correct + usize::from(t == p),
            )
        })
}

fn ratio_or_zero(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn accuracy(y_true: &[i64], y_pred: &[i64]) -> PreplineResult<f64> {
    check_lengths(y_true.len(), y_pred.len())?;
    let (_, _, _, correct) = confusion(y_true, y_pred);
    Ok(correct as f64 / y_true.len() as f64)
}

pub fn precision(y_true: &[i64], y_pred: &[i64]) -> PreplineResult<f64> {
    check_lengths(y_true.len(), y_pred.len())?;
    let (tp, fp, _, _) = confusion(y_true, y_pred);
    Ok(ratio_or_zero(tp, tp + fp))
}

pub fn recall(y_true: &[i64], y_pred: &[i64]) -> PreplineResult<f64> {
    check_lengths(y_true.len(), y_pred.len())?;
    let (tp, _, fn_, _) = confusion(y_true, y_pred);
    Ok(ratio_or_zero(tp, tp + fn_))
}

/// F1 of the positive class, `2 TP / (2 TP + FP + FN)`; 0 when there is nothing to score.
pub fn f1(y_true: &[i64], y_pred: &[i64]) -> PreplineResult<f64> {
    check_lengths(y_true.len(), y_pred.len())?;
    let (tp, fp, fn_, _) = confusion(y_true, y_pred);
    Ok(ratio_or_zero(2 * tp, 2 * tp + fp + fn_))
}

/// 1-based ranks of `scores`, tied values sharing the mean of their ranks.
fn average_ranks(scores: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Area under the ROC curve of `scores` against binary labels.
pub fn roc_auc(y_true: &[i64], scores: &[f64]) -> PreplineResult<f64> {
    check_lengths(y_true.len(), scores.len())?;
    if scores.iter().any(|s| s.is_nan()) {
        return Err(PreplineError::InvalidData(
            "roc_auc scores contain NaN".to_string(),
        ));
    }
    let n_pos = y_true.iter().filter(|&&t| t == POSITIVE).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(PreplineError::InvalidParameter(
            "Only one class present in y_true. ROC AUC score is not defined in that case."
                .to_string(),
        ));
    }
    let ranks = average_ranks(scores);
    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|&(&t, _)| t == POSITIVE)
        .map(|(_, &r)| r)
        .sum();
    let u = positive_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Ok(u / (n_pos as f64 * n_neg as f64))
}

/// Metrics for one decision threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRow {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc: f64,
    pub accuracy: f64,
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

impl ThresholdRow {
    fn rounded(&self, decimals: u32) -> Self {
        Self {
            threshold: round_to(self.threshold, decimals),
            precision: round_to(self.precision, decimals),
            recall: round_to(self.recall, decimals),
            f1: round_to(self.f1, decimals),
            auc: round_to(self.auc, decimals),
            accuracy: round_to(self.accuracy, decimals),
        }
    }
}

/// One row per threshold, in the order the thresholds were given.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThresholdTable {
    pub rows: Vec<ThresholdRow>,
}

impl ThresholdTable {
    pub const COLUMNS: [&'static str; 6] =
        ["threshold", "precision", "recall", "f1", "auc", "accuracy"];

    /// A copy with every value rounded to `decimals` places (2 for presentation).
    pub fn rounded(&self, decimals: u32) -> Self {
        Self {
            rows: self.rows.iter().map(|r| r.rounded(decimals)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for an exact threshold value, if present.
    pub fn row(&self, threshold: f64) -> Option<&ThresholdRow> {
        self.rows.iter().find(|r| r.threshold == threshold)
    }

    /// Converts the table into a DataFrame with `Float64` columns named by [`Self::COLUMNS`].
    pub fn to_dataframe(&self) -> PreplineResult<DataFrame> {
        let extract = |f: fn(&ThresholdRow) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from(
                self.rows.iter().map(f).collect::<Vec<f64>>(),
            ))
        };
        let columns = vec![
            extract(|r| r.threshold),
            extract(|r| r.precision),
            extract(|r| r.recall),
            extract(|r| r.f1),
            extract(|r| r.auc),
            extract(|r| r.accuracy),
        ];
        let fields: Vec<Field> = Self::COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false))
            .collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        table::from_batch(batch)
    }
}

/// Sweeps `thresholds` over `scores`: a row is predicted positive when its score is `>= t`.
/// AUC does not depend on the threshold and is repeated on every row.
pub fn threshold_results(
    thresholds: &[f64],
    y_true: &[i64],
    scores: &[f64],
) -> PreplineResult<ThresholdTable> {
    let auc = roc_auc(y_true, scores)?;
    let rows = thresholds
        .iter()
        .map(|&t| {
            let y_hat: Vec<i64> = scores.iter().map(|&s| i64::from(s >= t)).collect();
            Ok(ThresholdRow {
                threshold: t,
                precision: precision(y_true, &y_hat)?,
                recall: recall(y_true, &y_hat)?,
                f1: f1(y_true, &y_hat)?,
                auc,
                accuracy: accuracy(y_true, &y_hat)?,
            })
        })
        .collect::<PreplineResult<Vec<_>>>()?;
    Ok(ThresholdTable { rows })
}
