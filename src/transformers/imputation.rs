//! ## Transformers for imputing missing values
//!
//! - **KnnImputer**: fills every missing entry with the (optionally distance-weighted) mean of
//!   that feature over the `k` nearest fitting rows.
//!
//! Distances are "NaN-Euclidean" and computed over all columns jointly: only coordinates
//! present in both rows contribute, and the sum is scaled up by `n_columns / n_present`.
//! A fitting row can donate a value for feature `j` only if it has that feature.
//! When no donor is available the fitting mean of the feature is used.
//!
//! The output has the same shape and column order as the input, with every column as
//! `Float64` and no missing entries left. Every column must be numeric, so categorical
//! columns have to be encoded first (a [`super::categorical_encoding::TargetEncoder`] in
//! front of the imputer leaves nulls for unseen categories that this step then fills).

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::table;
use datafusion::prelude::*;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// How the values of the neighbors are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnnWeights {
    /// All neighbors count the same.
    #[default]
    Uniform,
    /// Neighbors are weighted by inverse distance; exact matches take precedence.
    Distance,
}

impl FromStr for KnnWeights {
    type Err = PreplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(KnnWeights::Uniform),
            "distance" => Ok(KnnWeights::Distance),
            other => Err(PreplineError::InvalidParameter(format!(
                "weights {} not in [\"uniform\", \"distance\"]",
                other
            ))),
        }
    }
}

impl fmt::Display for KnnWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnnWeights::Uniform => write!(f, "uniform"),
            KnnWeights::Distance => write!(f, "distance"),
        }
    }
}

/// NaN-Euclidean distance between two rows; `NaN` when they share no present coordinate.
pub fn nan_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let mut present = 0usize;
    let mut accum = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        if x.is_nan() || y.is_nan() {
            continue;
        }
        present += 1;
        accum += (x - y) * (x - y);
    }
    if present == 0 {
        return f64::NAN;
    }
    (a.len() as f64 / present as f64 * accum).sqrt()
}

/// The fitting rows and per-column means kept by a fitted [`KnnImputer`].
#[derive(Debug, Clone)]
struct Donors {
    columns: Vec<String>,
    data: Array2<f64>,
    means: Vec<f64>,
}

impl Donors {
    fn impute_value(&self, neighbors: &[(usize, f64)], feature: usize, weights: KnnWeights) -> f64 {
        if neighbors.is_empty() {
            return self.means[feature];
        }
        match weights {
            KnnWeights::Uniform => {
                neighbors
                    .iter()
                    .map(|&(idx, _)| self.data[[idx, feature]])
                    .sum::<f64>()
                    / neighbors.len() as f64
            }
            KnnWeights::Distance => {
                let exact: Vec<f64> = neighbors
                    .iter()
                    .filter(|&&(_, d)| d == 0.0)
                    .map(|&(idx, _)| self.data[[idx, feature]])
                    .collect();
                if !exact.is_empty() {
                    return exact.iter().sum::<f64>() / exact.len() as f64;
                }
                let (weighted_sum, weight_sum) = neighbors.iter().fold(
                    (0.0, 0.0),
                    |(ws, w), &(idx, d)| (ws + self.data[[idx, feature]] / d, w + 1.0 / d),
                );
                weighted_sum / weight_sum
            }
        }
    }

    fn impute_row(&self, row: ArrayView1<f64>, k: usize, weights: KnnWeights) -> Vec<f64> {
        let mut out = row.to_vec();
        if !out.iter().any(|v| v.is_nan()) {
            return out;
        }
        let distances: Vec<f64> = self
            .data
            .rows()
            .into_iter()
            .map(|donor| nan_euclidean(row, donor))
            .collect();
        for (feature, value) in out.iter_mut().enumerate() {
            if !value.is_nan() {
                continue;
            }
            let mut candidates: Vec<(usize, f64)> = distances
                .iter()
                .enumerate()
                .filter(|&(idx, d)| d.is_finite() && !self.data[[idx, feature]].is_nan())
                .map(|(idx, &d)| (idx, d))
                .collect();
            candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            candidates.truncate(k);
            *value = self.impute_value(&candidates, feature, weights);
        }
        out
    }
}

/// Imputes missing values from the nearest fitting rows.
#[derive(Debug, Clone)]
pub struct KnnImputer {
    pub n_neighbors: usize,
    pub weights: KnnWeights,
    donors: Option<Donors>,
}

impl KnnImputer {
    /// Create a new KnnImputer; `n_neighbors` must be positive.
    pub fn new(n_neighbors: usize, weights: KnnWeights) -> PreplineResult<Self> {
        if n_neighbors == 0 {
            return Err(PreplineError::InvalidParameter(
                "n_neighbors must be a positive integer.".to_string(),
            ));
        }
        Ok(Self {
            n_neighbors,
            weights,
            donors: None,
        })
    }

    /// Learn the donor rows and column means.
    pub async fn fit(&mut self, df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        let batch = table::collect_batch(df).await?;
        let data = table::batch_to_matrix(&batch)?;
        let n_rows = data.nrows();
        if n_rows == 0 {
            return Err(PreplineError::InvalidData(
                "KnnImputer.fit requires at least one row".to_string(),
            ));
        }
        if self.n_neighbors > n_rows {
            warn!(
                n_neighbors = self.n_neighbors,
                n_samples = n_rows,
                "n_neighbors is greater than the number of samples; using {} neighbors instead",
                n_rows
            );
        }
        let columns = table::column_names(df);
        let means = data
            .columns()
            .into_iter()
            .zip(columns.iter())
            .map(|(column, name)| {
                let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                if present.is_empty() {
                    return Err(PreplineError::InvalidData(format!(
                        "KnnImputer cannot impute column '{}' without any observed value",
                        name
                    )));
                }
                Ok(present.iter().sum::<f64>() / present.len() as f64)
            })
            .collect::<PreplineResult<Vec<f64>>>()?;
        debug!(rows = n_rows, columns = columns.len(), "KnnImputer fitted");
        self.donors = Some(Donors {
            columns,
            data,
            means,
        });
        Ok(())
    }

    /// Fill every missing entry; rows are processed in parallel.
    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let donors = self.donors.as_ref().ok_or(PreplineError::FitNotCalled)?;
        let columns = table::column_names(&df);
        if columns != donors.columns {
            return Err(PreplineError::InvalidData(format!(
                "KnnImputer was fitted on columns {:?} but got {:?}",
                donors.columns, columns
            )));
        }
        let batch = table::collect_batch(&df).await?;
        let x = table::batch_to_matrix(&batch)?;
        let (k, weights) = (self.n_neighbors, self.weights);
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|r| donors.impute_row(x.row(r), k, weights))
            .collect();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let imputed = Array2::from_shape_vec((x.nrows(), x.ncols()), flat)?;
        table::from_batch(table::matrix_to_batch(&imputed, &columns)?)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(KnnImputer);
