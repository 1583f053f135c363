//! ## Feature Selection Transformers
//!
//! This module provides transformers that decide which columns survive.
//!
//! ### Available Transformers
//!
//! - [`ColumnSelector`]: Drops or keeps a list of named columns.
//! - [`CorrelationPruner`]: Drops the later member of every highly correlated pair of numeric columns.
//!
//! ### Notes
//!
//! - Drop mode is lenient (unknown names are reported and ignored) while keep mode is strict
//!   (an unknown name is an error).
//! - The correlation pruner decides everything from one correlation matrix computed at fit
//!   time. It does not recompute correlations after removing a column, so a chain A~B, B~C
//!   with A and C uncorrelated drops both B and C.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::stats;
use crate::table;
use datafusion::dataframe::DataFrame;
use datafusion::logical_expr::{ident, Expr};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Whether a [`ColumnSelector`] removes or retains the listed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionAction {
    Drop,
    Keep,
}

impl FromStr for SelectionAction {
    type Err = PreplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(SelectionAction::Drop),
            "keep" => Ok(SelectionAction::Keep),
            other => Err(PreplineError::InvalidParameter(format!(
                "ColumnSelector action {} not in [\"keep\", \"drop\"]",
                other
            ))),
        }
    }
}

impl fmt::Display for SelectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionAction::Drop => write!(f, "drop"),
            SelectionAction::Keep => write!(f, "keep"),
        }
    }
}

/// Removes (drop mode) or retains (keep mode) the specified columns.
#[derive(Debug, Clone)]
pub struct ColumnSelector {
    pub columns: Vec<String>,
    pub action: SelectionAction,
}

impl ColumnSelector {
    pub fn new(columns: Vec<String>, action: SelectionAction) -> Self {
        Self { columns, action }
    }

    pub fn drop(columns: Vec<String>) -> Self {
        Self::new(columns, SelectionAction::Drop)
    }

    pub fn keep(columns: Vec<String>) -> Self {
        Self::new(columns, SelectionAction::Keep)
    }

    pub async fn fit(&mut self, _df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        match self.action {
            SelectionAction::Drop => {
                let unknown: Vec<&String> = self
                    .columns
                    .iter()
                    .filter(|c| !table::has_column(&df, c))
                    .collect();
                if !unknown.is_empty() {
                    warn!(
                        columns = ?unknown,
                        "ColumnSelector: columns not found in DataFrame and will be ignored"
                    );
                }
                let available_exprs: Vec<Expr> = df
                    .schema()
                    .fields()
                    .iter()
                    .filter(|field| !self.columns.contains(field.name()))
                    .map(|field| ident(field.name()))
                    .collect();
                if available_exprs.is_empty() {
                    return Err(PreplineError::InvalidParameter(
                        "Dropping these columns would result in an empty DataFrame.".to_string(),
                    ));
                }
                df.select(available_exprs).map_err(PreplineError::from)
            }
            SelectionAction::Keep => {
                let missing: Vec<&String> = self
                    .columns
                    .iter()
                    .filter(|c| !table::has_column(&df, c))
                    .collect();
                if !missing.is_empty() {
                    return Err(PreplineError::MissingColumn(format!(
                        "Columns {:?} not found in the DataFrame",
                        missing
                    )));
                }
                let exprs: Vec<Expr> = self.columns.iter().map(ident).collect();
                df.select(exprs).map_err(PreplineError::from)
            }
        }
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(ColumnSelector);

/// Marks a numeric column for removal when its absolute Pearson correlation with any earlier
/// numeric column exceeds the threshold. The first column of a correlated group always survives.
#[derive(Debug, Clone)]
pub struct CorrelationPruner {
    pub threshold: f64,
    correlated_columns: Option<Vec<String>>,
}

impl CorrelationPruner {
    /// Create a new CorrelationPruner; `threshold` must lie in [0, 1].
    pub fn new(threshold: f64) -> PreplineResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PreplineError::InvalidParameter(format!(
                "correlation threshold {} must be between 0 and 1",
                threshold
            )));
        }
        Ok(Self {
            threshold,
            correlated_columns: None,
        })
    }

    /// Columns marked for removal by the last fit, in column order.
    pub fn correlated_columns(&self) -> Option<&[String]> {
        self.correlated_columns.as_deref()
    }

    pub async fn fit(&mut self, df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        let batch = table::collect_batch(df).await?;
        let numeric: Vec<(String, Vec<Option<f64>>)> = batch
            .schema()
            .fields()
            .iter()
            .filter(|f| f.data_type().is_numeric())
            .map(|f| Ok((f.name().clone(), table::float_values(&batch, f.name())?)))
            .collect::<PreplineResult<_>>()?;

        // Column j is marked if |r(i, j)| > threshold for some i < j (strict upper triangle).
        let threshold = self.threshold;
        let marked: HashSet<usize> = (1..numeric.len())
            .into_par_iter()
            .filter(|&j| {
                (0..j).any(|i| stats::pearson(&numeric[i].1, &numeric[j].1).abs() > threshold)
            })
            .collect();

        let correlated: Vec<String> = numeric
            .iter()
            .enumerate()
            .filter(|(j, _)| marked.contains(j))
            .map(|(_, (name, _))| name.clone())
            .collect();
        debug!(threshold, columns = ?correlated, "CorrelationPruner fitted");
        self.correlated_columns = Some(correlated);
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let correlated = self
            .correlated_columns
            .as_ref()
            .ok_or(PreplineError::FitNotCalled)?;
        if let Some(missing) = correlated.iter().find(|c| !table::has_column(&df, c)) {
            return Err(PreplineError::MissingColumn(format!(
                "Column '{}' marked as correlated is not in the DataFrame",
                missing
            )));
        }
        let keep_exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .filter(|f| !correlated.contains(f.name()))
            .map(|f| ident(f.name()))
            .collect();
        df.select(keep_exprs).map_err(PreplineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(CorrelationPruner);
