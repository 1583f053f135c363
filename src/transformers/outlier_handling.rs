//! ## Transformers for handling outliers
//!
//! This module provides transformers that cap (clip) one numeric column between bounds learned
//! from the fitting data:
//!
//! - **SigmaClipper:** bounds at mean ± 3 sample standard deviations.
//! - **TukeyClipper:** bounds at the inner (1.5 IQR) or outer (3 IQR) Tukey fences.
//!
//! Bounds are computed once in `fit` and reused verbatim by `transform`, whatever the
//! distribution of the data being transformed. Values outside the bounds are set to the bound;
//! no row is dropped. Missing values (nulls and NaN) stay missing.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::stats;
use crate::table;
use arrow::datatypes::DataType;
use datafusion::functions::math::expr_fn::isnan;
use datafusion::logical_expr::{cast, ident, lit, Case as DFCase, Expr};
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Builds the capping expression for one column, read as Float64:
/// `CASE WHEN isnan(col) THEN col WHEN col < lower THEN lower WHEN col > upper THEN upper ELSE col END`
///
/// NaN orders above every number in Arrow comparisons, so it is matched first and kept. Nulls
/// fail every condition and fall through to the ELSE arm unchanged.
fn cap_expr_for(col_name: &str, lower: f64, upper: f64) -> Expr {
    let base = cast(ident(col_name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![
            (Box::new(isnan(base.clone())), Box::new(base.clone())),
            (Box::new(base.clone().lt(lit(lower))), Box::new(lit(lower))),
            (Box::new(base.clone().gt(lit(upper))), Box::new(lit(upper))),
        ],
        else_expr: Some(Box::new(base)),
    })
}

/// Returns a new DataFrame where `target` is capped to `[lower, upper]` and cast to Float64.
fn clip_column(df: DataFrame, target: &str, lower: f64, upper: f64) -> PreplineResult<DataFrame> {
    if !table::has_column(&df, target) {
        return Err(PreplineError::MissingColumn(format!(
            "Column '{}' not found in DataFrame",
            target
        )));
    }
    let exprs: Vec<Expr> = df
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let name = field.name();
            if name == target {
                cap_expr_for(name, lower, upper).alias(name)
            } else {
                ident(name)
            }
        })
        .collect();
    df.select(exprs).map_err(PreplineError::from)
}

/// Reads the fitting values of a numeric column, validating presence and type.
async fn fit_values(df: &DataFrame, target: &str) -> PreplineResult<Vec<Option<f64>>> {
    table::require_numeric(df, target)?;
    let projected = df.clone().select(vec![ident(target)])?;
    let batch = table::collect_batch(&projected).await?;
    table::float_values(&batch, target)
}

/// Caps a column at mean ± 3 sample standard deviations of the fitting data.
#[derive(Debug, Clone)]
pub struct SigmaClipper {
    pub column: String,
    bounds: Option<(f64, f64)>,
}

impl SigmaClipper {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            bounds: None,
        }
    }

    /// `(low, high)` once fitted.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    pub async fn fit(&mut self, df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        let values = fit_values(df, &self.column).await?;
        let mean = stats::mean(&values)?;
        let sigma = stats::sample_std(&values)?;
        let bounds = (mean - 3.0 * sigma, mean + 3.0 * sigma);
        debug!(column = %self.column, mean, sigma, ?bounds, "SigmaClipper fitted");
        self.bounds = Some(bounds);
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let (low, high) = self.bounds.ok_or(PreplineError::FitNotCalled)?;
        clip_column(df, &self.column, low, high)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(SigmaClipper);

/// Which pair of Tukey fences a [`TukeyClipper`] clips to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fence {
    /// Q1 - 1.5 IQR, Q3 + 1.5 IQR
    Inner,
    /// Q1 - 3 IQR, Q3 + 3 IQR
    Outer,
}

impl FromStr for Fence {
    type Err = PreplineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner" => Ok(Fence::Inner),
            "outer" => Ok(Fence::Outer),
            other => Err(PreplineError::InvalidParameter(format!(
                "fence {} not in [\"inner\", \"outer\"]",
                other
            ))),
        }
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fence::Inner => write!(f, "inner"),
            Fence::Outer => write!(f, "outer"),
        }
    }
}

/// Quartiles and both fence pairs learned by a [`TukeyClipper`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TukeyFences {
    pub q1: f64,
    pub q3: f64,
    pub inner_low: f64,
    pub inner_high: f64,
    pub outer_low: f64,
    pub outer_high: f64,
}

impl TukeyFences {
    fn from_quartiles(q1: f64, q3: f64) -> Self {
        let iqr = q3 - q1;
        Self {
            q1,
            q3,
            inner_low: q1 - 1.5 * iqr,
            inner_high: q3 + 1.5 * iqr,
            outer_low: q1 - 3.0 * iqr,
            outer_high: q3 + 3.0 * iqr,
        }
    }

    /// `(low, high)` for the given fence.
    pub fn bounds(&self, fence: Fence) -> (f64, f64) {
        match fence {
            Fence::Inner => (self.inner_low, self.inner_high),
            Fence::Outer => (self.outer_low, self.outer_high),
        }
    }
}

/// Caps a column at the Tukey fences of the fitting data. Both fence pairs are learned, so
/// changing `fence` after fitting needs no refit.
#[derive(Debug, Clone)]
pub struct TukeyClipper {
    pub column: String,
    pub fence: Fence,
    fences: Option<TukeyFences>,
}

impl TukeyClipper {
    pub fn new(column: impl Into<String>, fence: Fence) -> Self {
        Self {
            column: column.into(),
            fence,
            fences: None,
        }
    }

    pub fn fences(&self) -> Option<TukeyFences> {
        self.fences
    }

    pub async fn fit(&mut self, df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        let values = fit_values(df, &self.column).await?;
        let q = stats::quantiles(&values, &[0.25, 0.75])?;
        let fences = TukeyFences::from_quartiles(q[0], q[1]);
        debug!(column = %self.column, ?fences, "TukeyClipper fitted");
        self.fences = Some(fences);
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let fences = self.fences.ok_or(PreplineError::FitNotCalled)?;
        let (low, high) = fences.bounds(self.fence);
        clip_column(df, &self.column, low, high)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(TukeyClipper);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_ordering() {
        let f = TukeyFences::from_quartiles(2.0, 6.0);
        assert!(f.outer_high >= f.inner_high);
        assert!(f.inner_high >= f.q3);
        assert!(f.q1 >= f.inner_low);
        assert!(f.inner_low >= f.outer_low);
        assert_eq!(f.bounds(Fence::Inner), (-4.0, 12.0));
        assert_eq!(f.bounds(Fence::Outer), (-10.0, 18.0));
    }

    #[test]
    fn test_fence_parsing() {
        assert_eq!("inner".parse::<Fence>().unwrap(), Fence::Inner);
        assert_eq!("outer".parse::<Fence>().unwrap(), Fence::Outer);
        assert!("middle".parse::<Fence>().is_err());
    }
}
