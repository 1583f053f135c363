//! ## Scaling Transformers
//!
//! - **RobustScaler:** centers one numeric column on its median and divides by its
//!   interquartile range, both learned from the fitting data. A zero IQR is replaced by 1, so
//!   a constant column is only shifted.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::stats;
use crate::table;
use arrow::datatypes::DataType;
use datafusion::logical_expr::{cast, ident, lit, Expr};
use datafusion::prelude::*;
use tracing::debug;

/// Scales a column to `(x - median) / IQR`.
#[derive(Debug, Clone)]
pub struct RobustScaler {
    pub column: String,
    median: Option<f64>,
    iqr: Option<f64>,
}

impl RobustScaler {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            median: None,
            iqr: None,
        }
    }

    /// The fitted median.
    pub fn median(&self) -> Option<f64> {
        self.median
    }

    /// The fitted IQR as used for division (1.0 when the raw IQR was 0).
    pub fn iqr(&self) -> Option<f64> {
        self.iqr
    }

    pub async fn fit(&mut self, df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        table::require_numeric(df, &self.column)?;
        let projected = df.clone().select(vec![ident(&self.column)])?;
        let batch = table::collect_batch(&projected).await?;
        let values = table::float_values(&batch, &self.column)?;
        let q = stats::quantiles(&values, &[0.25, 0.5, 0.75])?;
        let raw_iqr = q[2] - q[0];
        let iqr = if raw_iqr == 0.0 { 1.0 } else { raw_iqr };
        debug!(column = %self.column, median = q[1], iqr, "RobustScaler fitted");
        self.median = Some(q[1]);
        self.iqr = Some(iqr);
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let (median, iqr) = match (self.median, self.iqr) {
            (Some(m), Some(i)) => (m, i),
            _ => return Err(PreplineError::FitNotCalled),
        };
        if !table::has_column(&df, &self.column) {
            return Err(PreplineError::MissingColumn(format!(
                "Unrecognized column: {}",
                self.column
            )));
        }
        let exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = field.name();
                if name == &self.column {
                    ((cast(ident(name), DataType::Float64) - lit(median)) / lit(iqr)).alias(name)
                } else {
                    ident(name)
                }
            })
            .collect();
        df.select(exprs).map_err(PreplineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(RobustScaler);
