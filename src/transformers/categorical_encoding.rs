//! # Categorical Encoding Transformers
//!
//! This module provides the transformers that turn categorical columns into numeric ones.
//!
//! The encoders include:
//! - **ValueMapper:** Substitutes values of one column according to a user-supplied dictionary.
//! - **OneHotRecoder:** Expands one categorical column into a 0/1 indicator column per observed value.
//! - **TargetEncoder:** Replaces each category with the label mean of that category, shrunk
//!   toward the global label mean in proportion to how rarely the category occurs.
//!
//! `ValueMapper` and `OneHotRecoder` are stateless: their `fit` does nothing and they look at the
//! table being transformed. `TargetEncoder` learns its dictionary in `fit` and must be fitted
//! before it can transform.
//!
//! Categories the encoder has never seen map to null. Downstream imputation is expected to
//! fill them, so a `TargetEncoder` must come before the imputer in a pipeline.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::table::{self, ColumnRef};
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{ident, lit, Case as DFCase, Expr};
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default smoothing constant of the [`TargetEncoder`].
pub const DEFAULT_SMOOTHING: f64 = 10.0;

/// Helper to build a CASE WHEN expression given a mapping from category values to encoded values.
/// For each pair, the expression generated is:
/// `WHEN <col> = lit(<category>) THEN lit(<encoded_value>)`
/// If provided, `default` is used as the ELSE branch; otherwise unmatched rows become null.
fn build_case_expr(col_name: &str, mapping: &[(ScalarValue, ScalarValue)], default: Option<Expr>) -> Expr {
    let when_then_expr = mapping
        .iter()
        .map(|(cat, val)| {
            (
                Box::new(ident(col_name).eq(lit(cat.clone()))),
                Box::new(lit(val.clone())),
            )
        })
        .collect();
    Expr::Case(DFCase {
        expr: None,
        when_then_expr,
        else_expr: default.map(Box::new),
    })
}

/// Rebuilds the projection with `target` replaced by `expr`; column order is preserved.
fn replace_column(df: DataFrame, target: &str, expr: Expr) -> PreplineResult<DataFrame> {
    let exprs: Vec<Expr> = df
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let name = field.name();
            if name == target {
                expr.clone().alias(name)
            } else {
                ident(name)
            }
        })
        .collect();
    df.select(exprs).map_err(PreplineError::from)
}

/// Materializes a single column and returns its values together with its Arrow type.
async fn column_values(df: &DataFrame, name: &str) -> PreplineResult<(Vec<ScalarValue>, DataType)> {
    let projected = df.clone().select(vec![ident(name)])?;
    let batch = table::collect_batch(&projected).await?;
    let data_type = batch.schema().field(0).data_type().clone();
    Ok((table::scalar_values(&batch, name)?, data_type))
}

fn render(values: &[ScalarValue]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Numeric types form one family; every other type is its own family.
fn type_family(dt: &DataType) -> DataType {
    if dt.is_numeric() {
        DataType::Float64
    } else {
        dt.clone()
    }
}

/// Checks that the non-null scalars share one type family and widens mixed numeric types
/// to Float64.
fn unify_types(
    column: &ColumnRef,
    what: &str,
    scalars: Vec<ScalarValue>,
) -> PreplineResult<Vec<ScalarValue>> {
    let types: Vec<DataType> = scalars
        .iter()
        .filter(|s| !s.is_null())
        .map(|s| s.data_type())
        .collect();
    if types
        .windows(2)
        .any(|w| type_family(&w[0]) != type_family(&w[1]))
    {
        return Err(PreplineError::InvalidParameter(format!(
            "ValueMapper[{}] expected {} of a single type but got {:?}",
            column, what, types
        )));
    }
    if types.windows(2).all(|w| w[0] == w[1]) {
        return Ok(scalars);
    }
    scalars
        .into_iter()
        .map(|s| {
            if s.is_null() {
                Ok(ScalarValue::Float64(None))
            } else {
                s.cast_to(&DataType::Float64).map_err(PreplineError::from)
            }
        })
        .collect()
}

/// ------------------------- ValueMapper -------------------------
///
/// ValueMapper substitutes the values of one column using a key -> value dictionary.
/// Values that are not keys pass through unchanged. Before substituting, it reports (without
/// failing) the keys that do not occur in the column and the column values that have no key.
///
/// Applying the mapper twice is only idempotent when no mapped value is itself a key.
#[derive(Debug, Clone)]
pub struct ValueMapper {
    pub column: ColumnRef,
    pub mapping: Vec<(ScalarValue, ScalarValue)>,
}

impl ValueMapper {
    /// Create a new ValueMapper. Keys must be non-null and unique. All keys (and all values)
    /// must share one type family; integers mixed with floats are widened to Float64.
    pub fn new(
        column: impl Into<ColumnRef>,
        mapping: Vec<(ScalarValue, ScalarValue)>,
    ) -> PreplineResult<Self> {
        let column = column.into();
        if let Some((key, _)) = mapping.iter().find(|(k, _)| k.is_null()) {
            return Err(PreplineError::InvalidParameter(format!(
                "ValueMapper[{}] mapping keys must not be null (got {:?})",
                column, key
            )));
        }
        let (keys, values): (Vec<ScalarValue>, Vec<ScalarValue>) = mapping.into_iter().unzip();
        let keys = unify_types(&column, "keys", keys)?;
        let values = unify_types(&column, "values", values)?;
        let mapping: Vec<(ScalarValue, ScalarValue)> = keys.into_iter().zip(values).collect();
        for (i, (key, _)) in mapping.iter().enumerate() {
            if mapping[..i].iter().any(|(k, _)| k == key) {
                return Err(PreplineError::InvalidParameter(format!(
                    "ValueMapper[{}] has duplicate key {}",
                    column, key
                )));
            }
        }
        Ok(Self { column, mapping })
    }

    /// Convenience constructor from anything convertible into scalar values.
    ///
    /// ```rust
    /// use prepline::transformers::categorical_encoding::ValueMapper;
    ///
    /// let mapper = ValueMapper::from_pairs("Gender", [("Male", 0i64), ("Female", 1i64)]).unwrap();
    /// assert_eq!(mapper.mapping.len(), 2);
    /// ```
    pub fn from_pairs<K, V>(
        column: impl Into<ColumnRef>,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> PreplineResult<Self>
    where
        K: Into<ScalarValue>,
        V: Into<ScalarValue>,
    {
        let mapping = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(column, mapping)
    }

    /// This transformer is stateless, so fit does nothing.
    pub async fn fit(&mut self, _df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        Ok(())
    }

    /// Substitute mapped values, reporting key/value mismatches along the way.
    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let name = self.column.resolve(&df)?;
        let (values, data_type) = column_values(&df, &name).await?;
        let observed = table::distinct_values(&values);

        let aligned: Vec<(ScalarValue, ScalarValue)> = self
            .mapping
            .iter()
            .map(|(k, v)| (table::align_scalar(k, &data_type), v.clone()))
            .collect();

        let keys_not_found: Vec<ScalarValue> = aligned
            .iter()
            .filter(|(k, _)| !observed.contains(k))
            .map(|(k, _)| k.clone())
            .collect();
        if !keys_not_found.is_empty() {
            warn!(
                column = %name,
                keys = ?render(&keys_not_found),
                "ValueMapper: column does not contain these keys as values"
            );
        }

        let values_without_key: Vec<ScalarValue> = observed
            .iter()
            .filter(|v| !aligned.iter().any(|(k, _)| k == *v))
            .cloned()
            .collect();
        if !values_without_key.is_empty() {
            warn!(
                column = %name,
                values = ?render(&values_without_key),
                "ValueMapper: mapping does not contain keys for these values"
            );
        }

        if aligned.is_empty() {
            return Ok(df);
        }
        // Unmapped values keep their original value; without any, the column takes the value type.
        let default = if values_without_key.is_empty() {
            None
        } else {
            Some(ident(&name))
        };
        replace_column(df, &name, build_case_expr(&name, &aligned, default))
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(ValueMapper);

/// ------------------------- OneHotRecoder -------------------------
///
/// OneHotRecoder replaces one categorical column with one integer 0/1 indicator column per
/// distinct value observed in the table being transformed. Indicator columns are named
/// `<column>_<value>`, ordered by value, and appended after the remaining columns.
///
/// - `dummy_na` adds a `<column>_nan` indicator for missing values.
/// - `drop_first` removes the first indicator column (avoids the dummy-variable trap).
#[derive(Debug, Clone)]
pub struct OneHotRecoder {
    pub column: ColumnRef,
    pub dummy_na: bool,
    pub drop_first: bool,
}

impl OneHotRecoder {
    /// Create a new OneHotRecoder for the given column.
    pub fn new(column: impl Into<ColumnRef>, dummy_na: bool, drop_first: bool) -> Self {
        Self {
            column: column.into(),
            dummy_na,
            drop_first,
        }
    }

    /// This transformer is stateless, so fit does nothing.
    pub async fn fit(&mut self, _df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        Ok(())
    }

    /// Expand the column into indicator columns.
    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let name = self.column.resolve(&df)?;
        let (values, _) = column_values(&df, &name).await?;
        let mut categories = table::distinct_values(&values);
        categories.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let mut indicators: Vec<Expr> = categories
            .iter()
            .map(|cat| {
                Expr::Case(DFCase {
                    expr: None,
                    when_then_expr: vec![(
                        Box::new(ident(&name).eq(lit(cat.clone()))),
                        Box::new(lit(1_i64)),
                    )],
                    else_expr: Some(Box::new(lit(0_i64))),
                })
                .alias(format!("{}_{}", name, cat))
            })
            .collect();
        if self.dummy_na {
            indicators.push(
                Expr::Case(DFCase {
                    expr: None,
                    when_then_expr: vec![(Box::new(ident(&name).is_null()), Box::new(lit(1_i64)))],
                    else_expr: Some(Box::new(lit(0_i64))),
                })
                .alias(format!("{}_nan", name)),
            );
        }
        if self.drop_first && !indicators.is_empty() {
            indicators.remove(0);
        }

        let mut exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .filter(|f| f.name() != &name)
            .map(|f| ident(f.name()))
            .collect();
        exprs.extend(indicators);
        if exprs.is_empty() {
            return Err(PreplineError::InvalidData(format!(
                "OneHotRecoder[{}] would produce a table without columns",
                name
            )));
        }
        df.select(exprs).map_err(PreplineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(OneHotRecoder);

/// ------------------------- TargetEncoder -------------------------
///
/// TargetEncoder replaces each category with a smoothed label mean:
///
/// `(n * category_mean + m * global_mean) / (n + m)`
///
/// where `n` is the number of fitting rows in the category and `m` the smoothing constant.
/// Categories absent from the fitting data (and missing categories) encode to null.
#[derive(Debug, Clone)]
pub struct TargetEncoder {
    pub column: String,
    pub smoothing: f64,
    global_mean: Option<f64>,
    encoding: Option<Vec<(ScalarValue, f64)>>,
}

impl TargetEncoder {
    /// Create a new TargetEncoder; `smoothing` must be finite and non-negative.
    pub fn new(column: impl Into<String>, smoothing: f64) -> PreplineResult<Self> {
        if !smoothing.is_finite() || smoothing < 0.0 {
            return Err(PreplineError::InvalidParameter(format!(
                "smoothing {} must be a finite, non-negative number",
                smoothing
            )));
        }
        Ok(Self {
            column: column.into(),
            smoothing,
            global_mean: None,
            encoding: None,
        })
    }

    /// The label mean over all fitting rows, once fitted.
    pub fn global_mean(&self) -> Option<f64> {
        self.global_mean
    }

    /// The learned category -> smoothed mean pairs, in order of first appearance.
    pub fn encodings(&self) -> Option<&[(ScalarValue, f64)]> {
        self.encoding.as_deref()
    }

    /// The smoothed value learned for `category`, if it was seen during fit.
    pub fn encoding_for(&self, category: &ScalarValue) -> Option<f64> {
        self.encoding
            .as_ref()?
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, v)| *v)
    }

    /// Learn the smoothed mean of `y` for every category of the column.
    pub async fn fit(&mut self, df: &DataFrame, y: Option<&[f64]>) -> PreplineResult<()> {
        let y = y.ok_or_else(|| {
            PreplineError::InvalidData(format!(
                "TargetEncoder[{}].fit requires labels",
                self.column
            ))
        })?;
        if !table::has_column(df, &self.column) {
            return Err(PreplineError::MissingColumn(format!(
                "TargetEncoder.fit column not in DataFrame: {}. Actual columns: {:?}",
                self.column,
                table::column_names(df)
            )));
        }
        let (categories, _) = column_values(df, &self.column).await?;
        if categories.len() != y.len() {
            return Err(PreplineError::InvalidData(format!(
                "TargetEncoder.fit X and y must be same length but got {} and {} instead",
                categories.len(),
                y.len()
            )));
        }
        if y.is_empty() {
            return Err(PreplineError::InvalidData(
                "TargetEncoder.fit requires at least one row".to_string(),
            ));
        }

        let global_mean = y.iter().sum::<f64>() / y.len() as f64;
        let mut order: Vec<ScalarValue> = Vec::new();
        let mut stats: HashMap<ScalarValue, (usize, f64)> = HashMap::new();
        for (category, label) in categories.into_iter().zip(y.iter()) {
            if category.is_null() {
                continue;
            }
            let entry = stats.entry(category.clone()).or_insert_with(|| {
                order.push(category);
                (0, 0.0)
            });
            entry.0 += 1;
            entry.1 += label;
        }

        let m = self.smoothing;
        let encoding: Vec<(ScalarValue, f64)> = order
            .into_iter()
            .map(|category| {
                let (n, sum) = stats[&category];
                let n = n as f64;
                let category_mean = sum / n;
                let smoothed = (n * category_mean + m * global_mean) / (n + m);
                (category, smoothed)
            })
            .collect();
        debug!(
            column = %self.column,
            global_mean,
            categories = encoding.len(),
            "TargetEncoder fitted"
        );
        self.global_mean = Some(global_mean);
        self.encoding = Some(encoding);
        Ok(())
    }

    /// Replace each category with its smoothed mean; unseen categories become null.
    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        let encoding = self.encoding.as_ref().ok_or(PreplineError::FitNotCalled)?;
        if !table::has_column(&df, &self.column) {
            return Err(PreplineError::MissingColumn(format!(
                "TargetEncoder.transform column not in DataFrame: {}",
                self.column
            )));
        }
        let (values, data_type) = column_values(&df, &self.column).await?;
        let mapping: Vec<(ScalarValue, ScalarValue)> = encoding
            .iter()
            .map(|(c, v)| (table::align_scalar(c, &data_type), ScalarValue::Float64(Some(*v))))
            .collect();
        let unseen: Vec<ScalarValue> = table::distinct_values(&values)
            .into_iter()
            .filter(|v| !mapping.iter().any(|(c, _)| c == v))
            .collect();
        if !unseen.is_empty() {
            warn!(
                column = %self.column,
                categories = ?render(&unseen),
                "TargetEncoder: categories unseen during fit are encoded as missing"
            );
        }

        let missing = lit(ScalarValue::Float64(None));
        let expr = if mapping.is_empty() {
            missing
        } else {
            build_case_expr(&self.column, &mapping, Some(missing))
        };
        replace_column(df, &self.column, expr)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_transformer!(TargetEncoder);
