//! ## Table Helpers
//!
//! Tables are DataFusion `DataFrame`s. Column-wise rewrites stay lazy (logical expressions),
//! while anything that needs to look at actual values goes through the helpers below, which
//! materialize a `DataFrame` into a single Arrow `RecordBatch` and convert columns into plain
//! Rust vectors or a dense `ndarray` matrix.
//!
//! Missing values are Arrow nulls; for floating point columns `NaN` is treated as missing too.

use crate::exceptions::{PreplineError, PreplineResult};
use arrow::array::{Array, ArrayRef, Float64Array, UInt32Array};
use arrow::compute::{cast, concat_batches, take};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::prelude::{CsvReadOptions, DataFrame, SessionContext};
use datafusion::scalar::ScalarValue;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Reference to a column either by name or by zero-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Position(usize),
    Name(String),
}

impl ColumnRef {
    /// Resolves the reference against the DataFrame schema, returning the column name.
    pub fn resolve(&self, df: &DataFrame) -> PreplineResult<String> {
        match self {
            ColumnRef::Name(name) => {
                if has_column(df, name) {
                    Ok(name.clone())
                } else {
                    Err(PreplineError::MissingColumn(format!(
                        "Column '{}' not found in DataFrame",
                        name
                    )))
                }
            }
            ColumnRef::Position(idx) => df
                .schema()
                .fields()
                .get(*idx)
                .map(|f| f.name().clone())
                .ok_or_else(|| {
                    PreplineError::MissingColumn(format!(
                        "Column position {} out of range for {} columns",
                        idx,
                        df.schema().fields().len()
                    ))
                }),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Name(name) => write!(f, "{}", name),
            ColumnRef::Position(idx) => write!(f, "#{}", idx),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<usize> for ColumnRef {
    fn from(idx: usize) -> Self {
        ColumnRef::Position(idx)
    }
}

/// Returns true if the DataFrame has an (unqualified) column with the given name.
pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().field_with_name(None, name).is_ok()
}

/// Returns the column names of the DataFrame in schema order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

/// Validates that `name` exists and holds a numeric Arrow type.
pub fn require_numeric(df: &DataFrame, name: &str) -> PreplineResult<()> {
    let field = df.schema().field_with_name(None, name).map_err(|_| {
        PreplineError::MissingColumn(format!("Column '{}' not found in DataFrame", name))
    })?;
    if !field.data_type().is_numeric() {
        return Err(PreplineError::InvalidData(format!(
            "expected int or float in column '{}' but found {}",
            name,
            field.data_type()
        )));
    }
    Ok(())
}

/// Materializes the DataFrame into a single record batch.
pub async fn collect_batch(df: &DataFrame) -> PreplineResult<RecordBatch> {
    let batches = df.clone().collect().await?;
    let schema = match batches.first() {
        Some(batch) => batch.schema(),
        None => Arc::clone(df.schema().inner()),
    };
    Ok(concat_batches(&schema, &batches)?)
}

/// Wraps a record batch back into a DataFrame backed by a fresh session.
pub fn from_batch(batch: RecordBatch) -> PreplineResult<DataFrame> {
    let ctx = SessionContext::new();
    Ok(ctx.read_batch(batch)?)
}

/// Selects the given rows (in the given order) from a record batch.
pub fn take_rows(batch: &RecordBatch, rows: &[usize]) -> PreplineResult<RecordBatch> {
    let indices = UInt32Array::from(rows.iter().map(|&r| r as u32).collect::<Vec<u32>>());
    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), &indices, None))
        .collect::<Result<_, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> PreplineResult<&'a ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| {
        PreplineError::MissingColumn(format!("Column '{}' not found in DataFrame", name))
    })
}

/// Reads a numeric (or boolean) column as `f64`, mapping nulls and `NaN` to `None`.
pub fn float_values(batch: &RecordBatch, name: &str) -> PreplineResult<Vec<Option<f64>>> {
    let array = column_by_name(batch, name)?;
    let data_type = array.data_type();
    if !(data_type.is_numeric() || matches!(data_type, DataType::Boolean | DataType::Null)) {
        return Err(PreplineError::InvalidData(format!(
            "expected int or float in column '{}' but found {}",
            name, data_type
        )));
    }
    let casted = cast(array.as_ref(), &DataType::Float64)?;
    let floats = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| {
            PreplineError::InvalidData(format!("Column '{}' could not be read as Float64", name))
        })?;
    Ok(floats
        .iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Reads any column as a vector of DataFusion scalar values (nulls included).
pub fn scalar_values(batch: &RecordBatch, name: &str) -> PreplineResult<Vec<ScalarValue>> {
    let array = column_by_name(batch, name)?;
    (0..array.len())
        .map(|i| ScalarValue::try_from_array(array, i).map_err(PreplineError::from))
        .collect()
}

/// Distinct non-null values in order of first appearance.
pub fn distinct_values(values: &[ScalarValue]) -> Vec<ScalarValue> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert((*v).clone()))
        .cloned()
        .collect()
}

fn is_string_type(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}

/// Parses a string key into the numeric `target` type. Integer targets only accept integer
/// text, so `"1.5"` never matches an integer column.
fn parse_numeric_key(value: &ScalarValue, target: &DataType) -> Option<ScalarValue> {
    let text = match value {
        ScalarValue::Utf8(Some(s))
        | ScalarValue::LargeUtf8(Some(s))
        | ScalarValue::Utf8View(Some(s)) => s.trim(),
        _ => return None,
    };
    let parsed = if target.is_integer() {
        ScalarValue::Int64(Some(text.parse::<i64>().ok()?))
    } else {
        ScalarValue::Float64(Some(text.parse::<f64>().ok()?))
    };
    parsed.cast_to(target).ok()
}

/// Casts `value` to `target` when both belong to the same family (numeric or string), so that
/// configured keys compare equal to the values actually stored in a column. String keys are
/// parsed when the column is numeric (JSON object keys are always strings). Anything that
/// cannot be converted is returned unchanged and simply never matches.
pub fn align_scalar(value: &ScalarValue, target: &DataType) -> ScalarValue {
    let source = value.data_type();
    if is_string_type(&source) && target.is_numeric() {
        return parse_numeric_key(value, target).unwrap_or_else(|| value.clone());
    }
    let same_family = (source.is_numeric() && target.is_numeric())
        || (is_string_type(&source) && is_string_type(target));
    if same_family && &source != target {
        value.cast_to(target).unwrap_or_else(|_| value.clone())
    } else {
        value.clone()
    }
}

/// Converts a batch into a dense row-major matrix; missing entries become `NaN`.
pub fn batch_to_matrix(batch: &RecordBatch) -> PreplineResult<Array2<f64>> {
    let schema = batch.schema();
    let columns: Vec<Vec<Option<f64>>> = schema
        .fields()
        .iter()
        .map(|f| float_values(batch, f.name()))
        .collect::<PreplineResult<_>>()?;
    let (n_rows, n_cols) = (batch.num_rows(), columns.len());
    let mut flat = Vec::with_capacity(n_rows * n_cols);
    for row in 0..n_rows {
        for column in &columns {
            flat.push(column[row].unwrap_or(f64::NAN));
        }
    }
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

/// Materializes the DataFrame and converts it into a dense matrix (see [`batch_to_matrix`]).
pub async fn to_matrix(df: &DataFrame) -> PreplineResult<Array2<f64>> {
    let batch = collect_batch(df).await?;
    batch_to_matrix(&batch)
}

/// Builds a batch of nullable `Float64` columns from a dense matrix.
pub fn matrix_to_batch(matrix: &Array2<f64>, names: &[String]) -> PreplineResult<RecordBatch> {
    if matrix.ncols() != names.len() {
        return Err(PreplineError::InvalidData(format!(
            "matrix has {} columns but {} names were given",
            matrix.ncols(),
            names.len()
        )));
    }
    let fields: Vec<Field> = names
        .iter()
        .map(|n| Field::new(n, DataType::Float64, true))
        .collect();
    let columns: Vec<ArrayRef> = matrix
        .columns()
        .into_iter()
        .map(|c| Arc::new(Float64Array::from(c.to_vec())) as ArrayRef)
        .collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Returns `(rows, columns)` of the DataFrame; counting rows executes the plan.
pub async fn shape(df: &DataFrame) -> PreplineResult<(usize, usize)> {
    let rows = df.clone().count().await?;
    Ok((rows, df.schema().fields().len()))
}

/// Loads a CSV or Parquet file (chosen by extension) into a DataFrame.
pub async fn load_table(path: &str) -> PreplineResult<DataFrame> {
    let ctx = SessionContext::new();
    let extension = Path::new(path).extension().and_then(|ext| ext.to_str());
    match extension {
        Some("parquet") => Ok(ctx.read_parquet(path, Default::default()).await?),
        Some("csv") => Ok(ctx.read_csv(path, CsvReadOptions::new()).await?),
        _ => Err(PreplineError::InvalidParameter(format!(
            "Unsupported file format for '{}'. Please provide a CSV or Parquet file.",
            path
        ))),
    }
}
