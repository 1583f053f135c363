use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;

use prepline::exceptions::{PreplineError, PreplineResult};
use prepline::table;
use prepline::transformers::feature_selection::{ColumnSelector, CorrelationPruner};

async fn create_df(columns: Vec<(&str, ArrayRef)>) -> DataFrame {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

fn floats(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

async fn three_columns() -> DataFrame {
    create_df(vec![
        ("A", floats(vec![1.0, 2.0, 3.0])),
        ("B", floats(vec![4.0, 5.0, 6.0])),
        ("C", Arc::new(StringArray::from(vec!["x", "y", "z"])) as ArrayRef),
    ])
    .await
}

#[tokio::test]
async fn test_drop_ignores_unknown_columns() -> PreplineResult<()> {
    let df = three_columns().await;
    let selector = ColumnSelector::drop(vec!["B".to_string(), "Nope".to_string()]);
    let out = selector.transform(df).await?;
    assert_eq!(table::column_names(&out), vec!["A", "C"]);
    Ok(())
}

#[tokio::test]
async fn test_drop_everything_fails() -> PreplineResult<()> {
    let df = three_columns().await;
    let selector = ColumnSelector::drop(vec!["A".into(), "B".into(), "C".into()]);
    assert!(matches!(
        selector.transform(df).await,
        Err(PreplineError::InvalidParameter(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_keep_is_strict() -> PreplineResult<()> {
    let df = three_columns().await;
    let out = ColumnSelector::keep(vec!["C".into(), "A".into()])
        .transform(df.clone())
        .await?;
    assert_eq!(table::column_names(&out), vec!["C", "A"]);

    let result = ColumnSelector::keep(vec!["A".into(), "Nope".into()])
        .transform(df)
        .await;
    assert!(matches!(result, Err(PreplineError::MissingColumn(_))));
    Ok(())
}

#[tokio::test]
async fn test_correlation_pruner_drops_later_member() -> PreplineResult<()> {
    let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b: Vec<f64> = a.iter().map(|v| 2.0 * v).collect();
    let c = vec![3.0, -1.0, 4.0, 1.0, -5.0, 9.0];
    let df = create_df(vec![
        ("A", floats(a)),
        ("B", floats(b)),
        ("C", floats(c)),
    ])
    .await;

    let mut pruner = CorrelationPruner::new(0.9)?;
    pruner.fit(&df, None).await?;
    assert_eq!(pruner.correlated_columns(), Some(&["B".to_string()][..]));

    let out = pruner.transform(df).await?;
    assert_eq!(table::column_names(&out), vec!["A", "C"]);
    Ok(())
}

#[tokio::test]
async fn test_correlation_pruner_is_single_pass() -> PreplineResult<()> {
    // r(A, B) = 0.94, r(B, C) = 0.85, r(A, C) = 0.63. C is marked through B even though B
    // itself is removed, since the mask is computed once.
    let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let noise = vec![0.0, 3.0, -3.0, 3.0, -3.0, 3.0, -3.0, 0.0];
    let b: Vec<f64> = a.iter().zip(&noise).map(|(x, n)| x + n * 0.3).collect();
    let c: Vec<f64> = b.iter().zip(&noise).map(|(x, n)| x + n * 0.6).collect();
    let df = create_df(vec![("A", floats(a)), ("B", floats(b)), ("C", floats(c))]).await;

    let mut pruner = CorrelationPruner::new(0.8)?;
    pruner.fit(&df, None).await?;
    assert_eq!(
        pruner.correlated_columns(),
        Some(&["B".to_string(), "C".to_string()][..])
    );
    let out = pruner.transform(df).await?;
    assert_eq!(table::column_names(&out), vec!["A"]);
    Ok(())
}

#[tokio::test]
async fn test_correlation_pruner_requires_fit() -> PreplineResult<()> {
    let df = three_columns().await;
    let pruner = CorrelationPruner::new(0.5)?;
    assert!(matches!(
        pruner.transform(df).await,
        Err(PreplineError::FitNotCalled)
    ));
    Ok(())
}
