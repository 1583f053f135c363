use std::sync::Arc;

use approx::assert_abs_diff_eq;
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::*;

use prepline::exceptions::{PreplineError, PreplineResult};
use prepline::pipeline::Transformer;
use prepline::stats;
use prepline::table;
use prepline::transformers::outlier_handling::{Fence, SigmaClipper, TukeyClipper};

/// Helper function to create a DataFrame with a single column "value" holding the given array.
async fn create_df(values: ArrayRef) -> DataFrame {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "value",
        values.data_type().clone(),
        true,
    )]));
    let batch = RecordBatch::try_new(schema.clone(), vec![values]).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

async fn values_of(df: DataFrame) -> PreplineResult<Vec<Option<f64>>> {
    let batch = table::collect_batch(&df).await?;
    table::float_values(&batch, "value")
}

fn skewed() -> ArrayRef {
    Arc::new(Float64Array::from(vec![
        1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 100.0,
    ]))
}

#[tokio::test]
async fn test_tukey_fences_are_ordered() -> PreplineResult<()> {
    let df = create_df(skewed()).await;
    let mut clipper = TukeyClipper::new("value", Fence::Inner);
    clipper.fit(&df, None).await?;
    let f = clipper.fences().expect("fences after fit");

    assert_abs_diff_eq!(f.q1, 3.25, epsilon = 1e-12);
    assert_abs_diff_eq!(f.q3, 7.75, epsilon = 1e-12);
    let median = stats::median(&values_of(df).await?)?;
    assert!(f.outer_high >= f.inner_high);
    assert!(f.inner_high >= f.q3);
    assert!(f.q3 >= median && median >= f.q1);
    assert!(f.q1 >= f.inner_low);
    assert!(f.inner_low >= f.outer_low);
    Ok(())
}

#[tokio::test]
async fn test_tukey_clips_to_selected_fence() -> PreplineResult<()> {
    let df = create_df(skewed()).await;
    let mut clipper = TukeyClipper::new("value", Fence::Inner);
    clipper.fit(&df, None).await?;
    let inner = values_of(clipper.transform(df.clone()).await?).await?;
    assert_abs_diff_eq!(inner[9].unwrap(), 14.5, epsilon = 1e-12);
    assert_abs_diff_eq!(inner[0].unwrap(), 1.0, epsilon = 1e-12);

    // Switching the fence after fitting needs no refit.
    clipper.fence = Fence::Outer;
    let outer = values_of(clipper.transform(df).await?).await?;
    assert_abs_diff_eq!(outer[9].unwrap(), 21.25, epsilon = 1e-12);

    // Bounds learned at fit time apply to new data unchanged.
    clipper.fence = Fence::Inner;
    let new_df = create_df(Arc::new(Float64Array::from(vec![-50.0, 5.0, 50.0]))).await;
    let clipped = values_of(clipper.transform(new_df).await?).await?;
    assert_eq!(clipped, vec![Some(-3.5), Some(5.0), Some(14.5)]);
    Ok(())
}

#[tokio::test]
async fn test_sigma_clipper_bounds_and_clipping() -> PreplineResult<()> {
    let mut values: Vec<f64> = (1..=20).map(|v| v as f64).collect();
    values.push(1000.0);
    let df = create_df(Arc::new(Float64Array::from(values.clone()))).await;

    let mut clipper = SigmaClipper::new("value");
    clipper.fit(&df, None).await?;
    let (low, high) = clipper.bounds().expect("bounds after fit");
    let as_options: Vec<Option<f64>> = values.iter().map(|v| Some(*v)).collect();
    let mean = stats::mean(&as_options)?;
    let sigma = stats::sample_std(&as_options)?;
    assert_abs_diff_eq!(low, mean - 3.0 * sigma, epsilon = 1e-9);
    assert_abs_diff_eq!(high, mean + 3.0 * sigma, epsilon = 1e-9);

    let out = values_of(clipper.transform(df).await?).await?;
    assert!(out.iter().flatten().all(|v| *v >= low && *v <= high));
    assert_abs_diff_eq!(out[20].unwrap(), high, epsilon = 1e-9);
    assert_abs_diff_eq!(out[0].unwrap(), 1.0, epsilon = 1e-12);
    Ok(())
}

#[tokio::test]
async fn test_clippers_accept_integer_columns() -> PreplineResult<()> {
    let df = create_df(Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 100]))).await;
    let mut clipper = TukeyClipper::new("value", Fence::Outer);
    let out = values_of(clipper.fit_transform(df, None).await?).await?;
    assert_abs_diff_eq!(out[9].unwrap(), 21.25, epsilon = 1e-12);
    Ok(())
}

#[tokio::test]
async fn test_clipper_contract_errors() -> PreplineResult<()> {
    let df = create_df(skewed()).await;
    let clipper = SigmaClipper::new("value");
    assert!(matches!(
        clipper.transform(df).await,
        Err(PreplineError::FitNotCalled)
    ));

    let text = create_df(Arc::new(StringArray::from(vec!["a", "b"]))).await;
    let mut clipper = TukeyClipper::new("value", Fence::Inner);
    assert!(matches!(
        clipper.fit(&text, None).await,
        Err(PreplineError::InvalidData(_))
    ));

    let df = create_df(skewed()).await;
    let mut clipper = SigmaClipper::new("missing");
    assert!(matches!(
        clipper.fit(&df, None).await,
        Err(PreplineError::MissingColumn(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_clippers_keep_nan_and_null_missing() -> PreplineResult<()> {
    let values: ArrayRef = Arc::new(Float64Array::from(vec![
        Some(1.0),
        Some(2.0),
        Some(3.0),
        Some(4.0),
        Some(5.0),
        Some(f64::NAN),
        Some(6.0),
        None,
        Some(8.0),
        Some(100.0),
    ]));
    let df = create_df(values).await;

    let mut tukey = TukeyClipper::new("value", Fence::Inner);
    let mut sigma = SigmaClipper::new("value");
    let outputs = [
        tukey.fit_transform(df.clone(), None).await?,
        sigma.fit_transform(df, None).await?,
    ];
    for out in outputs {
        let batch = table::collect_batch(&out).await?;
        let raw = batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("clipped column is Float64");
        assert!(raw.value(5).is_nan(), "NaN must not be replaced by a bound");
        assert!(raw.is_null(7));
        assert_abs_diff_eq!(raw.value(0), 1.0, epsilon = 1e-12);
    }

    // The NaN row is ignored by fit: present values 1..=6, 8, 100 give q1 = 2.75, q3 = 6.5.
    let fences = tukey.fences().expect("fences after fit");
    assert_abs_diff_eq!(fences.q1, 2.75, epsilon = 1e-12);
    assert_abs_diff_eq!(fences.q3, 6.5, epsilon = 1e-12);
    Ok(())
}
