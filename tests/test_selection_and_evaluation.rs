use std::sync::Arc;

use approx::assert_abs_diff_eq;
use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionContext};

use prepline::evaluation::{threshold_results, ThresholdTable};
use prepline::exceptions::{PreplineError, PreplineResult};
use prepline::make_pipeline;
use prepline::pipeline::{BoxedTransformer, Passthrough};
use prepline::selection::{dataset_setup, find_random_state, split_table, StabilitySearch};
use prepline::table;
use prepline::transformers::imputation::{KnnImputer, KnnWeights};
use prepline::transformers::scaling::RobustScaler;

const N_ROWS: usize = 50;

/// Two noisy clusters: rows 25.. are mostly positive, rows ..25 mostly negative.
fn synthetic_labels() -> Vec<i64> {
    (0..N_ROWS)
        .map(|i| {
            let positive = i >= 25;
            let flipped = matches!(i, 3 | 11 | 30 | 47);
            i64::from(positive != flipped)
        })
        .collect()
}

async fn synthetic_table(with_label: bool) -> DataFrame {
    let x1: Vec<f64> = (0..N_ROWS).map(|i| i as f64).collect();
    let x2: Vec<f64> = (0..N_ROWS).map(|i| ((i * 7) % 11) as f64).collect();
    let mut fields = vec![
        Field::new("x1", DataType::Float64, true),
        Field::new("x2", DataType::Float64, true),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(x1)),
        Arc::new(Float64Array::from(x2)),
    ];
    if with_label {
        fields.push(Field::new("Survived", DataType::Int64, true));
        columns.push(Arc::new(Int64Array::from(synthetic_labels())));
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let mem_table = MemTable::try_new(schema, vec![vec![batch]]).unwrap();
    let ctx = SessionContext::new();
    ctx.register_table("synthetic", Arc::new(mem_table)).unwrap();
    ctx.table("synthetic").await.unwrap()
}

#[tokio::test]
async fn test_stability_search_is_deterministic() -> PreplineResult<()> {
    let df = synthetic_table(false).await;
    let labels = synthetic_labels();

    let mut first_pipeline = make_pipeline!(false,
        ("scale_x1", RobustScaler::new("x1")),
        ("scale_x2", RobustScaler::new("x2")),
        ("passthrough", Passthrough::new()),
    );
    let first = find_random_state(&df, &labels, &mut first_pipeline, 50).await?;

    let mut second_pipeline = make_pipeline!(false,
        ("scale_x1", RobustScaler::new("x1")),
        ("scale_x2", RobustScaler::new("x2")),
        ("passthrough", Passthrough::new()),
    );
    let second = find_random_state(&df, &labels, &mut second_pipeline, 50).await?;

    assert_eq!(first.seed, second.seed);
    assert_eq!(first.ratios, second.ratios);
    assert_eq!(first.seeds, second.seeds);

    assert!(!first.ratios.is_empty());
    assert_eq!(first.ratios.len(), first.seeds.len());
    assert!(first.seeds.iter().all(|&s| s < 50));
    assert!(first.ratios.iter().all(|r| r.is_finite() && *r >= 0.0));

    let mean = first.ratios.iter().sum::<f64>() / first.ratios.len() as f64;
    assert_abs_diff_eq!(first.mean_ratio, mean, epsilon = 1e-12);
    let chosen = first
        .seeds
        .iter()
        .position(|&s| s == first.seed)
        .expect("chosen seed has a ratio");
    let chosen_gap = (first.ratios[chosen] - mean).abs();
    for (i, ratio) in first.ratios.iter().enumerate() {
        let gap = (ratio - mean).abs();
        assert!(chosen_gap <= gap);
        // Ties resolve to the earliest seed.
        if gap == chosen_gap {
            assert!(i >= chosen);
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_stability_search_accepts_boxed_transformers() -> PreplineResult<()> {
    let df = synthetic_table(false).await;
    let labels = synthetic_labels();
    let mut boxed: BoxedTransformer = Box::new(RobustScaler::new("x2"));
    let selection = find_random_state(&df, &labels, boxed.as_mut(), 5).await?;
    assert!(selection.seed < 5);
    Ok(())
}

#[tokio::test]
async fn test_stability_search_fails_when_every_seed_is_discarded() -> PreplineResult<()> {
    let df = synthetic_table(false).await;
    let labels = synthetic_labels();
    let search = StabilitySearch {
        iterations: 3,
        min_train_f1: 1.1,
        ..Default::default()
    };
    let mut scaler = RobustScaler::new("x1");
    let result = search.run(&df, &labels, &mut scaler).await;
    assert!(matches!(
        result,
        Err(PreplineError::NoUsableSeeds { iterations: 3, .. })
    ));

    assert!(matches!(
        search.run(&df, &labels[..10], &mut scaler).await,
        Err(PreplineError::InvalidData(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_split_table_keeps_class_balance() -> PreplineResult<()> {
    let df = synthetic_table(false).await;
    let labels = synthetic_labels();
    let split = split_table(&df, &labels, 0.2, 3).await?;
    assert_eq!(split.y_train.len(), 40);
    assert_eq!(split.y_test.len(), 10);
    assert_eq!(split.y_test.iter().filter(|&&l| l == 1).count(), 5);
    assert_eq!(table::shape(&split.train).await?, (40, 2));
    Ok(())
}

#[tokio::test]
async fn test_dataset_setup() -> PreplineResult<()> {
    let df = synthetic_table(true).await;
    let mut pipeline = make_pipeline!(false,
        ("scale_x1", RobustScaler::new("x1")),
        ("impute", KnnImputer::new(5, KnnWeights::Distance)?),
    );
    let data = dataset_setup(&df, "Survived", &mut pipeline, 107, 0.2).await?;
    assert_eq!(data.feature_names, vec!["x1", "x2"]);
    assert_eq!(data.x_train.dim(), (40, 2));
    assert_eq!(data.x_test.dim(), (10, 2));
    assert_eq!(data.y_train.len(), 40);
    assert_eq!(data.y_test.len(), 10);

    let missing = dataset_setup(&df, "Rating", &mut pipeline, 107, 0.2).await;
    assert!(matches!(missing, Err(PreplineError::MissingColumn(_))));
    Ok(())
}

#[tokio::test]
async fn test_threshold_sweep_perfect_classifier() -> PreplineResult<()> {
    let y = [0, 1, 1, 0, 1, 0];
    let scores: Vec<f64> = y.iter().map(|&v| v as f64).collect();
    let sweep = threshold_results(&[0.25, 0.5, 0.75], &y, &scores)?;
    assert_eq!(sweep.len(), 3);
    let row = sweep.row(0.5).expect("row for 0.5");
    assert_abs_diff_eq!(row.precision, 1.0);
    assert_abs_diff_eq!(row.recall, 1.0);
    assert_abs_diff_eq!(row.f1, 1.0);
    assert_abs_diff_eq!(row.accuracy, 1.0);
    assert_abs_diff_eq!(row.auc, 1.0);
    Ok(())
}

#[tokio::test]
async fn test_threshold_sweep_never_positive() -> PreplineResult<()> {
    let y = [0, 1, 1, 0, 1, 0];
    let scores = [0.0; 6];
    let sweep = threshold_results(&[0.1, 0.5, 0.9], &y, &scores)?;
    for row in &sweep.rows {
        assert_eq!(row.precision, 0.0);
        assert_eq!(row.recall, 0.0);
        assert_eq!(row.f1, 0.0);
        assert_abs_diff_eq!(row.accuracy, 0.5);
        assert_abs_diff_eq!(row.auc, 0.5);
    }
    Ok(())
}

#[tokio::test]
async fn test_threshold_table_views() -> PreplineResult<()> {
    let y = [0, 0, 1, 1, 1];
    let scores = [0.1, 0.7, 0.35, 0.8, 0.9];
    let sweep = threshold_results(&[0.3, 0.6], &y, &scores)?;
    // 5 of the 6 positive/negative pairs are ordered correctly.
    assert_abs_diff_eq!(sweep.rows[0].auc, 5.0 / 6.0, epsilon = 1e-12);
    let rounded = sweep.rounded(2);
    assert_abs_diff_eq!(rounded.rows[0].auc, 0.83, epsilon = 1e-12);
    // At 0.3: predicted positives are rows 1..5, 3 of 4 correct.
    assert_abs_diff_eq!(sweep.rows[0].precision, 0.75, epsilon = 1e-12);
    assert_abs_diff_eq!(sweep.rows[0].recall, 1.0, epsilon = 1e-12);

    let df = rounded.to_dataframe()?;
    assert_eq!(table::column_names(&df), ThresholdTable::COLUMNS.to_vec());
    assert_eq!(table::shape(&df).await?, (2, 6));
    Ok(())
}
