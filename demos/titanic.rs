// Run `cargo run --example titanic -- <path to titanic.csv>` to execute this example.
// The CSV needs the columns Gender, Joined, Age, Fare and Survived.

use std::error::Error;

use prepline::evaluation::threshold_results;
use prepline::model::{Classifier, KNeighborsClassifier};
use prepline::selection::{dataset_setup, find_random_state, labels_from_batch};
use prepline::settings::PipelineConfig;
use prepline::table;

const CONFIG: &str = r#"{
    "verbose": false,
    "steps": [
        {"name": "map_gender", "kind": "mapping", "column": "Gender", "mapping": {"Male": 0, "Female": 1}},
        {"name": "target_joined", "kind": "target", "column": "Joined"},
        {"name": "tukey_age", "kind": "tukey", "column": "Age", "fence": "outer"},
        {"name": "tukey_fare", "kind": "tukey", "column": "Fare", "fence": "outer"},
        {"name": "scale_age", "kind": "robust", "column": "Age"},
        {"name": "scale_fare", "kind": "robust", "column": "Fare"},
        {"name": "impute", "kind": "knn_impute", "n_neighbors": 5, "weights": "uniform"},
        {"name": "passthrough", "kind": "passthrough"}
    ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: titanic <path to titanic.csv>")?;
    let df = table::load_table(&path).await?;
    df.clone().limit(0, Some(5))?.show().await?;

    let config = PipelineConfig::from_json_str(CONFIG)?;
    let mut pipeline = config.build()?;

    let batch = table::collect_batch(&df).await?;
    let labels = labels_from_batch(&batch, "Survived")?;
    let features = df.clone().drop_columns(&["Survived"])?;
    let selection = find_random_state(&features, &labels, &mut pipeline, 50).await?;
    println!(
        "chosen seed {} (mean test/train F1 ratio {:.3} over {} seeds)",
        selection.seed,
        selection.mean_ratio,
        selection.ratios.len()
    );

    let data = dataset_setup(&df, "Survived", &mut pipeline, selection.seed, 0.2).await?;
    let mut model = KNeighborsClassifier::new(5)?;
    model.fit(&data.x_train, &data.y_train)?;
    let scores = model.predict_proba(&data.x_test)?;
    let thresholds: Vec<f64> = (1..10).map(|t| t as f64 / 10.0).collect();
    let sweep = threshold_results(&thresholds, &data.y_test, &scores)?.rounded(2);
    sweep.to_dataframe()?.show().await?;

    Ok(())
}
