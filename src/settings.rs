//! ## Pipeline Configuration
//!
//! Pipelines can be assembled from a JSON document instead of code. Each step names its kind
//! and carries the constructor arguments of that transformer:
//!
//! ```json
//! {
//!   "verbose": false,
//!   "steps": [
//!     {"name": "map_gender", "kind": "mapping", "column": "Gender", "mapping": {"Male": 0, "Female": 1}},
//!     {"name": "target_joined", "kind": "target", "column": "Joined", "smoothing": 10},
//!     {"name": "tukey_age", "kind": "tukey", "column": "Age", "fence": "outer"},
//!     {"name": "scale_age", "kind": "robust", "column": "Age"},
//!     {"name": "impute", "kind": "knn_impute", "n_neighbors": 5},
//!     {"name": "passthrough", "kind": "passthrough"}
//!   ]
//! }
//! ```
//!
//! Mapping keys are JSON object keys and therefore strings. When the mapped column is numeric
//! they are parsed into the column's type at transform time, so `{"1": 0, "2": 0.5}` works on an
//! integer column. Values mixing integers and fractions are widened to Float64.
//!
//! Malformed documents (unknown kinds, bad enum values, a mapping that is not an object) fail
//! with [`PreplineError::ConfigError`]; values that parse but cannot be used (zero neighbors, a
//! threshold outside [0, 1], ...) fail with [`PreplineError::InvalidParameter`] when the
//! pipeline is built.

use crate::exceptions::{PreplineError, PreplineResult};
use crate::pipeline::{BoxedTransformer, Passthrough, Pipeline};
use crate::table::ColumnRef;
use crate::transformers::categorical_encoding::{
    OneHotRecoder, TargetEncoder, ValueMapper, DEFAULT_SMOOTHING,
};
use crate::transformers::feature_selection::{ColumnSelector, CorrelationPruner, SelectionAction};
use crate::transformers::imputation::{KnnImputer, KnnWeights};
use crate::transformers::outlier_handling::{Fence, SigmaClipper, TukeyClipper};
use crate::transformers::scaling::RobustScaler;
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

fn default_smoothing() -> f64 {
    DEFAULT_SMOOTHING
}

fn default_neighbors() -> usize {
    5
}

/// Constructor arguments of one pipeline step, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    Mapping {
        column: ColumnRef,
        mapping: Map<String, Value>,
    },
    OneHot {
        column: ColumnRef,
        #[serde(default)]
        dummy_na: bool,
        #[serde(default)]
        drop_first: bool,
    },
    SelectColumns {
        columns: Vec<String>,
        action: SelectionAction,
    },
    Correlation {
        threshold: f64,
    },
    Sigma3 {
        column: String,
    },
    Tukey {
        column: String,
        fence: Fence,
    },
    Robust {
        column: String,
    },
    Target {
        column: String,
        #[serde(default = "default_smoothing")]
        smoothing: f64,
    },
    KnnImpute {
        #[serde(default = "default_neighbors")]
        n_neighbors: usize,
        #[serde(default)]
        weights: KnnWeights,
    },
    Passthrough,
}

/// Converts a JSON scalar into a DataFusion scalar. Integers become `Int64`, other numbers
/// `Float64`.
fn json_to_scalar(value: &Value) -> PreplineResult<ScalarValue> {
    match value {
        Value::Null => Ok(ScalarValue::Null),
        Value::Bool(b) => Ok(ScalarValue::Boolean(Some(*b))),
        Value::String(s) => Ok(ScalarValue::Utf8(Some(s.clone()))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(ScalarValue::Int64(Some(i))),
            None => n
                .as_f64()
                .map(|f| ScalarValue::Float64(Some(f)))
                .ok_or_else(|| {
                    PreplineError::InvalidParameter(format!("unsupported number {}", n))
                }),
        },
        other => Err(PreplineError::InvalidParameter(format!(
            "mapping values must be scalars, got {}",
            other
        ))),
    }
}

impl StepConfig {
    /// Constructs the configured transformer.
    pub fn build(&self) -> PreplineResult<BoxedTransformer> {
        let transformer: BoxedTransformer = match self {
            StepConfig::Mapping { column, mapping } => {
                let pairs = mapping
                    .iter()
                    .map(|(k, v)| Ok((ScalarValue::Utf8(Some(k.clone())), json_to_scalar(v)?)))
                    .collect::<PreplineResult<Vec<_>>>()?;
                Box::new(ValueMapper::new(column.clone(), pairs)?)
            }
            StepConfig::OneHot {
                column,
                dummy_na,
                drop_first,
            } => Box::new(OneHotRecoder::new(column.clone(), *dummy_na, *drop_first)),
            StepConfig::SelectColumns { columns, action } => {
                Box::new(ColumnSelector::new(columns.clone(), *action))
            }
            StepConfig::Correlation { threshold } => Box::new(CorrelationPruner::new(*threshold)?),
            StepConfig::Sigma3 { column } => Box::new(SigmaClipper::new(column.clone())),
            StepConfig::Tukey { column, fence } => {
                Box::new(TukeyClipper::new(column.clone(), *fence))
            }
            StepConfig::Robust { column } => Box::new(RobustScaler::new(column.clone())),
            StepConfig::Target { column, smoothing } => {
                Box::new(TargetEncoder::new(column.clone(), *smoothing)?)
            }
            StepConfig::KnnImpute {
                n_neighbors,
                weights,
            } => Box::new(KnnImputer::new(*n_neighbors, *weights)?),
            StepConfig::Passthrough => Box::new(Passthrough::new()),
        };
        Ok(transformer)
    }
}

/// A named step of a [`PipelineConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedStep {
    pub name: String,
    #[serde(flatten)]
    pub step: StepConfig,
}

/// Ordered list of steps plus the verbose switch of the resulting [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub steps: Vec<NamedStep>,
    #[serde(default)]
    pub verbose: bool,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> PreplineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> PreplineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Builds a fresh, unfitted pipeline. Step names must be unique.
    pub fn build(&self) -> PreplineResult<Pipeline> {
        if self.steps.is_empty() {
            return Err(PreplineError::InvalidParameter(
                "Pipeline must have at least one transformer.".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());
        for NamedStep { name, step } in &self.steps {
            if !seen.insert(name.as_str()) {
                return Err(PreplineError::InvalidParameter(format!(
                    "Names provided are not unique: '{}'",
                    name
                )));
            }
            let transformer = step.build().map_err(|e| PreplineError::PipelineStep {
                step: name.clone(),
                source: Box::new(e),
            })?;
            steps.push((name.clone(), transformer));
        }
        debug!(steps = steps.len(), verbose = self.verbose, "built pipeline from configuration");
        Ok(Pipeline::new(steps, self.verbose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_scalar() {
        assert_eq!(
            json_to_scalar(&serde_json::json!(3)).unwrap(),
            ScalarValue::Int64(Some(3))
        );
        assert_eq!(
            json_to_scalar(&serde_json::json!(0.5)).unwrap(),
            ScalarValue::Float64(Some(0.5))
        );
        assert_eq!(
            json_to_scalar(&serde_json::json!("a")).unwrap(),
            ScalarValue::Utf8(Some("a".to_string()))
        );
        assert!(json_to_scalar(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_step_defaults() {
        let step: StepConfig =
            serde_json::from_str(r#"{"kind": "knn_impute"}"#).unwrap();
        assert_eq!(
            step,
            StepConfig::KnnImpute {
                n_neighbors: 5,
                weights: KnnWeights::Uniform
            }
        );
        let step: StepConfig =
            serde_json::from_str(r#"{"kind": "target", "column": "ISP"}"#).unwrap();
        assert_eq!(
            step,
            StepConfig::Target {
                column: "ISP".to_string(),
                smoothing: 10.0
            }
        );
    }
}
