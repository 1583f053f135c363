//! ## Custom Errors for Prepline
//!
//! This module defines the error type shared by every transformer, the pipeline, and the
//! split-selection utilities. It uses the `thiserror` crate to derive the `Error` trait.
//!
//! The variants fall into a few groups:
//!
//! - **Configuration errors** (`InvalidParameter`): raised when a transformer or a pipeline is
//!   constructed with arguments that can never work (unknown enum values, zero neighbors, ...).
//! - **Contract violations** (`MissingColumn`, `InvalidData`, `FitNotCalled`): raised at call time
//!   when the input does not satisfy what a step needs.
//! - **Wrapped errors** from DataFusion, Arrow, serde_json and I/O.
//!
//! Data-quality findings (unmapped values, unknown columns in drop mode, unseen categories, ...)
//! are never errors; they are reported through `tracing` and processing continues.
//!
//! ### Example
//!
//! ```rust
//! use prepline::exceptions::{PreplineError, PreplineResult};
//!
//! fn check_threshold(threshold: f64) -> PreplineResult<()> {
//!     if !(0.0..=1.0).contains(&threshold) {
//!         return Err(PreplineError::InvalidParameter(format!(
//!             "threshold {} must be between 0 and 1",
//!             threshold
//!         )));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_threshold(1.5).is_err());
//! ```

use thiserror::Error;

/// Errors specific to the Prepline library.
#[derive(Debug, Error)]
pub enum PreplineError {
    /// Wraps underlying I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Wraps errors from DataFusion.
    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    /// Wraps errors from Arrow.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Wraps errors raised while reading a pipeline configuration.
    #[error("Configuration parse error: {0}")]
    ConfigError(#[from] serde_json::Error),

    /// Wraps errors raised while shaping a dense feature matrix.
    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    /// Indicates that an invalid parameter was provided (e.g., unsupported value or out-of-range number).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Indicates that the specified column does not exist in the DataFrame.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Indicates that the data handed to a step does not have the expected type or shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Indicates the transform method was called before calling fit for a stateful transformer.
    #[error("Transform called before fit for stateful transformer")]
    FitNotCalled,

    /// A step inside a pipeline failed; the step name is kept next to the original error.
    #[error("Pipeline step '{step}' failed: {source}")]
    PipelineStep {
        step: String,
        #[source]
        source: Box<PreplineError>,
    },

    /// Every seed tried by the stability search was discarded, so no split can be chosen.
    #[error("No usable split seed: all {iterations} seeds were discarded (train F1 below {min_train_f1})")]
    NoUsableSeeds { iterations: usize, min_train_f1: f64 },
}

impl PreplineError {
    /// Returns the innermost error, looking through any pipeline step wrappers.
    pub fn root_cause(&self) -> &PreplineError {
        match self {
            PreplineError::PipelineStep { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A convenient result type for Prepline operations.
pub type PreplineResult<T> = std::result::Result<T, PreplineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test io error");
        let err: PreplineError = io_err.into();
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("I/O error:"));
        assert!(err_msg.contains("test io error"));
    }

    #[test]
    fn test_datafusion_error() {
        let df_err = datafusion::error::DataFusionError::Plan("test plan error".into());
        let err: PreplineError = df_err.into();
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("DataFusion error:"));
        assert!(err_msg.contains("test plan error"));
    }

    #[test]
    fn test_arrow_error() {
        let arrow_err = arrow::error::ArrowError::ComputeError("test compute error".into());
        let err: PreplineError = arrow_err.into();
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("Arrow error:"));
        assert!(err_msg.contains("test compute error"));
    }

    #[test]
    fn test_config_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PreplineError = json_err.into();
        assert!(format!("{}", err).contains("Configuration parse error:"));
    }

    #[test]
    fn test_missing_column_error() {
        let err = PreplineError::MissingColumn("missing column".into());
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("Missing column:"));
        assert!(err_msg.contains("missing column"));
    }

    #[test]
    fn test_fit_not_called_error() {
        let err = PreplineError::FitNotCalled;
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("Transform called before fit for stateful transformer"));
    }

    #[test]
    fn test_pipeline_step_error_keeps_root_cause() {
        let err = PreplineError::PipelineStep {
            step: "outer".into(),
            source: Box::new(PreplineError::PipelineStep {
                step: "inner".into(),
                source: Box::new(PreplineError::FitNotCalled),
            }),
        };
        assert!(format!("{}", err).contains("'outer'"));
        assert!(matches!(err.root_cause(), PreplineError::FitNotCalled));
    }

    #[test]
    fn test_no_usable_seeds_error() {
        let err = PreplineError::NoUsableSeeds {
            iterations: 50,
            min_train_f1: 0.1,
        };
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("all 50 seeds"));
        assert!(err_msg.contains("0.1"));
    }
}
