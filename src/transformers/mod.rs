//! # Transformer Implementations
//!
//! The submodules contain the concrete preprocessing steps, grouped by task.

pub mod categorical_encoding;
pub mod feature_selection;
pub mod imputation;
pub mod outlier_handling;
pub mod scaling;
