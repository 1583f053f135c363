//! # Prepline
//!
//! Stateful fit/transform preprocessing pipelines over Apache DataFusion tables, plus the
//! evaluation helpers used to pick a representative train/test split and to tabulate
//! classifier behavior across decision thresholds.
//!
//! - [`pipeline`]: the [`pipeline::Transformer`] trait and the sequential [`pipeline::Pipeline`].
//! - [`transformers`]: concrete steps (value mapping, one-hot, column selection, correlation
//!   pruning, 3-sigma and Tukey clipping, robust scaling, target encoding, KNN imputation).
//! - [`settings`]: configuration-driven pipeline assembly from JSON.
//! - [`selection`]: stratified splitting, the split-seed stability search and dataset setup.
//! - [`evaluation`]: classification metrics and the threshold sweep.
//! - [`model`]: the k-nearest-neighbor classifier consumed by the stability search.

pub mod evaluation;
pub mod exceptions;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod selection;
pub mod settings;
pub mod stats;
pub mod table;
pub mod transformers;
