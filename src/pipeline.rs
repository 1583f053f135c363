//! ## Prepline Pipeline
//!
//! This module provides core abstractions for building, fitting, and transforming data using
//! composable pipelines of transformers.
//!
//! ### Overview
//!
//! - The [`Transformer`] trait defines the two-phase contract every step obeys: `fit` learns
//!   state from a training table (and optional labels), `transform` replays that state on any
//!   table. Stateful steps refuse to transform before they are fitted; stateless steps accept
//!   it because their `fit` is a no-op.
//! - The [`Pipeline`] struct chains transformers. Fitting a pipeline fits step 1 on the input,
//!   transforms the input with step 1, fits step 2 on that output, and so on. Transforming a
//!   pipeline only replays the stored state of each step.
//! - Macros [`crate::impl_transformer`] and [`crate::make_pipeline`] simplify the creation and
//!   implementation of transformers and pipelines.
//!
//! Every transform returns the same table type it receives (a DataFusion `DataFrame`).

use crate::exceptions::{PreplineError, PreplineResult};
use crate::impl_transformer;
use crate::table;
use async_trait::async_trait;
use datafusion::prelude::*;
use std::time::Instant;
use tracing::debug;

/// Trait for components used in the data transformation pipeline.
///
/// `fit_transform` is always `fit` followed by `transform`, so statistics are produced by a
/// single code path.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Fit the transformer on a DataFrame and, for supervised steps, the matching labels.
    ///
    /// # Arguments
    ///
    /// * `df` - The input DataFrame.
    /// * `y` - Optional labels, one per row of `df`.
    async fn fit(&mut self, df: &DataFrame, y: Option<&[f64]>) -> PreplineResult<()>;

    /// Transform the input DataFrame, returning a new DataFrame with the transformation applied.
    ///
    /// # Arguments
    ///
    /// * `df` - The input DataFrame.
    ///
    /// # Returns
    ///
    /// * `PreplineResult<DataFrame>` - The transformed DataFrame, or [`PreplineError::FitNotCalled`]
    ///   when a stateful transformer has not been fitted yet.
    async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame>;

    /// Returns true if the transformer is stateful (i.e. requires a call to fit before transform can be called).
    fn is_stateful(&self) -> bool;

    /// Fit on `df` and then transform it.
    async fn fit_transform(
        &mut self,
        df: DataFrame,
        y: Option<&[f64]>,
    ) -> PreplineResult<DataFrame> {
        self.fit(&df, y).await?;
        self.transform(df).await
    }
}

/// A boxed transformer as stored by a [`Pipeline`].
pub type BoxedTransformer = Box<dyn Transformer>;

/// Macro to implement the [`Transformer`] trait for Prepline transformers.
///
/// The type must already have inherent methods:
/// - `async fn fit(&mut self, &DataFrame, Option<&[f64]>) -> PreplineResult<()>`
/// - `async fn transform(&self, DataFrame) -> PreplineResult<DataFrame>`
/// - **`fn inherent_is_stateful(&self) -> bool`**
///
/// # Example
///
/// ```rust,no_run
/// use prepline::exceptions::PreplineResult;
/// use datafusion::prelude::DataFrame;
/// use prepline::impl_transformer;
///
/// pub struct MyTransformer;
///
/// impl MyTransformer {
///     pub async fn fit(&mut self, _df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
///         Ok(())
///     }
///
///     pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
///         Ok(df)
///     }
///
///     pub fn inherent_is_stateful(&self) -> bool {
///         false
///     }
/// }
///
/// impl_transformer!(MyTransformer);
/// ```
#[macro_export]
macro_rules! impl_transformer {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl $crate::pipeline::Transformer for $ty {
            async fn fit(
                &mut self,
                df: &datafusion::prelude::DataFrame,
                y: Option<&[f64]>,
            ) -> $crate::exceptions::PreplineResult<()> {
                <$ty>::fit(self, df, y).await
            }
            async fn transform(
                &self,
                df: datafusion::prelude::DataFrame,
            ) -> $crate::exceptions::PreplineResult<datafusion::prelude::DataFrame> {
                <$ty>::transform(self, df).await
            }
            fn is_stateful(&self) -> bool {
                <$ty>::inherent_is_stateful(self)
            }
        }
    };
}

/// Identity step. Useful as an explicit terminal step in configuration-built pipelines.
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }

    pub async fn fit(&mut self, _df: &DataFrame, _y: Option<&[f64]>) -> PreplineResult<()> {
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        Ok(df)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(Passthrough);

fn wrap_step_error(name: &str, err: PreplineError) -> PreplineError {
    PreplineError::PipelineStep {
        step: name.to_string(),
        source: Box::new(err),
    }
}

/// A pipeline that chains a sequence of transformers.
///
/// Each transformer's output is passed as input to the next transformer. The pipeline owns its
/// steps exclusively.
pub struct Pipeline {
    steps: Vec<(String, BoxedTransformer)>,
    verbose: bool,
}

impl Pipeline {
    /// Creates a new pipeline.
    ///
    /// # Arguments
    ///
    /// * `steps` - A vector of (name, transformer) pairs (each transformer is already boxed).
    /// * `verbose` - If true, prints the output shape and timing of every step.
    pub fn new(steps: Vec<(String, BoxedTransformer)>, verbose: bool) -> Self {
        Self { steps, verbose }
    }

    /// Appends a step to the end of the pipeline.
    pub fn with_step(mut self, name: impl Into<String>, step: impl Transformer + 'static) -> Self {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    /// Names of the steps, in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn ensure_not_empty(&self) -> PreplineResult<()> {
        if self.steps.is_empty() {
            return Err(PreplineError::InvalidParameter(
                "Pipeline must have at least one transformer.".to_string(),
            ));
        }
        Ok(())
    }

    async fn report(
        &self,
        position: usize,
        name: &str,
        df: &DataFrame,
        start: Instant,
    ) -> PreplineResult<()> {
        if self.verbose {
            let (rows, cols) = table::shape(df).await?;
            println!(
                "[Pipeline] (step {} of {}) {}: output {} x {}, {:?}",
                position + 1,
                self.steps.len(),
                name,
                rows,
                cols,
                start.elapsed()
            );
        }
        Ok(())
    }

    /// Fits each transformer (sequentially) on the output of the previous one and returns the
    /// fully transformed training DataFrame.
    pub async fn fit(&mut self, df: &DataFrame, y: Option<&[f64]>) -> PreplineResult<DataFrame> {
        self.ensure_not_empty()?;
        let mut current_df = df.clone();
        for position in 0..self.steps.len() {
            let start = Instant::now();
            let (name, step) = &mut self.steps[position];
            let name = name.clone();
            current_df = step
                .fit_transform(current_df, y)
                .await
                .map_err(|e| wrap_step_error(&name, e))?;
            debug!(step = %name, elapsed = ?start.elapsed(), "fitted pipeline step");
            self.report(position, &name, &current_df, start).await?;
        }
        Ok(current_df)
    }

    /// Applies the `transform` method of each transformer (without fitting).
    pub async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        self.ensure_not_empty()?;
        let mut current_df = df;
        for (position, (name, step)) in self.steps.iter().enumerate() {
            let start = Instant::now();
            current_df = step
                .transform(current_df)
                .await
                .map_err(|e| wrap_step_error(name, e))?;
            self.report(position, name, &current_df, start).await?;
        }
        Ok(current_df)
    }

    /// Convenience method to call `fit` and then return the final transformed DataFrame.
    pub async fn fit_transform(
        &mut self,
        df: &DataFrame,
        y: Option<&[f64]>,
    ) -> PreplineResult<DataFrame> {
        Pipeline::fit(self, df, y).await
    }
}

#[async_trait]
impl Transformer for Pipeline {
    async fn fit(&mut self, df: &DataFrame, y: Option<&[f64]>) -> PreplineResult<()> {
        Pipeline::fit(self, df, y).await.map(|_| ())
    }

    async fn transform(&self, df: DataFrame) -> PreplineResult<DataFrame> {
        Pipeline::transform(self, df).await
    }

    fn is_stateful(&self) -> bool {
        self.steps.iter().any(|(_, step)| step.is_stateful())
    }

    async fn fit_transform(
        &mut self,
        df: DataFrame,
        y: Option<&[f64]>,
    ) -> PreplineResult<DataFrame> {
        Pipeline::fit(self, &df, y).await
    }
}

/// Macro to simplify pipeline creation by automatically boxing transformers.
///
/// # Example
///
/// ```rust,no_run
/// use prepline::make_pipeline;
/// use prepline::transformers::scaling::RobustScaler;
///
/// let pipeline = make_pipeline!(false,
///     ("scale_age", RobustScaler::new("Age")),
/// );
/// ```
#[macro_export]
macro_rules! make_pipeline {
    ($verbose:expr, $(($name:expr, $transformer:expr)),+ $(,)?) => {
        {
            let steps: Vec<(String, $crate::pipeline::BoxedTransformer)> = vec![
                $(
                    ($name.to_string(), Box::new($transformer)),
                )+
            ];
            $crate::pipeline::Pipeline::new(steps, $verbose)
        }
    };
}
