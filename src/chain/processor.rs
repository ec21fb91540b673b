//! # Data processor abstraction and function-backed implementation.
//!
//! This module defines the [`DataProcessor`] trait (async, named stage of a chain)
//! and a convenient closure-backed implementation [`ProcessorFn`].
//! The common handle type is [`ProcessorRef`], an `Arc<dyn DataProcessor<M>>`
//! suitable for sharing between a chain snapshot and its readers.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessError;

/// Shared handle to a processor.
pub type ProcessorRef<M> = Arc<dyn DataProcessor<M>>;

/// # One named stage of a processor chain.
///
/// The dispatch worker calls [`on_data`](DataProcessor::on_data) for every value
/// that reaches this stage, strictly one value at a time per hub.
///
/// - `Ok(Some(v))` forwards `v` (possibly transformed) to the next stage;
/// - `Ok(None)` consumes the value, later stages are skipped;
/// - `Err(_)` drops the value and counts as a processing fault.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use streamhub::{DataProcessor, ProcessError};
///
/// struct Evens;
///
/// #[async_trait]
/// impl DataProcessor<u32> for Evens {
///     fn name(&self) -> &str { "evens" }
///
///     async fn on_data(&self, data: u32) -> Result<Option<u32>, ProcessError> {
///         Ok((data % 2 == 0).then_some(data))
///     }
/// }
/// ```
#[async_trait]
pub trait DataProcessor<M>: Send + Sync + 'static {
    /// Returns the stage name; unique within one chain.
    fn name(&self) -> &str;

    /// Handles one value.
    async fn on_data(&self, data: M) -> Result<Option<M>, ProcessError>;
}

/// Closure-backed processor.
///
/// Wraps `F: Fn(M) -> Fut`, producing a fresh future per value. If the stage
/// needs state, capture an `Arc<...>` explicitly inside the closure.
///
/// ## Example
/// ```rust
/// use streamhub::{ProcessorFn, ProcessorRef, ProcessError};
///
/// let double: ProcessorRef<u32> = ProcessorFn::arc("double", |v: u32| async move {
///     Ok::<_, ProcessError>(Some(v * 2))
/// });
/// assert_eq!(double.name(), "double");
/// ```
#[derive(Debug)]
pub struct ProcessorFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ProcessorFn<F> {
    /// Creates a new closure-backed processor.
    ///
    /// Prefer [`ProcessorFn::arc`] when you immediately need a [`ProcessorRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the processor and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<M, F, Fut> DataProcessor<M> for ProcessorFn<F>
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<M>, ProcessError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_data(&self, data: M) -> Result<Option<M>, ProcessError> {
        (self.f)(data).await
    }
}
