//! Fluent interface for constructing [`CombinedProgress`] instances.
//!
//! [`CombinedProgress::new`] and [`CombinedProgress::with_handler`] cover the common
//! cases. The builder additionally names the aggregator's output source and attaches an
//! initial set of sources in one step.

use std::sync::Arc;

use compact_str::CompactString;

use crate::{
    combined::CombinedProgress,
    error::ProgressError,
    progress::{Handler, Progress},
    value::ProgressValue,
};

/// A builder for [`CombinedProgress`].
pub struct CombinedProgressBuilder<T: ProgressValue> {
    name: CompactString,
    handler: Option<Handler<T>>,
    sources: Vec<Progress<T>>,
}

impl<T: ProgressValue> Default for CombinedProgressBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ProgressValue> CombinedProgressBuilder<T> {
    /// Starts a builder whose output source is named `combined`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: CompactString::const_new("combined"),
            handler: None,
            sources: Vec::new(),
        }
    }

    /// Sets the name of the aggregator's output source.
    #[must_use]
    pub fn name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets a handler invoked with every combined value.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Queues a source to attach when the aggregator is built.
    #[must_use]
    pub fn source(mut self, source: &impl AsRef<Progress<T>>) -> Self {
        self.sources.push(source.as_ref().clone());
        self
    }

    /// Queues several sources to attach when the aggregator is built.
    #[must_use]
    pub fn sources<'a, I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = &'a Progress<T>>,
    {
        self.sources.extend(sources.into_iter().cloned());
        self
    }

    /// Consumes the builder and attaches the queued sources in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::RangeExceeded`] if the queued sources do not fit the
    /// exact range of `T`.
    pub fn build(self) -> Result<CombinedProgress<T>, ProgressError> {
        let output = Progress::from_parts(self.name, self.handler);
        let combined = CombinedProgress::from_output(output);
        for source in &self.sources {
            combined.attach(source)?;
        }
        Ok(combined)
    }
}
