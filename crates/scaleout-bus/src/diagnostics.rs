//! Named diagnostic trace sinks.
//!
//! Verbose per-message tracing goes through a [`TraceSink`] obtained from the
//! host's [`DependencyResolver`](crate::host::DependencyResolver). Callers
//! check [`TraceSink::is_enabled`] before building a message, so formatting
//! batches costs nothing when tracing is off.

use std::fmt;
use std::sync::Arc;
use tracing::{trace, Level};

/// Target every trace sink emits under.
pub const TRACE_TARGET: &str = "scaleout::trace";

/// A named diagnostic channel backed by `tracing`.
#[derive(Debug, Clone)]
pub struct TraceSink {
    name: Arc<str>,
}

impl TraceSink {
    /// Create a sink with the given name.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// The sink's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether verbose events would be recorded by the current subscriber.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        tracing::enabled!(target: TRACE_TARGET, Level::TRACE)
    }

    /// Emit a verbose event.
    pub fn verbose(&self, message: fmt::Arguments<'_>) {
        trace!(target: TRACE_TARGET, sink = %self.name, "{}", message);
    }
}
