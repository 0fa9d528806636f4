//! Teardown bookkeeping.
//!
//! Disposing the bus runs several independent steps. A step that fails is
//! recorded and the rest still run; the caller gets every failure back in a
//! [`DisposeReport`].

use thiserror::Error;
use tracing::error;

use scaleout_transport::TransportError;

use crate::metrics;

/// A teardown step that failed.
#[derive(Debug, Error)]
#[error("Failed to dispose {resource}: {source}")]
pub struct DisposeError {
    /// What was being released.
    pub resource: String,
    /// Why it failed.
    #[source]
    pub source: TransportError,
}

/// Outcome of disposing the bus.
#[derive(Debug, Default)]
pub struct DisposeReport {
    failures: Vec<DisposeError>,
}

impl DisposeReport {
    /// Check if every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Steps that failed, in teardown order.
    #[must_use]
    pub fn failures(&self) -> &[DisposeError] {
        &self.failures
    }

    /// Consume the report, returning the failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<DisposeError> {
        self.failures
    }
}

/// Collects teardown failures.
#[derive(Debug, Default)]
pub(crate) struct Disposer {
    failures: Vec<DisposeError>,
}

impl Disposer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of releasing `resource`.
    pub(crate) fn attempt(&mut self, resource: &str, result: Result<(), TransportError>) {
        if let Err(source) = result {
            self.fail(resource, source);
        }
    }

    /// Record a failure to release `resource`.
    pub(crate) fn fail(&mut self, resource: &str, source: TransportError) {
        error!(resource, error = %source, "Dispose step failed");
        metrics::record_dispose_error();
        self.failures.push(DisposeError {
            resource: resource.to_string(),
            source,
        });
    }

    pub(crate) fn finish(self) -> DisposeReport {
        DisposeReport {
            failures: self.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_report() {
        let mut disposer = Disposer::new();
        disposer.attempt("publisher", Ok(()));
        let report = disposer.finish();
        assert!(report.is_clean());
        assert!(report.failures().is_empty());
    }

    #[test]
    fn test_failures_collected_in_order() {
        let mut disposer = Disposer::new();
        disposer.attempt("publisher", Err(TransportError::Task("panicked".into())));
        disposer.attempt("tcp://127.0.0.1:6001", Ok(()));
        disposer.fail("context", TransportError::SocketsStillOpen(2));

        let report = disposer.finish();
        assert!(!report.is_clean());

        let failures = report.into_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].resource, "publisher");
        assert!(matches!(failures[1].source, TransportError::SocketsStillOpen(2)));
        assert_eq!(
            failures[1].to_string(),
            "Failed to dispose context: Context terminated with 2 socket(s) still open"
        );
    }
}
