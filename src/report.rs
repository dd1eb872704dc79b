//! Test failures and the reporters they are delivered to.

use crate::expectation::Cardinality;
use crate::fingerprint::RequestFingerprint;
use parking_lot::Mutex;
use std::fmt;
use tracing::error;

/// Which part of a request a field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Header,
    QueryParam,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Header => f.write_str("header"),
            FieldKind::QueryParam => f.write_str("query parameter"),
        }
    }
}

/// A failure attributable to a request or an expectation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
    /// A header or query key kept more than one value after filtering.
    /// The request is still matched using the first value.
    #[error("multi-value {kind} {name:?} on {method} {path}: {values:?} (matched using the first value)")]
    MultiValueFieldDetected {
        kind: FieldKind,
        name: String,
        values: Vec<String>,
        method: String,
        path: String,
    },

    /// No expectation, and no default handler, accepted the request.
    #[error("unmatched request {fingerprint}{}", exhausted_note(.exhausted))]
    UnmatchedRequest {
        fingerprint: RequestFingerprint,
        /// Equal expectations that were skipped because their budget was spent
        exhausted: usize,
    },

    /// Writing the response body failed.
    #[error("failed to write {format} response for {method} {path}: {reason}")]
    ResponseEncodingFailed {
        method: String,
        path: String,
        format: &'static str,
        reason: String,
    },

    /// A required expectation was not called the required number of times.
    #[error("unmet expectation #{id} {method} {path}: expected {cardinality}, got {actual} call(s)")]
    UnmetExpectation {
        id: usize,
        method: String,
        path: String,
        cardinality: Cardinality,
        actual: usize,
    },
}

fn exhausted_note(exhausted: &usize) -> String {
    match exhausted {
        0 => String::new(),
        n => format!(" ({} equal expectation(s) already used up)", n),
    }
}

/// Receives failures as they are detected.
///
/// Per-request failures are reported while the request is being served;
/// unmet expectations are reported once each by
/// [`MockServer::assert_expectations`](crate::MockServer::assert_expectations).
pub trait Reporter: Send + Sync {
    fn report(&self, failure: &Failure);
}

/// Reporter that keeps every failure for later inspection.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    failures: Mutex<Vec<Failure>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the failures reported so far.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    /// Remove and return the failures reported so far.
    pub fn take(&self) -> Vec<Failure> {
        std::mem::take(&mut *self.failures.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, failure: &Failure) {
        self.failures.lock().push(failure.clone());
    }
}

/// Reporter that logs failures and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, failure: &Failure) {
        error!(%failure, "Mock expectation failure");
    }
}
