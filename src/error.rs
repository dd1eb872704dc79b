//! Operational errors.
//!
//! Test failures (unmatched requests, unmet expectations) are
//! [`Failure`](crate::Failure)s; these are errors in using the library.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("Missing path parameter {name:?} for {path}")]
    MissingPathParameter { name: String, path: String },

    #[error("Path parameter {name:?} is not declared by endpoint {path}")]
    UndeclaredPathParameter { name: String, path: String },

    #[error("Endpoint {method} {path} responds with {expected}, not {actual}")]
    ReplyFormatMismatch {
        method: String,
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Endpoint {method} {path} does not take {field}")]
    UnexpectedField {
        method: String,
        path: String,
        field: &'static str,
    },
}

/// Failure while writing a response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reading reply stream failed: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Writing to response sink failed: {0}")]
    Sink(#[source] std::io::Error),
}
