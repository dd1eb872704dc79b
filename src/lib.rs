//! Mock HTTP API
//!
//! A programmable stand-in HTTP server for integration tests. Register
//! expectations, point the code under test at the server, and verify at
//! teardown that every required request was made.
//!
//! # Features
//!
//! - **Exact Matching**: Method, path, headers, query params and body, after
//!   filtering and normalization
//! - **Cardinality**: `once`, `twice`, `times(n)` and optional (`maybe`)
//!   expectations, consumed first-registered first
//! - **Replies**: Status only, JSON, verbatim text, or a byte stream
//! - **Release Gates**: Hold a response back until the test says so
//! - **Default Handler**: Absorb unexpected traffic without failing
//!
//! # Example
//!
//! ```no_run
//! use mock_http_api::{MockRequest, MockServer};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockServer::start().await?;
//! server.set_filtered_headers(["accept"]);
//!
//! server
//!     .with_json_reply(MockRequest::new("GET", "/widgets"), 200, json!({"count": 3}))
//!     .once();
//!
//! let body: serde_json::Value = reqwest::get(server.url("/widgets")).await?.json().await?;
//! assert_eq!(body["count"], 3);
//!
//! server.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod expectation;
pub mod fingerprint;
pub mod gate;
pub mod normalize;
pub mod registry;
pub mod report;
pub mod server;

pub use config::MockServerConfig;
pub use endpoint::Endpoint;
pub use error::Error;
pub use expectation::{Cardinality, ExpectationHandle, MockRequest, Reply};
pub use fingerprint::{FingerprintBody, RequestFingerprint};
pub use gate::ReleaseGate;
pub use report::{Failure, RecordingReporter, Reporter, TracingReporter};
pub use server::{MockServer, MockServerBuilder};
