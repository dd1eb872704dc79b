//! Mock HTTP server.
//!
//! Wires the normalizer, registry and dispatcher to a hyper listener and
//! exposes the registration and verification API used by tests.

use crate::dispatch::{dispatch, BufferedSink};
use crate::error::Error;
use crate::expectation::{ExpectationHandle, MockRequest, Reply};
use crate::fingerprint::RequestFingerprint;
use crate::normalize::{parse_query_string, RawRequest, RequestNormalizer};
use crate::registry::{ExpectationRegistry, Selection};
use crate::report::{Failure, Reporter};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// State shared between the server handle and connection tasks.
struct Shared {
    normalizer: RwLock<RequestNormalizer>,
    registry: Arc<ExpectationRegistry>,
    reporter: Option<Arc<dyn Reporter>>,
    /// Per-request failures kept for verification when no reporter is set
    failures: Mutex<Vec<Failure>>,
    /// Every request fingerprint, kept only when recording is on
    received: Mutex<Vec<RequestFingerprint>>,
    record_requests: bool,
}

impl Shared {
    fn fail(&self, failure: Failure) {
        match &self.reporter {
            Some(reporter) => reporter.report(&failure),
            None => {
                error!(%failure, "Mock request failure");
                self.failures.lock().push(failure);
            }
        }
    }
}

/// Builder for [`MockServer`].
pub struct MockServerBuilder {
    listen: SocketAddr,
    normalizer: RequestNormalizer,
    reporter: Option<Arc<dyn Reporter>>,
    record_requests: bool,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            normalizer: RequestNormalizer::new(),
            reporter: None,
            record_requests: true,
        }
    }
}

impl MockServerBuilder {
    /// Address to listen on. Defaults to an ephemeral port on localhost.
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    pub fn filtered_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.normalizer.set_filtered_headers(headers);
        self
    }

    pub fn filtered_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.normalizer.set_filtered_query_params(params);
        self
    }

    /// Deliver failures to `reporter` instead of panicking at verification.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Keep a fingerprint of every request for
    /// [`received_requests`](MockServer::received_requests). On by default.
    /// The list is never trimmed, so long-running servers should turn it off.
    pub fn record_requests(mut self, record: bool) -> Self {
        self.record_requests = record;
        self
    }

    /// Bind the listener and start serving.
    pub async fn start(self) -> Result<MockServer, Error> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|e| Error::Bind(self.listen, e))?;
        let address = listener
            .local_addr()
            .map_err(|e| Error::Bind(self.listen, e))?;

        let shared = Arc::new(Shared {
            normalizer: RwLock::new(self.normalizer),
            registry: Arc::new(ExpectationRegistry::new()),
            reporter: self.reporter,
            failures: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            record_requests: self.record_requests,
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(serve(listener, Arc::clone(&shared), shutdown_tx.clone()));

        info!(%address, "Mock server listening");

        Ok(MockServer {
            shared,
            address,
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }
}

async fn serve(listener: TcpListener, shared: Arc<Shared>, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let shared = Arc::clone(&shared);
                        let mut conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let shared = Arc::clone(&shared);
                                async move { handle_request(req, shared).await }
                            });
                            let conn = http1::Builder::new().serve_connection(io, service);
                            tokio::pin!(conn);
                            tokio::select! {
                                result = conn.as_mut() => {
                                    if let Err(e) = result {
                                        debug!("Mock server connection error: {}", e);
                                    }
                                }
                                _ = conn_shutdown.recv() => {
                                    conn.as_mut().graceful_shutdown();
                                    if let Err(e) = conn.await {
                                        debug!("Mock server connection error during shutdown: {}", e);
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!("Mock server accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Mock server shutting down");
                break;
            }
        }
    }
}

async fn read_request(req: Request<Incoming>) -> Result<RawRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| **name != HOST)
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Ok(RawRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        headers,
        query: parts.uri.query().map(parse_query_string).unwrap_or_default(),
        body,
    })
}

async fn handle_request(
    req: Request<Incoming>,
    shared: Arc<Shared>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let raw = match read_request(req).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Ok(error_response(StatusCode::BAD_REQUEST, "unreadable_body", &e.to_string()));
        }
    };

    let normalized = shared.normalizer.read().normalize(&raw);
    for violation in normalized.violations {
        warn!(%violation, "Multi-value field in request");
        shared.fail(violation);
    }
    let fingerprint = normalized.fingerprint;
    if shared.record_requests {
        shared.received.lock().push(fingerprint.clone());
    }

    match shared.registry.select(&fingerprint) {
        Selection::Matched(matched) => {
            debug!(
                expectation = matched.id,
                method = %fingerprint.method,
                path = %fingerprint.path,
                calls = matched.calls,
                fallback = matched.fallback,
                "Request matched expectation"
            );

            let mut sink = BufferedSink::new();
            match dispatch(&matched.reply, matched.gate.as_ref(), &mut sink).await {
                Ok(()) => Ok(sink.into_response()),
                Err(e) => {
                    shared.fail(Failure::ResponseEncodingFailed {
                        method: fingerprint.method.clone(),
                        path: fingerprint.path.clone(),
                        format: matched.reply.format(),
                        reason: e.to_string(),
                    });
                    Ok(error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "response_encoding_failed",
                        &e.to_string(),
                    ))
                }
            }
        }
        Selection::NoMatch { exhausted } => {
            warn!(
                method = %fingerprint.method,
                path = %fingerprint.path,
                exhausted,
                "No matching expectation"
            );
            let failure = Failure::UnmatchedRequest {
                fingerprint,
                exhausted,
            };
            let message = failure.to_string();
            shared.fail(failure);
            Ok(error_response(StatusCode::NOT_FOUND, "unmatched_request", &message))
        }
    }
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": error, "message": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

/// A running mock HTTP server.
///
/// Expectations are verified by [`close`](MockServer::close), or on drop if
/// the server was never closed. Without a [`Reporter`], failed verification
/// panics with every failure seen.
pub struct MockServer {
    shared: Arc<Shared>,
    address: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Start a server on an ephemeral localhost port.
    pub async fn start() -> Result<Self, Error> {
        Self::builder().start().await
    }

    /// Replace the header names left out of request fingerprints.
    pub fn set_filtered_headers<I, S>(&self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shared.normalizer.write().set_filtered_headers(headers);
    }

    /// Replace the query keys left out of request fingerprints.
    pub fn set_filtered_query_params<I, S>(&self, params: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shared.normalizer.write().set_filtered_query_params(params);
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Base URL, e.g. `http://127.0.0.1:49152`.
    pub fn uri(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Absolute URL for `path_and_query`.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.uri(), path_and_query)
    }

    /// Expect `request` and answer with `reply`.
    pub fn with_request(&self, request: MockRequest, reply: Reply) -> ExpectationHandle {
        self.shared
            .registry
            .register(request.into_fingerprint(), reply)
    }

    /// Expect `request` and answer with a status code and no body.
    pub fn with_no_response_body(&self, request: MockRequest, status: u16) -> ExpectationHandle {
        self.with_request(request, Reply::empty(status))
    }

    /// Expect `request` and answer with `reply` encoded as JSON.
    pub fn with_json_reply<T>(&self, request: MockRequest, status: u16, reply: T) -> ExpectationHandle
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.with_request(request, Reply::json(status, reply))
    }

    /// Expect `request` and answer with `reply` written verbatim.
    pub fn with_txt_reply(
        &self,
        request: MockRequest,
        status: u16,
        reply: impl Into<String>,
    ) -> ExpectationHandle {
        self.with_request(request, Reply::text(status, reply))
    }

    /// Expect `request` and answer with everything `reply` yields.
    pub fn with_streaming_reply(
        &self,
        request: MockRequest,
        status: u16,
        reply: impl AsyncRead + Send + Unpin + 'static,
    ) -> ExpectationHandle {
        self.with_request(request, Reply::stream(status, reply))
    }

    /// Answer requests that no other expectation has budget for.
    /// Never required to be called.
    pub fn default_handler(&self, reply: Reply) -> ExpectationHandle {
        self.shared.registry.register_fallback(reply)
    }

    /// Fingerprints of every request received, in arrival order. Empty when
    /// recording was turned off with [`MockServerBuilder::record_requests`].
    pub fn received_requests(&self) -> Vec<RequestFingerprint> {
        self.shared.received.lock().clone()
    }

    /// Unmet expectations plus any per-request failures that were not
    /// handed to a reporter.
    pub fn verify(&self) -> Vec<Failure> {
        let mut failures = self.shared.failures.lock().clone();
        failures.extend(self.shared.registry.assert_all());
        failures
    }

    /// Check every expectation against its cardinality.
    ///
    /// With a reporter, each unmet expectation is reported to it. Without
    /// one, this panics if [`verify`](MockServer::verify) finds anything.
    pub fn assert_expectations(&self) {
        match &self.shared.reporter {
            Some(reporter) => {
                for failure in self.shared.registry.assert_all() {
                    reporter.report(&failure);
                }
            }
            None => {
                let failures = self.verify();
                if !failures.is_empty() {
                    let lines: Vec<String> = failures.iter().map(|f| format!("  - {}", f)).collect();
                    panic!(
                        "mock server at {} recorded {} failure(s):\n{}",
                        self.address,
                        failures.len(),
                        lines.join("\n")
                    );
                }
            }
        }
    }

    /// Stop accepting traffic and assert expectations.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown();
        self.assert_expectations();
    }

    fn shutdown(&self) {
        // No receivers means the listener is already gone.
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shutdown();
            return;
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RecordingReporter;

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let server = MockServer::start().await.unwrap();
        assert_ne!(server.address().port(), 0);
        assert!(server.uri().starts_with("http://127.0.0.1:"));
        assert_eq!(server.url("/x?y=1"), format!("{}/x?y=1", server.uri()));
    }

    #[tokio::test]
    async fn test_verify_lists_unmet() {
        let reporter = Arc::new(RecordingReporter::new());
        let server = MockServer::builder()
            .reporter(reporter.clone())
            .start()
            .await
            .unwrap();

        server.with_no_response_body(MockRequest::new("GET", "/never"), 200);
        server.with_no_response_body(MockRequest::new("GET", "/optional"), 200).maybe();

        assert_eq!(server.verify().len(), 1);
        server.close();
        assert_eq!(reporter.failures().len(), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "unmet expectation")]
    async fn test_close_without_reporter_panics() {
        let server = MockServer::start().await.unwrap();
        server.with_no_response_body(MockRequest::new("GET", "/never"), 200);
        server.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = MockServer::start().await.unwrap();
        server.close();
        server.close();
    }
}
