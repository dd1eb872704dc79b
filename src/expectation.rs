//! Expectations: what to match, how to reply, and how often.

use crate::fingerprint::{non_empty, Fields, FingerprintBody, RequestFingerprint};
use crate::gate::ReleaseGate;
use crate::registry::ExpectationRegistry;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex as AsyncMutex;

/// The request an expectation matches.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    fingerprint: RequestFingerprint,
}

impl MockRequest {
    /// Request with a method and path and nothing else. It only matches
    /// requests with no unfiltered headers, query parameters or body.
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            fingerprint: RequestFingerprint::new(method, path),
        }
    }

    /// Expect a JSON body.
    pub fn with_json(mut self, body: Value) -> Self {
        self.fingerprint.body = Some(FingerprintBody::from_json(body));
        self
    }

    /// Expect a body given as bytes. The bytes go through the same decoding
    /// as inbound bodies, so a JSON object given here matches any equivalent
    /// encoding of it.
    pub fn with_body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.fingerprint.body = FingerprintBody::from_bytes(body.as_ref());
        self
    }

    /// Expect exactly these headers. Names are case-insensitive.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields: Fields = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
            .collect();
        self.fingerprint.headers = non_empty(fields);
        self
    }

    /// Expect exactly these query parameters.
    pub fn with_query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Fields = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.fingerprint.query_params = non_empty(fields);
        self
    }

    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    pub fn into_fingerprint(self) -> RequestFingerprint {
        self.fingerprint
    }
}

/// How many times an expectation may or must be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Required exactly this many times
    Exactly(usize),
    /// Optional, up to this many times
    AtMost(usize),
    /// Optional, unbounded
    Any,
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::Exactly(1)
    }
}

impl Cardinality {
    /// Largest number of matches this expectation will accept.
    pub fn upper_bound(&self) -> Option<usize> {
        match self {
            Cardinality::Exactly(n) | Cardinality::AtMost(n) => Some(*n),
            Cardinality::Any => None,
        }
    }

    pub fn is_optional(&self) -> bool {
        !matches!(self, Cardinality::Exactly(_))
    }

    pub fn has_budget(&self, calls: usize) -> bool {
        self.upper_bound().map_or(true, |max| calls < max)
    }

    pub fn is_satisfied_by(&self, calls: usize) -> bool {
        match self {
            Cardinality::Exactly(n) => calls == *n,
            Cardinality::AtMost(n) => calls <= *n,
            Cardinality::Any => true,
        }
    }

    /// Set the count, keeping optionality.
    pub(crate) fn with_count(self, n: usize) -> Self {
        match self {
            Cardinality::Exactly(_) => Cardinality::Exactly(n),
            Cardinality::AtMost(_) | Cardinality::Any => Cardinality::AtMost(n),
        }
    }

    /// Make optional, keeping any upper bound.
    pub(crate) fn optional(self) -> Self {
        match self {
            Cardinality::Exactly(n) => Cardinality::AtMost(n),
            other => other,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Exactly(n) => write!(f, "exactly {} call(s)", n),
            Cardinality::AtMost(n) => write!(f, "at most {} call(s)", n),
            Cardinality::Any => f.write_str("any number of calls"),
        }
    }
}

/// A value that can be written as a JSON reply.
pub trait JsonBody: Send + Sync {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send + Sync> JsonBody for T {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Byte source for streaming replies.
///
/// The source is drained by the first dispatch; later dispatches of the same
/// expectation find it empty.
pub type StreamSource = Arc<AsyncMutex<Box<dyn AsyncRead + Send + Unpin>>>;

/// What to send back when an expectation matches.
#[derive(Clone)]
pub enum Reply {
    /// Status code only
    Empty { status: u16 },
    /// Status code and a JSON-encoded value
    Json { status: u16, body: Arc<dyn JsonBody> },
    /// Status code and a literal body written verbatim
    Text { status: u16, body: Bytes },
    /// Status code and the contents of a byte stream
    Stream { status: u16, source: StreamSource },
}

impl Reply {
    pub fn empty(status: u16) -> Self {
        Reply::Empty { status }
    }

    pub fn json<T: Serialize + Send + Sync + 'static>(status: u16, body: T) -> Self {
        Reply::Json {
            status,
            body: Arc::new(body),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Reply::Text {
            status,
            body: Bytes::from(body.into()),
        }
    }

    /// Literal body from bytes, written verbatim like [`Reply::text`].
    pub fn bytes(status: u16, body: impl Into<Bytes>) -> Self {
        Reply::Text {
            status,
            body: body.into(),
        }
    }

    pub fn stream(status: u16, source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Reply::Stream {
            status,
            source: Arc::new(AsyncMutex::new(Box::new(source))),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Reply::Empty { status }
            | Reply::Json { status, .. }
            | Reply::Text { status, .. }
            | Reply::Stream { status, .. } => *status,
        }
    }

    /// Short name of the body format.
    pub fn format(&self) -> &'static str {
        match self {
            Reply::Empty { .. } => "none",
            Reply::Json { .. } => "json",
            Reply::Text { .. } => "string",
            Reply::Stream { .. } => "stream",
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("format", &self.format())
            .field("status", &self.status())
            .finish()
    }
}

/// One registered rule.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) id: usize,
    /// `None` for the default handler, which matches anything
    pub(crate) request: Option<RequestFingerprint>,
    pub(crate) reply: Reply,
    pub(crate) cardinality: Cardinality,
    pub(crate) calls: usize,
    /// Set once `times`, `once` or `twice` has been called
    pub(crate) explicit_count: bool,
    pub(crate) gate: Option<ReleaseGate>,
}

impl Expectation {
    pub(crate) fn new(id: usize, request: RequestFingerprint, reply: Reply) -> Self {
        Self {
            id,
            request: Some(request),
            reply,
            cardinality: Cardinality::default(),
            calls: 0,
            explicit_count: false,
            gate: None,
        }
    }

    pub(crate) fn fallback(id: usize, reply: Reply) -> Self {
        Self {
            id,
            request: None,
            reply,
            cardinality: Cardinality::Any,
            calls: 0,
            explicit_count: false,
            gate: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_fallback(&self) -> bool {
        self.request.is_none()
    }

    pub fn matches(&self, fingerprint: &RequestFingerprint) -> bool {
        match &self.request {
            Some(request) => request == fingerprint,
            None => true,
        }
    }

    pub fn has_budget(&self) -> bool {
        self.cardinality.has_budget(self.calls)
    }

    pub fn method(&self) -> &str {
        self.request.as_ref().map_or("*", |r| r.method.as_str())
    }

    pub fn path(&self) -> &str {
        self.request.as_ref().map_or("*", |r| r.path.as_str())
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// Handle for configuring an expectation after registration.
///
/// Configure before issuing traffic that is meant to hit the expectation.
#[derive(Clone)]
pub struct ExpectationHandle {
    registry: Arc<ExpectationRegistry>,
    id: usize,
}

impl ExpectationHandle {
    pub(crate) fn new(registry: Arc<ExpectationRegistry>, id: usize) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Expect exactly one call.
    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Expect exactly two calls.
    pub fn twice(self) -> Self {
        self.times(2)
    }

    /// Expect `n` calls. On an optional expectation this sets its upper
    /// bound instead.
    pub fn times(self, n: usize) -> Self {
        self.registry.configure(self.id, |e| {
            e.cardinality = e.cardinality.with_count(n);
            e.explicit_count = true;
        });
        self
    }

    /// Mark as optional. Without an explicit count there is no upper bound;
    /// after `times(n)` it may be called at most `n` times.
    pub fn maybe(self) -> Self {
        self.registry.configure(self.id, |e| {
            e.cardinality = if e.explicit_count {
                e.cardinality.optional()
            } else {
                Cardinality::Any
            };
        });
        self
    }

    /// Hold responses back until `gate` is released.
    pub fn release_gate(self, gate: ReleaseGate) -> Self {
        self.registry.configure(self.id, |e| e.gate = Some(gate));
        self
    }

    /// Number of requests matched so far.
    pub fn calls(&self) -> usize {
        self.registry.get(self.id).map_or(0, |e| e.calls)
    }

    pub fn cardinality(&self) -> Cardinality {
        self.registry
            .get(self.id)
            .map_or(Cardinality::default(), |e| e.cardinality)
    }
}

impl fmt::Debug for ExpectationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationHandle").field("id", &self.id).finish()
    }
}
