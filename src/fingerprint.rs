//! Canonical request fingerprints.
//!
//! A fingerprint is the filtered, decoded view of a request. Expectations
//! hold one as their match criterion and compare it to inbound requests
//! with plain equality.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Single-valued header or query fields keyed by name.
pub type Fields = BTreeMap<String, String>;

/// Canonical request body.
#[derive(Debug, Clone, PartialEq)]
pub enum FingerprintBody {
    /// Bytes that did not decode as a JSON object
    Raw(Vec<u8>),
    /// Body that decoded as a JSON object
    Json(Map<String, Value>),
}

impl FingerprintBody {
    /// Decode body bytes.
    ///
    /// Empty input yields no body. Input that parses as a JSON object becomes
    /// [`FingerprintBody::Json`]; anything else (arrays, scalars, malformed
    /// JSON, binary) is kept verbatim as [`FingerprintBody::Raw`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        match serde_json::from_slice::<Map<String, Value>>(bytes) {
            Ok(map) => Some(Self::Json(map)),
            Err(_) => Some(Self::Raw(bytes.to_vec())),
        }
    }

    /// Canonical body for a JSON value.
    ///
    /// Objects become [`FingerprintBody::Json`]. Other values are only ever
    /// seen on the wire as raw bytes, so they are stored as their compact
    /// serialization.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Json(map),
            other => Self::Raw(other.to_string().into_bytes()),
        }
    }
}

impl fmt::Display for FingerprintBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintBody::Raw(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            FingerprintBody::Json(map) => match serde_json::to_string(map) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{:?}", map),
            },
        }
    }
}

/// Comparable representation of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFingerprint {
    /// Uppercase HTTP method
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Unfiltered headers, `None` when there are none
    pub headers: Option<Fields>,
    /// Unfiltered query parameters, `None` when there are none
    pub query_params: Option<Fields>,
    /// Decoded body, `None` when absent or empty
    pub body: Option<FingerprintBody>,
}

impl RequestFingerprint {
    /// Fingerprint with only a method and path.
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_uppercase(),
            path: path.into(),
            headers: None,
            query_params: None,
            body: None,
        }
    }
}

/// Collapse an empty field map to `None` so that "no fields" has exactly one
/// representation.
pub(crate) fn non_empty(fields: Fields) -> Option<Fields> {
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(headers) = &self.headers {
            write!(f, " headers={:?}", headers)?;
        }
        if let Some(query) = &self.query_params {
            write!(f, " query={:?}", query)?;
        }
        if let Some(body) = &self.body {
            write!(f, " body={}", body)?;
        }
        Ok(())
    }
}
