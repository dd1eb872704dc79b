//! Request normalization.
//!
//! Turns a raw request (multimaps, body bytes) into a [`RequestFingerprint`]
//! by dropping filtered fields, collapsing values and decoding the body.

use crate::fingerprint::{non_empty, Fields, FingerprintBody, RequestFingerprint};
use crate::report::{Failure, FieldKind};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};

/// A request as delivered by the transport.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    /// Header multimap in arrival order
    pub headers: Vec<(String, String)>,
    /// Query multimap in arrival order
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append the pairs of an encoded query string.
    pub fn query_string(mut self, query: &str) -> Self {
        self.query.extend(parse_query_string(query));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Fingerprint plus the field violations seen while building it.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub fingerprint: RequestFingerprint,
    /// One [`Failure::MultiValueFieldDetected`] per repeated field
    pub violations: Vec<Failure>,
}

/// Converts raw requests to fingerprints.
///
/// Header names are compared case-insensitively and stored lowercase.
/// Query keys are compared exactly.
#[derive(Debug, Clone, Default)]
pub struct RequestNormalizer {
    filtered_headers: HashSet<String>,
    filtered_params: HashSet<String>,
}

impl RequestNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of header names left out of fingerprints.
    pub fn set_filtered_headers<I, S>(&mut self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filtered_headers = headers
            .into_iter()
            .map(|h| h.as_ref().to_lowercase())
            .collect();
    }

    /// Replace the set of query keys left out of fingerprints.
    pub fn set_filtered_query_params<I, S>(&mut self, params: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filtered_params = params.into_iter().map(|p| p.as_ref().to_string()).collect();
    }

    pub fn normalize(&self, raw: &RawRequest) -> Normalized {
        let method = raw.method.to_uppercase();
        let mut violations = Vec::new();

        let headers = collapse(
            raw.headers
                .iter()
                .map(|(name, value)| (name.to_lowercase(), value.as_str()))
                .filter(|(name, _)| !self.filtered_headers.contains(name)),
            FieldKind::Header,
            &method,
            &raw.path,
            &mut violations,
        );

        let query_params = collapse(
            raw.query
                .iter()
                .filter(|(key, _)| !self.filtered_params.contains(key))
                .map(|(key, value)| (key.clone(), value.as_str())),
            FieldKind::QueryParam,
            &method,
            &raw.path,
            &mut violations,
        );

        Normalized {
            fingerprint: RequestFingerprint {
                method,
                path: raw.path.clone(),
                headers,
                query_params,
                body: FingerprintBody::from_bytes(&raw.body),
            },
            violations,
        }
    }
}

fn collapse<'a>(
    entries: impl Iterator<Item = (String, &'a str)>,
    kind: FieldKind,
    method: &str,
    path: &str,
    violations: &mut Vec<Failure>,
) -> Option<Fields> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in entries {
        grouped.entry(name).or_default().push(value.to_string());
    }

    let mut fields = Fields::new();
    for (name, mut values) in grouped {
        if values.len() > 1 {
            violations.push(Failure::MultiValueFieldDetected {
                kind,
                name: name.clone(),
                values: values.clone(),
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        fields.insert(name, values.swap_remove(0));
    }

    non_empty(fields)
}

/// Parse a query string into key-value pairs, keeping repeats.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (form_decode(key), form_decode(value)),
            None => (form_decode(part), String::new()),
        })
        .collect()
}

fn form_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filtered_header_is_dropped() {
        let mut normalizer = RequestNormalizer::new();
        normalizer.set_filtered_headers(["User-Agent"]);

        let raw = RawRequest::new("get", "/widgets")
            .header("user-agent", "reqwest")
            .header("X-Trace", "abc");
        let normalized = normalizer.normalize(&raw);

        let headers = normalized.fingerprint.headers.unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-trace"), Some(&"abc".to_string()));
        assert_eq!(normalized.fingerprint.method, "GET");
        assert!(normalized.violations.is_empty());
    }

    #[test]
    fn test_all_filtered_yields_none() {
        let mut normalizer = RequestNormalizer::new();
        normalizer.set_filtered_headers(["accept"]);
        normalizer.set_filtered_query_params(["ts"]);

        let raw = RawRequest::new("GET", "/")
            .header("Accept", "*/*")
            .query_string("ts=123");
        let fp = normalizer.normalize(&raw).fingerprint;

        assert_eq!(fp.headers, None);
        assert_eq!(fp.query_params, None);
        assert_eq!(fp, RequestFingerprint::new("GET", "/"));
    }

    #[test]
    fn test_multi_value_query_reports_and_keeps_first() {
        let normalizer = RequestNormalizer::new();
        let raw = RawRequest::new("GET", "/search").query_string("tag=a&tag=b&page=1");
        let normalized = normalizer.normalize(&raw);

        let query = normalized.fingerprint.query_params.unwrap();
        assert_eq!(query.get("tag"), Some(&"a".to_string()));
        assert_eq!(query.get("page"), Some(&"1".to_string()));

        assert_eq!(normalized.violations.len(), 1);
        match &normalized.violations[0] {
            Failure::MultiValueFieldDetected { kind, name, values, .. } => {
                assert_eq!(*kind, FieldKind::QueryParam);
                assert_eq!(name, "tag");
                assert_eq!(values, &vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_multi_value_header_is_case_insensitive() {
        let normalizer = RequestNormalizer::new();
        let raw = RawRequest::new("GET", "/")
            .header("X-Tag", "one")
            .header("x-tag", "two");
        let normalized = normalizer.normalize(&raw);

        assert_eq!(normalized.violations.len(), 1);
        assert_eq!(
            normalized.fingerprint.headers.unwrap().get("x-tag"),
            Some(&"one".to_string())
        );
    }

    #[test]
    fn test_filtered_repeat_is_not_a_violation() {
        let mut normalizer = RequestNormalizer::new();
        normalizer.set_filtered_query_params(["tag"]);
        let raw = RawRequest::new("GET", "/").query_string("tag=a&tag=b");
        assert!(normalizer.normalize(&raw).violations.is_empty());
    }

    #[test]
    fn test_body_policy() {
        let normalizer = RequestNormalizer::new();

        let json_body = normalizer
            .normalize(&RawRequest::new("POST", "/").body(r#"{"a":1}"#))
            .fingerprint
            .body;
        assert_eq!(
            json_body,
            Some(FingerprintBody::Json(json!({"a": 1}).as_object().cloned().unwrap()))
        );

        let raw_body = normalizer
            .normalize(&RawRequest::new("POST", "/").body("not-json"))
            .fingerprint
            .body;
        assert_eq!(raw_body, Some(FingerprintBody::Raw(b"not-json".to_vec())));

        let empty = normalizer.normalize(&RawRequest::new("POST", "/")).fingerprint.body;
        assert_eq!(empty, None);
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux&flag");
        assert_eq!(
            params,
            vec![
                ("foo".to_string(), "bar".to_string()),
                ("baz".to_string(), "qux".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );

        let params = parse_query_string("name=John%20Doe&city=New+York");
        assert_eq!(params[0].1, "John Doe");
        assert_eq!(params[1].1, "New York");
    }
}
