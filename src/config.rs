//! File configuration for the mock server.
//!
//! Describes filtered fields, expectations and an optional default response
//! in YAML, and registers them on a running [`MockServer`].

use crate::expectation::{ExpectationHandle, MockRequest, Reply};
use crate::server::MockServer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

/// Main configuration for a mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Expectations in registration order
    #[serde(default)]
    pub expectations: Vec<ExpectationDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Response for requests no expectation takes
    #[serde(default)]
    pub default_response: Option<ResponseDefinition>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, expectation) in self.expectations.iter().enumerate() {
            expectation
                .validate()
                .map_err(|e| anyhow::anyhow!("Expectation {}: {}", i, e))?;
        }
        if let Some(default) = &self.default_response {
            default
                .validate()
                .map_err(|e| anyhow::anyhow!("Default response: {}", e))?;
        }
        Ok(())
    }

    /// Register every expectation, then the default response, on `server`.
    pub fn apply(&self, server: &MockServer) -> anyhow::Result<Vec<ExpectationHandle>> {
        server.set_filtered_headers(&self.settings.filtered_headers);
        server.set_filtered_query_params(&self.settings.filtered_query_params);

        let mut handles = Vec::with_capacity(self.expectations.len() + 1);
        for expectation in &self.expectations {
            let mut handle =
                server.with_request(expectation.request.to_mock_request(), expectation.response.to_reply()?);
            if let Some(times) = expectation.times {
                handle = handle.times(times);
            }
            if expectation.optional {
                handle = handle.maybe();
            }
            handles.push(handle);
        }

        if let Some(default) = &self.default_response {
            handles.push(server.default_handler(default.to_reply()?));
        }

        Ok(handles)
    }
}

/// A single expectation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationDefinition {
    /// Optional name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Request to match
    pub request: RequestDefinition,

    /// Response to return
    pub response: ResponseDefinition,

    /// Required number of calls (defaults to one)
    #[serde(default)]
    pub times: Option<usize>,

    /// Whether the expectation may go uncalled
    #[serde(default)]
    pub optional: bool,
}

impl ExpectationDefinition {
    /// Validate the expectation definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }
}

/// Request matching configuration. Everything listed must be present and
/// nothing else may be (after filtering).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    pub method: String,

    pub path: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub query: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<RequestBody>,
}

impl RequestDefinition {
    /// Validate the request definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.method.trim().is_empty() {
            anyhow::bail!("Request method cannot be empty");
        }
        if !self.path.starts_with('/') {
            anyhow::bail!("Request path must start with '/': {:?}", self.path);
        }
        if self.path.contains('?') {
            anyhow::bail!("Request path must not contain a query string: {:?}", self.path);
        }
        Ok(())
    }

    pub fn to_mock_request(&self) -> MockRequest {
        let request = MockRequest::new(&self.method, self.path.clone())
            .with_headers(self.headers.clone())
            .with_query_params(self.query.clone());

        match &self.body {
            Some(RequestBody::Json { content }) => request.with_json(content.clone()),
            Some(RequestBody::Text { content }) => request.with_body(content),
            None => request,
        }
    }
}

/// Expected request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    /// JSON body
    Json { content: serde_json::Value },
    /// Body bytes given as text
    Text { content: String },
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        if let Some(ResponseBody::Base64 { content }) = &self.body {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(content)
                .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))?;
        }
        Ok(())
    }

    pub fn to_reply(&self) -> anyhow::Result<Reply> {
        let reply = match &self.body {
            None => Reply::empty(self.status),
            Some(ResponseBody::Json { content }) => Reply::json(self.status, content.clone()),
            Some(body) => Reply::bytes(self.status, body.to_bytes()?),
        };
        Ok(reply)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Address to listen on when run from the command line
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    /// Header names left out of request matching
    #[serde(default)]
    pub filtered_headers: Vec<String>,

    /// Query keys left out of request matching
    #[serde(default)]
    pub filtered_query_params: Vec<String>,
}
