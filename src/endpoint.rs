//! Endpoint descriptors.
//!
//! An [`Endpoint`] describes one operation of the API being mocked: where it
//! lives, what it takes, and what it returns. It turns path parameters into
//! concrete [`MockRequest`]s and checks registrations against the
//! descriptor, so typed helpers can be layered on top of [`MockServer`].

use crate::error::Error;
use crate::expectation::{ExpectationHandle, MockRequest, Reply};
use crate::server::MockServer;
use serde::{Deserialize, Serialize};

/// Format of the request body an endpoint takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    #[default]
    None,
    Json,
    String,
    Stream,
}

/// Format of the response an endpoint produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    None,
    Json,
    String,
    Stream,
}

impl ResponseFormat {
    fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::None => "none",
            ResponseFormat::Json => "json",
            ResponseFormat::String => "string",
            ResponseFormat::Stream => "stream",
        }
    }
}

/// An HTTP operation of the mocked API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// Path template, e.g. `/v1/users/{id}`
    pub path: String,

    pub method: String,

    #[serde(default)]
    pub body_format: BodyFormat,

    /// Name of the body type, for generated helpers
    #[serde(default)]
    pub body_type: Option<String>,

    /// Parameters substituted into `path`
    #[serde(default)]
    pub path_parameters: Vec<String>,

    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Name of the response type, for generated helpers
    #[serde(default)]
    pub response_type: Option<String>,

    /// Whether headers influence the operation
    #[serde(default)]
    pub headers: bool,

    /// Whether query parameters influence the operation
    #[serde(default)]
    pub query_params: bool,
}

impl Endpoint {
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path_parameters = PathTemplate::parse(&path).param_names();
        Self {
            path,
            method: method.as_ref().to_uppercase(),
            body_format: BodyFormat::None,
            body_type: None,
            path_parameters,
            response_format: ResponseFormat::None,
            response_type: None,
            headers: false,
            query_params: false,
        }
    }

    pub fn with_body_format(mut self, format: BodyFormat) -> Self {
        self.body_format = format;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_headers(mut self, headers: bool) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query_params(mut self, query_params: bool) -> Self {
        self.query_params = query_params;
        self
    }

    /// Check that the path template and the declared parameters agree.
    pub fn validate(&self) -> Result<(), Error> {
        let in_path = PathTemplate::parse(&self.path).param_names();
        for name in &in_path {
            if !self.path_parameters.contains(name) {
                return Err(Error::UndeclaredPathParameter {
                    name: name.clone(),
                    path: self.path.clone(),
                });
            }
        }
        for name in &self.path_parameters {
            if !in_path.contains(name) {
                return Err(Error::MissingPathParameter {
                    name: name.clone(),
                    path: self.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Concrete path with every `{name}` replaced.
    pub fn path_for(&self, params: &[(&str, &str)]) -> Result<String, Error> {
        for (name, _) in params {
            if !self.path_parameters.iter().any(|p| p.as_str() == *name) {
                return Err(Error::UndeclaredPathParameter {
                    name: name.to_string(),
                    path: self.path.clone(),
                });
            }
        }

        PathTemplate::parse(&self.path)
            .render(params)
            .map_err(|name| Error::MissingPathParameter {
                name,
                path: self.path.clone(),
            })
    }

    /// Mock request for this endpoint with its path parameters filled in.
    pub fn request(&self, params: &[(&str, &str)]) -> Result<MockRequest, Error> {
        Ok(MockRequest::new(&self.method, self.path_for(params)?))
    }

    /// Register an expectation after checking `request` and `reply` against
    /// the descriptor.
    pub fn expect(
        &self,
        server: &MockServer,
        request: MockRequest,
        reply: Reply,
    ) -> Result<ExpectationHandle, Error> {
        let fingerprint = request.fingerprint();
        if fingerprint.headers.is_some() && !self.headers {
            return Err(self.unexpected("headers"));
        }
        if fingerprint.query_params.is_some() && !self.query_params {
            return Err(self.unexpected("query parameters"));
        }
        if fingerprint.body.is_some() && self.body_format == BodyFormat::None {
            return Err(self.unexpected("a request body"));
        }

        let expected = self.response_format.as_str();
        if reply.format() != expected {
            return Err(Error::ReplyFormatMismatch {
                method: self.method.clone(),
                path: self.path.clone(),
                expected,
                actual: reply.format(),
            });
        }

        Ok(server.with_request(request, reply))
    }

    fn unexpected(&self, field: &'static str) -> Error {
        Error::UnexpectedField {
            method: self.method.clone(),
            path: self.path.clone(),
            field,
        }
    }
}

struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_param = false;

        for ch in template.chars() {
            if ch == '{' && !in_param {
                if !current.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut current)));
                }
                in_param = true;
            } else if ch == '}' && in_param {
                segments.push(TemplateSegment::Param(std::mem::take(&mut current)));
                in_param = false;
            } else {
                current.push(ch);
            }
        }

        // An unterminated brace is literal text
        if in_param {
            current.insert(0, '{');
        }
        if !current.is_empty() {
            segments.push(TemplateSegment::Literal(current));
        }

        Self { segments }
    }

    fn param_names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                TemplateSegment::Param(name) => Some(name.clone()),
                TemplateSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Render with `params`, or return the first missing name.
    fn render(&self, params: &[(&str, &str)]) -> Result<String, String> {
        let mut path = String::new();
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(lit) => path.push_str(lit),
                TemplateSegment::Param(name) => {
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == name.as_str())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| name.clone())?;
                    path.push_str(&urlencoding::encode(value));
                }
            }
        }
        Ok(path)
    }
}
