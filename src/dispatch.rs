//! Response dispatch.
//!
//! Writes a matched expectation's [`Reply`] to a [`ResponseSink`], waiting on
//! the expectation's release gate before anything is written.

use crate::error::DispatchError;
use crate::expectation::Reply;
use crate::gate::ReleaseGate;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::io;
use tokio::io::AsyncReadExt;

const STREAM_CHUNK: usize = 8 * 1024;

/// Where a response is written.
#[async_trait]
pub trait ResponseSink: Send {
    /// Set a response header. Only called before `write_status`.
    async fn write_header(&mut self, _name: &str, _value: &str) -> io::Result<()> {
        Ok(())
    }

    async fn write_status(&mut self, status: u16) -> io::Result<()>;

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Sink that buffers the whole response for the HTTP transport.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: Option<u16>,
    content_type: Option<String>,
    body: BytesMut,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self
            .status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK);

        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        if let Some(value) = self
            .content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}

#[async_trait]
impl ResponseSink for BufferedSink {
    async fn write_header(&mut self, name: &str, value: &str) -> io::Result<()> {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.to_string());
        }
        Ok(())
    }

    async fn write_status(&mut self, status: u16) -> io::Result<()> {
        self.status = Some(status);
        Ok(())
    }

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

/// Write `reply` to `sink`, first waiting for `gate` if there is one.
pub async fn dispatch<S>(
    reply: &Reply,
    gate: Option<&ReleaseGate>,
    sink: &mut S,
) -> Result<(), DispatchError>
where
    S: ResponseSink + ?Sized,
{
    if let Some(gate) = gate {
        gate.wait().await;
    }

    match reply {
        Reply::Empty { status } => {
            sink.write_status(*status).await.map_err(DispatchError::Sink)?;
        }
        Reply::Json { status, body } => {
            let encoded = body.to_json()?;
            sink.write_header("content-type", "application/json")
                .await
                .map_err(DispatchError::Sink)?;
            sink.write_status(*status).await.map_err(DispatchError::Sink)?;
            // A null reply carries no body.
            if encoded != b"null" {
                sink.write_body(&encoded).await.map_err(DispatchError::Sink)?;
            }
        }
        Reply::Text { status, body } => {
            sink.write_status(*status).await.map_err(DispatchError::Sink)?;
            sink.write_body(body).await.map_err(DispatchError::Sink)?;
        }
        Reply::Stream { status, source } => {
            sink.write_status(*status).await.map_err(DispatchError::Sink)?;
            let mut source = source.lock().await;
            let mut buf = vec![0u8; STREAM_CHUNK];
            loop {
                let n = source.read(&mut buf).await.map_err(DispatchError::Stream)?;
                if n == 0 {
                    break;
                }
                sink.write_body(&buf[..n]).await.map_err(DispatchError::Sink)?;
            }
        }
    }

    Ok(())
}
