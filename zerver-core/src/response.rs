//! The terminal shape a pipeline produces, per `spec.md` §3: `{ status,
//! headers: ordered list of {name, value}, body: Complete(bytes) |
//! Streaming(writer) }`. `zerver-core` only defines this value; turning it
//! into wire bytes is `zerver-http`'s job.

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Error;

/// A response body: either fully materialized bytes or a stream of chunks
/// for long-running/streamed responses, per `spec.md` §3's `Streaming`
/// variant.
pub enum Body {
    Complete(Bytes),
    Streaming(BoxStream<'static, Result<Bytes, Error>>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Complete(bytes) => f.debug_tuple("Complete").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Complete(Bytes::new())
    }
}

/// The response a pipeline's terminal `Decision::Done` carries, or that an
/// [`crate::render::ErrorRenderer`] produces from a `Decision::Fail`.
/// Headers preserve insertion order — `spec.md` §3 calls for "an ordered
/// list of {name, value}", not a map, since repeated headers (`Set-Cookie`)
/// must all survive to the wire.
#[derive(Debug, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Complete(body.into());
        self
    }

    pub fn with_streaming_body(
        mut self,
        stream: BoxStream<'static, Result<Bytes, Error>>,
    ) -> Self {
        self.body = Body::Streaming(stream);
        self
    }

    /// A `200 OK` with an empty body — the "empty step list → 200 OK with
    /// empty body" boundary behavior `spec.md` §8 requires.
    pub fn empty(status: u16) -> Self {
        Self::new(status)
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(Bytes::from(body.into()))
    }

    /// Serializes `value` as the JSON body, setting `content-type`.
    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(value)
            .map_err(|_| Error::internal("response", "json_encode"))?;
        Ok(Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(Bytes::from(bytes)))
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Complete(bytes) => Some(bytes),
            Body::Streaming(_) => None,
        }
    }
}
