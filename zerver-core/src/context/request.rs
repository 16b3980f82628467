//! Request metadata: everything about the inbound request that isn't a
//! slot. Built once by the HTTP frontend (`zerver-http`) before the
//! interpreter ever sees the request, per `spec.md` §6's "Runtime → HTTP
//! Frontend" boundary — `zerver-core` only consumes [`ParsedRequest`], it
//! never parses wire bytes itself.

use std::{collections::HashMap, net::SocketAddr, time::Instant};

use uuid::Uuid;

/// A single header value entry, preserving the original (non-folded) name
/// as received — only lookups fold case, storage does not, per `spec.md`
/// §4.1's "the framework preserves all values" edge policy.
#[derive(Debug, Clone)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Request metadata and body, assembled by the HTTP frontend and handed to
/// `zerver_core::handle_request` untouched thereafter.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<HeaderEntry>,
    /// Path parameters extracted by the (external) route matcher, e.g.
    /// `{"id": "42"}` for a route `/items/:id` matched against
    /// `/items/42`. Case-sensitive, per `spec.md` §9 Open Question #2.
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub client_addr: Option<SocketAddr>,
    pub body: bytes::Bytes,
}

impl ParsedRequest {
    /// Case-insensitive header lookup returning the *last* matching value,
    /// per `spec.md` §4.1's duplicate-header policy.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All values for a (possibly repeated) header, in receipt order.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(|s| s.as_str())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }
}

/// Per-request identity and timing, opaque to steps beyond what
/// `CtxBase::elapsed_ms`/`request_id` expose.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub request_id: Uuid,
    pub started_at: Instant,
}

impl RequestIdentity {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

impl Default for RequestIdentity {
    fn default() -> Self {
        Self::new()
    }
}
