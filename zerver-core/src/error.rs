//! The error taxonomy shared by every layer of the execution core.
//!
//! `Kind` is the wire-visible, status-mapped classification; `Error` adds
//! the `what`/`key` context pair steps and effectors attach when they fail,
//! mirroring the teacher's `{error: {type, code, message}}` shape (see
//! `routers::error` in the teacher gateway) but with the field names
//! `spec.md` §7 requires.

use std::fmt;

/// The eleven error kinds named in `spec.md` §7, each mapped to exactly one
/// HTTP status code by [`Kind::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    InvalidInput,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    Timeout,
    UpstreamUnavailable,
    ServiceUnavailable,
    Internal,
    OutOfMemory,
}

impl Kind {
    /// The HTTP status code this error kind renders as by default.
    pub fn status(self) -> u16 {
        match self {
            Kind::InvalidInput => 400,
            Kind::Unauthorized => 401,
            Kind::Forbidden => 403,
            Kind::NotFound => 404,
            Kind::Conflict => 409,
            Kind::TooManyRequests => 429,
            Kind::Timeout => 504,
            Kind::UpstreamUnavailable => 502,
            Kind::ServiceUnavailable => 503,
            Kind::Internal => 500,
            Kind::OutOfMemory => 500,
        }
    }

    /// Whether a failure of this kind is unconditionally in the dispatcher's
    /// transient set (`spec.md` §4.4). `Conflict` is transient only for
    /// specific upstream status codes and is handled separately by
    /// [`Error::is_transient`], since conflict alone (e.g. a unique-key
    /// violation) is not retryable.
    pub fn is_transient(self) -> bool {
        matches!(self, Kind::Timeout | Kind::UpstreamUnavailable)
    }
}

/// Upstream status codes for which a `Conflict`-kind error is still
/// considered transient and eligible for retry, per `spec.md` §4.4.
const TRANSIENT_CONFLICT_CODES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// A structured failure: a [`Kind`] plus the `what`/`key` context pair used
/// both for error rendering and for telemetry (`effect_end{error}`,
/// `request_end{error}`).
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{kind:?}: {what}={key}")]
pub struct Error {
    pub kind: Kind,
    /// What failed, e.g. "step", "effect", "request", "slot".
    pub what: &'static str,
    /// Which one, e.g. the step name, the effect target, the slot name.
    pub key: String,
    /// The upstream HTTP status code that produced this error, when known.
    /// Only meaningful for effector-originated errors; distinguishes a
    /// retryable `Conflict` (e.g. an upstream 429) from a non-retryable one
    /// (e.g. a unique-key violation reported as a plain 409).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl Error {
    pub fn new(kind: Kind, what: &'static str, key: impl Into<String>) -> Self {
        Self {
            kind,
            what,
            key: key.into(),
            upstream_status: None,
        }
    }

    /// Attaches the upstream status code that produced this error, used by
    /// [`Error::is_transient`] to classify `Conflict` errors.
    pub fn with_upstream_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    /// Whether the dispatcher should retry the effect that produced this
    /// error. Unlike [`Kind::is_transient`], this also covers `Conflict`
    /// errors whose `upstream_status` is one of the codes `spec.md` §4.4
    /// lists as transient.
    pub fn is_transient(&self) -> bool {
        if self.kind.is_transient() {
            return true;
        }
        self.kind == Kind::Conflict
            && self
                .upstream_status
                .is_some_and(|code| TRANSIENT_CONFLICT_CODES.contains(&code))
    }

    pub fn internal(what: &'static str, key: impl Into<String>) -> Self {
        Self::new(Kind::Internal, what, key)
    }

    pub fn out_of_memory(what: &'static str, key: impl Into<String>) -> Self {
        Self::new(Kind::OutOfMemory, what, key)
    }

    pub fn timeout(what: &'static str, key: impl Into<String>) -> Self {
        Self::new(Kind::Timeout, what, key)
    }

    pub fn service_unavailable(what: &'static str, key: impl Into<String>) -> Self {
        Self::new(Kind::ServiceUnavailable, what, key)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
