//! An HTTP-backed [`Effector`], `zerver`'s analogue of the teacher
//! gateway's pooled `WORKER_CLIENT` (`model_gateway/src/core/worker.rs`):
//! one `reqwest::Client` shared across every effect dispatched through it,
//! so connection pooling survives across requests rather than being
//! rebuilt per attempt.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use zerver_core::{Effect, EffectKind, Effector, Error, Kind};

const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;

static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("failed to build the shared zerver-effects HTTP client")
});

/// Executes `Effect::Io` effects whose `target` is `"<METHOD> <URL>"`
/// (e.g. `"GET https://api.example.com/widgets/1"`). `Effect::payload` is
/// sent as the request body for methods that take one; the response body
/// is returned verbatim as the effect's outcome bytes.
///
/// Per-attempt timeout is the dispatcher's concern (`Effect::timeout`
/// already wraps every `Effector::execute` call via
/// `tokio::time::timeout`); the client's own timeout here is a last-resort
/// backstop against a connection that never produces headers at all.
pub struct HttpEffector {
    client: reqwest::Client,
}

impl HttpEffector {
    /// Builds an effector around the process-wide shared client.
    pub fn new() -> Self {
        Self {
            client: SHARED_CLIENT.clone(),
        }
    }

    /// Builds an effector around a caller-supplied client, e.g. one
    /// configured with a custom root CA or proxy for tests.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse_target(target: &str) -> Result<(reqwest::Method, &str), Error> {
        let mut parts = target.splitn(2, ' ');
        let method = parts
            .next()
            .ok_or_else(|| Error::new(Kind::InvalidInput, "http_effect", target.to_string()))?;
        let url = parts
            .next()
            .ok_or_else(|| Error::new(Kind::InvalidInput, "http_effect", target.to_string()))?;
        let method = method
            .parse::<reqwest::Method>()
            .map_err(|_| Error::new(Kind::InvalidInput, "http_effect", target.to_string()))?;
        Ok((method, url))
    }
}

impl Default for HttpEffector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Effector for HttpEffector {
    fn supports(&self, effect: &Effect) -> bool {
        effect.kind == EffectKind::Io && Self::parse_target(&effect.target).is_ok()
    }

    async fn execute(&self, effect: &Effect) -> Result<Bytes, Error> {
        let (method, url) = Self::parse_target(&effect.target)?;

        let mut request = self.client.request(method, url);
        if !effect.payload.is_empty() {
            request = request.body(effect.payload.clone());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                Error::timeout("http_effect", effect.target.clone())
            } else if err.is_connect() {
                Error::new(Kind::UpstreamUnavailable, "http_effect", effect.target.clone())
            } else {
                Error::new(Kind::UpstreamUnavailable, "http_effect", effect.target.clone())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(kind_for_status(status.as_u16())
                .with_upstream_status(status.as_u16()));
        }

        response
            .bytes()
            .await
            .map_err(|_| Error::new(Kind::UpstreamUnavailable, "http_effect", effect.target.clone()))
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}

fn kind_for_status(status: u16) -> Error {
    let kind = match status {
        401 => Kind::Unauthorized,
        403 => Kind::Forbidden,
        404 => Kind::NotFound,
        409 => Kind::Conflict,
        429 => Kind::TooManyRequests,
        400..=499 => Kind::InvalidInput,
        _ => Kind::UpstreamUnavailable,
    };
    Error::new(kind, "http_effect", status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn parses_method_and_url() {
        let (method, url) = HttpEffector::parse_target("GET https://example.com/x").unwrap();
        assert_eq!(method, reqwest::Method::GET);
        assert_eq!(url, "https://example.com/x");
    }

    #[test]
    fn rejects_malformed_target() {
        assert!(HttpEffector::parse_target("https://example.com/x").is_err());
    }

    #[test]
    fn supports_only_io_effects_with_parseable_targets() {
        let effector = HttpEffector::new();
        let ok = Effect::new("fetch", EffectKind::Io, "GET https://example.com")
            .with_timeout(StdDuration::from_secs(1));
        assert!(effector.supports(&ok));

        let bad = Effect::new("fetch", EffectKind::Io, "not-a-target");
        assert!(!effector.supports(&bad));

        let wrong_kind = Effect::new("fetch", EffectKind::Compute, "GET https://example.com");
        assert!(!effector.supports(&wrong_kind));
    }
}
