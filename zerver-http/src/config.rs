//! Ambient process configuration: the fields `spec.md` §6 itself doesn't
//! need but a runnable process does. Grounded on the teacher's plain
//! struct-literal-default config style (`AppContext`'s `RouterConfig`) —
//! `zerver` has no layered-config crate in its stack, so this is a
//! `Default` impl plus an `from_env` convenience, the same shape `demos/
//! zerver-demo`'s `clap` CLI overrides.

use std::net::SocketAddr;

/// Process-level configuration for a `zerver-http` server: where to bind,
/// how to configure tracing, and whether to expose a Prometheus scrape
/// endpoint. Distinct from `zerver_core::ZerverConfig`, which governs the
/// scheduler/dispatcher the request runtime itself uses.
#[derive(Debug, Clone)]
pub struct ZerverHttpConfig {
    pub bind_addr: SocketAddr,
    /// `tracing_subscriber::EnvFilter` directive string, e.g.
    /// `"zerver=info,tower_http=info"`.
    pub tracing_env_filter: String,
    /// Emit structured JSON log lines instead of the default human-readable
    /// format.
    pub tracing_json: bool,
    /// If set, a Prometheus scrape endpoint is bound at this address in
    /// addition to the main `bind_addr` listener.
    pub metrics_prometheus_addr: Option<SocketAddr>,
    /// Upper bound on request body size, enforced by `tower_http`'s
    /// `RequestBodyLimitLayer`.
    pub max_body_bytes: usize,
    /// Per-request wall-clock timeout, enforced by `tower_http`'s
    /// `TimeoutLayer` ahead of any `zerver_core` budget/join timeouts.
    pub request_timeout: std::time::Duration,
}

impl Default for ZerverHttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind_addr"),
            tracing_env_filter: "zerver=info,tower_http=info".to_string(),
            tracing_json: false,
            metrics_prometheus_addr: None,
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl ZerverHttpConfig {
    /// Builds a config from `Default`, overridden by whichever of
    /// `ZERVER_BIND_ADDR` / `ZERVER_TRACING_FILTER` / `ZERVER_TRACING_JSON`
    /// / `ZERVER_METRICS_ADDR` are set, for library consumers who don't
    /// want to pull in `clap` themselves (`demos/zerver-demo` uses `clap`
    /// `derive`+`env` instead and never calls this).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("ZERVER_BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }
        if let Ok(filter) = std::env::var("ZERVER_TRACING_FILTER") {
            config.tracing_env_filter = filter;
        }
        if let Ok(json) = std::env::var("ZERVER_TRACING_JSON") {
            config.tracing_json = json == "1" || json.eq_ignore_ascii_case("true");
        }
        if let Ok(addr) = std::env::var("ZERVER_METRICS_ADDR") {
            config.metrics_prometheus_addr = addr.parse().ok();
        }
        config
    }
}
