//! Trace export and metrics wiring: the concrete downstream collectors for
//! the events `zerver_core::telemetry` emits through `tracing`, per
//! `spec.md` §1's "Structured logging and trace export... consume events
//! emitted by the core" external-collaborator boundary. `zerver-core`
//! itself never installs a subscriber or a metrics recorder — that only
//! happens here, once, at process startup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::ZerverHttpConfig;

/// Installs a process-wide `tracing` subscriber per `config`: an
/// `EnvFilter` built from `config.tracing_env_filter`, and either the
/// human-readable `fmt` layer or the JSON one depending on
/// `config.tracing_json`. Mirrors the teacher's startup-time
/// `tracing_subscriber::registry().with(...).init()` pattern.
///
/// Must be called at most once per process; a second call panics, matching
/// `tracing`'s own global-subscriber contract.
pub fn init_tracing(config: &ZerverHttpConfig) {
    let filter = EnvFilter::try_new(&config.tracing_env_filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.tracing_json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .init();
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .init();
    }
}

/// Binds a Prometheus scrape endpoint at `addr` and installs the recorder
/// the `metrics` facade macros (used throughout `zerver-core`'s budget and
/// scheduler modules) publish into. A no-op if `addr` is `None` — metrics
/// are still recorded into the `metrics` facade either way, they just have
/// nowhere to be scraped from.
pub fn install_prometheus_recorder(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    if let Err(err) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::warn!(%err, %addr, "failed to install Prometheus metrics recorder");
    }
}
