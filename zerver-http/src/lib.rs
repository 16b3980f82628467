//! The HTTP frontend: turns `zerver_core::Runtime` + a set of registered
//! pipelines into a listening `axum` service, per `spec.md` §6's "HTTP
//! Frontend" external collaborator.
//!
//! `zerver-core` never parses wire bytes or touches a socket — everything
//! in this crate exists to bridge `axum`'s request/response types to
//! `zerver_core::{ParsedRequest, Response}` and back, wrapped in the same
//! `tower-http` middleware stack (`trace, compression-gzip, cors, timeout,
//! limit, request-id, util`) the teacher gateway ships.

mod config;
mod convert;
mod route;
mod server;
mod telemetry;

pub use config::ZerverHttpConfig;
pub use route::Route;
pub use server::ZerverServer;
pub use telemetry::{init_tracing, install_prometheus_recorder};
