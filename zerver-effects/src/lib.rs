//! Concrete effect backends for `zerver-core`.
//!
//! `zerver-core` only defines the `Effect`/`Effector` seam; it never talks
//! to the network, a KV store, or the filesystem itself — per its own
//! module docs, that's this crate's job. Each effector here interprets
//! `Effect::target` its own way (documented on the type) and is otherwise
//! a plain implementation of `zerver_core::Effector`, attempted once per
//! call with retry/backoff left entirely to the dispatcher.

mod file_json;
mod http;
mod memory_kv;

pub use file_json::FileJsonEffector;
pub use http::HttpEffector;
pub use memory_kv::MemoryKvEffector;
