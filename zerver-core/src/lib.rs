//! Transport-agnostic execution core for the Zerver HTTP framework.
//!
//! This crate implements the step/effect runtime: a per-request typed
//! [`context`], a [`decision`]-driven [`interpreter`], an [`effect`]
//! dispatcher with retry/join semantics, and a cooperative [`scheduler`]
//! multiplexing work onto worker pools atop tokio's reactor. It
//! deliberately does not parse HTTP wire bytes, match routes, or export
//! telemetry to a backend — those are `zerver-http`'s job; this crate
//! only defines the event vocabulary ([`telemetry`]) and the seams
//! ([`effector::Effector`]) those concerns plug into.

pub mod budget;
pub mod config;
pub mod context;
pub mod decision;
pub mod dispatcher;
pub mod effect;
pub mod effector;
pub mod error;
pub mod interpreter;
pub mod reactor;
pub mod render;
pub mod response;
pub mod runtime;
pub mod scheduler;
pub mod slot;
pub mod step;
pub mod telemetry;

pub use budget::{BudgetConfig, BudgetDecision, RequestComputeBudget, TaskSpec};
pub use config::ZerverConfig;
pub use context::{CtxBase, CtxView, ParsedRequest};
pub use decision::{Decision, Join, Mode};
pub use effect::{Effect, EffectKind, EffectOutcome, RetryPolicy};
pub use effector::Effector;
pub use error::{Error, Kind, Result};
pub use interpreter::{Pipeline, PipelineOutcome};
pub use render::{default_error_renderer, ErrorRenderer};
pub use response::{Body, Response};
pub use runtime::Runtime;
pub use scheduler::Priority;
pub use slot::{Member, NoSlots, Slot, SlotSet};
pub use step::Step;
