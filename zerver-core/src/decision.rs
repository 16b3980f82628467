//! The `Decision` protocol: the only thing a [`crate::step::Step`] body is
//! allowed to return, per `spec.md` §4.2. Steps are pure functions of
//! `CtxView` to `Decision` — they never block, spawn, or perform I/O
//! themselves; `Need` is how a step asks the runtime to do that on its
//! behalf and come back later.

use std::time::Duration;

use crate::effect::Effect;
use crate::error::Error;
use crate::response::Response;
use crate::telemetry::{EffectSubmitMode, JoinMode};

/// What a join should wait for before resuming the continuation, per
/// `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    /// Wait for every effect, required or not, to reach a terminal state.
    All,
    /// Wait for every effect marked `required` to succeed; non-required
    /// effects are best-effort and don't block or fail the join.
    AllRequired,
    /// Resume as soon as any one effect reaches a terminal state
    /// (success or failure).
    Any,
    /// Resume as soon as any one effect succeeds; cancel the rest.
    FirstSuccess,
}

impl Join {
    pub(crate) fn telemetry_kind(self) -> JoinMode {
        match self {
            Join::All => JoinMode::All,
            Join::AllRequired => JoinMode::AllRequired,
            Join::Any => JoinMode::Any,
            Join::FirstSuccess => JoinMode::FirstSuccess,
        }
    }
}

/// Whether a batch of effects is submitted all at once or one after
/// another, per `spec.md` §4.4. Sequential mode does not support
/// value-dependent parameterization in this release — see `spec.md` §9
/// Open Question #1; a step that needs effect N+1's input to depend on
/// effect N's output issues two `Need`s instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Parallel,
    Sequential,
}

impl Mode {
    pub(crate) fn telemetry_kind(self) -> EffectSubmitMode {
        match self {
            Mode::Parallel => EffectSubmitMode::Parallel,
            Mode::Sequential => EffectSubmitMode::Sequential,
        }
    }
}

/// A boxed, type-erased continuation: the code to run once a `Need`'s
/// effects have joined. Boxed as `FnOnce` rather than modeled as an
/// associated-type generic, per the `StepExecutionContext` REDESIGN FLAG —
/// this keeps `Decision` a plain, object-safe enum instead of infecting
/// every step signature with a continuation type parameter.
pub type Continuation =
    Box<dyn FnOnce(&crate::context::CtxBase, &[crate::effect::EffectOutcome]) -> Decision + Send>;

/// What a step decided to do, after looking at the context.
pub enum Decision {
    /// Keep running the pipeline: the next step in the chain runs next.
    Continue,
    /// The pipeline is finished successfully; `response` is sent as-is.
    Done(Response),
    /// The pipeline failed; render an error response from `error` now.
    Fail(Error),
    /// Suspend this request, submit `effects` for execution under `mode`,
    /// and resume by invoking `continuation` once `join` is satisfied.
    Need {
        effects: Vec<Effect>,
        mode: Mode,
        join: Join,
        /// Upper bound on how long the join may wait before it is itself
        /// treated as a timeout, independent of any individual effect's
        /// own timeout.
        join_timeout: Duration,
        continuation: Continuation,
    },
}

impl std::fmt::Debug for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Continue => write!(f, "Decision::Continue"),
            Decision::Done(r) => write!(f, "Decision::Done(status={})", r.status),
            Decision::Fail(e) => write!(f, "Decision::Fail({e:?})"),
            Decision::Need {
                effects,
                mode,
                join,
                ..
            } => write!(
                f,
                "Decision::Need({} effects, mode={mode:?}, join={join:?})",
                effects.len()
            ),
        }
    }
}

impl Decision {
    /// Convenience constructor for the common parallel-all-required case.
    pub fn need(
        effects: Vec<Effect>,
        join: Join,
        continuation: Continuation,
    ) -> Self {
        Decision::Need {
            effects,
            mode: Mode::Parallel,
            join,
            join_timeout: Duration::from_secs(30),
            continuation,
        }
    }
}
