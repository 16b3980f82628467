//! The telemetry event vocabulary from `spec.md` §4.8, realized as a closed
//! enum of structured payloads rather than stringly-typed fields, so a
//! subscriber can match exhaustively instead of parsing field soup.

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    All,
    AllRequired,
    Any,
    FirstSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSubmitMode {
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Continue,
    Done,
    Fail,
    Need,
    Error,
}

/// One emitted telemetry record. `sequence` is assigned by
/// [`super::TelemetryHandle`] and is monotonically increasing per
/// `request_id`, as `spec.md` §6 requires.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub request_id: uuid::Uuid,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum EventKind {
    RequestStart {
        method: String,
        path: String,
    },
    RequestEnd {
        status: u16,
        duration_ms: u64,
        error: Option<Error>,
    },
    StepStart {
        layer: String,
        name: &'static str,
    },
    StepEnd {
        layer: String,
        name: &'static str,
        outcome: StepOutcome,
        duration_ms: u64,
    },
    NeedRequested {
        effect_count: usize,
        mode: EffectSubmitMode,
        join: JoinMode,
        sequence: u64,
    },
    NeedJoin {
        sequence: u64,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    EffectStart {
        sequence: u64,
        need_sequence: u64,
        kind: &'static str,
        token: &'static str,
        required: bool,
        target: String,
        timeout_ms: u64,
    },
    EffectEnd {
        sequence: u64,
        kind: &'static str,
        success: bool,
        bytes: Option<usize>,
        error: Option<Error>,
        duration_ms: u64,
        /// Set when this completion arrived after the owning context left
        /// `Waiting` — see `spec.md` §9 Open Question #3's resolution.
        late: bool,
    },
    JobEnqueued {
        queue: &'static str,
        depth_start: usize,
    },
    JobTaken {
        worker_id: usize,
    },
    JobStarted,
    JobParked {
        cause: &'static str,
        token: Option<&'static str>,
    },
    JobResumed,
    JobCompleted {
        success: bool,
        attempts: u32,
    },
    SlotWrite {
        slot: &'static str,
        size_bytes: usize,
    },
    Retry {
        attempt: u32,
        reason: &'static str,
        backoff_ms: u64,
    },
    ComputeBudgetRegistered {
        token: u64,
        allocated_ms: u64,
    },
    ComputeBudgetExceeded {
        token: u64,
        used_ms: u64,
        allocated_ms: u64,
    },
    ComputeBudgetYield {
        token: u64,
        elapsed_ms: u64,
    },
}
