//! Effects: the only way a step pipeline touches the outside world.
//!
//! `zerver-core` never implements a concrete effect backend itself (HTTP
//! calls, database queries, ...) — per `spec.md`'s Non-goals, "concrete
//! effect backends" live in `zerver-effects`. What the core owns is the
//! effect *envelope* (this module), the `Effector` trait backends
//! implement against, and the dispatch/retry/join machinery that routes
//! envelopes to backends.

use std::time::Duration;

use crate::error::Error;

/// What kind of work an effect performs, used by the dispatcher to route
/// it to the reactor (I/O-bound) or the compute pool (CPU-bound), per
/// `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// Non-blocking I/O: network calls, file I/O — routed to the reactor.
    Io,
    /// CPU-bound work — routed to the compute pool.
    Compute,
    /// A pure delay; routed to the reactor's timer wheel.
    Timer,
}

impl EffectKind {
    /// The label used in telemetry (`effect_start{kind}`/`effect_end{kind}`).
    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::Io => "io",
            EffectKind::Compute => "compute",
            EffectKind::Timer => "timer",
        }
    }
}

/// The retry policy attached to an effect, per `spec.md` §4.4: exponential
/// backoff with jitter, bounded by a cap and a maximum attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction applied symmetrically around the computed delay,
    /// e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl RetryPolicy {
    /// The default policy named in `spec.md` §4.4: base 100ms, cap 5s,
    /// ±20% jitter.
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        jitter: 0.2,
    };

    /// No retries: the effect is attempted exactly once.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        jitter: 0.0,
    };

    /// Computes the delay before attempt `attempt` (1-indexed), including
    /// jitter, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        // `jitter_sample` is drawn from `[-1.0, 1.0]` by the caller; this
        // maps it onto `[-jitter, jitter]` around `capped`.
        let jittered = capped * (1.0 + self.jitter * jitter_sample);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::DEFAULT
    }
}

/// One unit of work requested by a `Need`. Effects are inert data until
/// the dispatcher hands them to an [`crate::effector::Effector`] — nothing
/// in `zerver-core` interprets `kind`/`target`/`payload` itself. Cloned by
/// the dispatcher when an effect's attempt is submitted to a worker pool
/// rather than executed inline.
#[derive(Clone)]
pub struct Effect {
    /// Opaque label used to correlate this effect's outcome back to the
    /// continuation and in telemetry (`effect_start{token}`).
    pub token: &'static str,
    pub kind: EffectKind,
    /// Backend-specific discriminator, e.g. an HTTP method+URL, a KV key,
    /// a file path. Opaque to the core; effectors interpret it.
    pub target: String,
    pub payload: bytes::Bytes,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Whether this effect's success is required for its `Join` to be
    /// satisfied under `Join::AllRequired`.
    pub required: bool,
    /// An idempotency key attached to write effects so the dispatcher's
    /// retry loop can safely resend them without double-applying a write,
    /// per `spec.md` §4.4's idempotency-key semantics. `None` for
    /// naturally idempotent (e.g. read) effects.
    pub idempotency_key: Option<String>,
    /// A compensating action to run if this effect succeeded but a
    /// sibling in the same `Need` subsequently failed under a join policy
    /// that aborts the batch. Saga-style compensation is explicitly
    /// unimplemented in this release (`spec.md` REDESIGN FLAGS) — setting
    /// this field causes the dispatcher to fail the request with
    /// `Kind::Internal, what="compensation"` rather than silently
    /// dropping it.
    pub compensation: Option<()>,
    /// Whether this effect only reads (no side effect to dedupe against),
    /// e.g. an HTTP `GET` or a KV `get`. Per `spec.md` §4.4, a read may be
    /// retried freely; a write needs `idempotency_key` set before the
    /// dispatcher will retry it. Defaults to `false` (the conservative
    /// choice for an effect the caller hasn't classified).
    pub read_only: bool,
}

impl Effect {
    pub fn new(token: &'static str, kind: EffectKind, target: impl Into<String>) -> Self {
        Self {
            token,
            kind,
            target: target.into(),
            payload: bytes::Bytes::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::DEFAULT,
            required: true,
            idempotency_key: None,
            compensation: None,
            read_only: false,
        }
    }

    /// Marks this effect as read-only, so the dispatcher's retry loop may
    /// retry it without an `idempotency_key`.
    pub fn read(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<bytes::Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Whether this effect may be retried without an `idempotency_key`:
    /// `spec.md` §4.4's "write effects need an idempotency_key to be
    /// retryable; otherwise only reads retry."
    pub fn is_read(&self) -> bool {
        self.read_only
    }
}

/// The terminal result of one effect's execution, handed to the
/// continuation as part of `&[EffectOutcome]`.
#[derive(Debug, Clone)]
pub struct EffectOutcome {
    pub token: &'static str,
    pub result: Result<bytes::Bytes, Error>,
    pub attempts: u32,
    /// True if this outcome arrived after the owning request's join had
    /// already resolved (e.g. a `FirstSuccess` join that resolved on a
    /// sibling) — a non-fatal, telemetry-only condition per `spec.md` §9
    /// Open Question #3.
    pub late: bool,
}

impl EffectOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
