//! Runtime configuration, per `spec.md` §6. `zerver-core` only defines
//! the shape; loading it from environment/files/CLI flags is
//! `zerver-http`'s job (via `clap`), matching the "Runtime → HTTP
//! Frontend" boundary used throughout this crate.

use std::time::Duration;

use crate::budget::BudgetConfig;
use crate::scheduler::{ComputeModeConfig, SchedulerConfig};

/// Top-level configuration for one `Runtime`, covering every knob
/// `spec.md` §6 enumerates under "Configuration surface" except the
/// scheduler's own pool sizes/capacities, which live in
/// [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct ZerverConfig {
    pub scheduler: SchedulerConfig,
    /// Per-request/per-task compute budget enforcement, per `spec.md`
    /// §4.7/§6 (`max_request_cpu_ms`, `max_task_cpu_ms`,
    /// `enforce_budgets`, `park_on_exceeded`).
    pub budget: BudgetConfig,
    /// Default per-effect timeout used when a `Need` doesn't set one
    /// explicitly (`spec.md` §6 `default_timeout_ms`).
    pub default_effect_timeout: Duration,
    /// Optional wall-clock budget applied to every request from the
    /// moment its context is built, per `spec.md` §3/§4.3's "optional
    /// deadline" and §6's `deadline_ms`. `None` (the default) means no
    /// request-level deadline is enforced — only per-effect timeouts and
    /// per-`Need` `join_timeout`s apply.
    pub default_deadline: Option<Duration>,
    /// Default join timeout for a `Need` that doesn't set one explicitly.
    pub default_join_timeout: Duration,
    /// Base delay for the default retry policy's exponential backoff
    /// (`spec.md` §6 `default_retry_backoff_base_ms`).
    pub default_retry_backoff_base: Duration,
    /// Cap on the default retry policy's exponential backoff
    /// (`spec.md` §6 `default_retry_backoff_cap_ms`).
    pub default_retry_backoff_cap: Duration,
    /// How long in-flight requests are given to drain on graceful
    /// shutdown before being failed with `ServiceUnavailable`
    /// (`spec.md` §5/§6 `drain_timeout_ms`).
    pub drain_timeout: Duration,
    /// Promote a job to a dedicated telemetry span once it has queued
    /// longer than this (`spec.md` §4.8 `promote_queue_ms`).
    pub promote_queue_ms: u64,
    /// Promote a job to a dedicated telemetry span once it has parked
    /// longer than this (`spec.md` §4.8 `promote_park_ms`).
    pub promote_park_ms: u64,
    /// Forces every job to be promoted to a span regardless of the
    /// thresholds above, per `spec.md` §6's `debug_jobs` flag.
    pub debug_jobs: bool,
}

impl Default for ZerverConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            budget: BudgetConfig::default(),
            default_effect_timeout: Duration::from_secs(10),
            default_deadline: None,
            default_join_timeout: Duration::from_secs(30),
            default_retry_backoff_base: Duration::from_millis(100),
            default_retry_backoff_cap: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            promote_queue_ms: crate::telemetry::PROMOTE_QUEUE_MS,
            promote_park_ms: crate::telemetry::PROMOTE_PARK_MS,
            debug_jobs: false,
        }
    }
}

impl ZerverConfig {
    pub fn with_dedicated_compute_pool(mut self, workers: usize) -> Self {
        self.scheduler.compute = ComputeModeConfig::Dedicated { workers };
        self
    }

    pub fn with_compute_disabled(mut self) -> Self {
        self.scheduler.compute = ComputeModeConfig::Disabled;
        self
    }
}
