//! The compute budget enforcer, per `spec.md` §4.7: per-request/per-task
//! CPU time accounting with cooperative yield hints and a park/reject
//! decision at registration time, so one pathological request's
//! compute-bound steps can't starve the shared compute pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::telemetry::{EventKind, TelemetryHandle};

/// Process-wide defaults for the enforcer, surfaced via
/// [`crate::config::ZerverConfig`] and mirroring `spec.md` §6's
/// configuration surface verbatim.
#[derive(Debug, Clone, Copy)]
pub struct BudgetConfig {
    pub max_request_cpu: Duration,
    pub max_task_cpu: Duration,
    pub enforce: bool,
    pub park_on_exceeded: bool,
    pub default_priority: u8,
    pub default_yield_interval: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_request_cpu: Duration::from_millis(300),
            max_task_cpu: Duration::from_millis(100),
            enforce: true,
            park_on_exceeded: true,
            default_priority: 128,
            default_yield_interval: Duration::from_millis(20),
        }
    }
}

/// What a compute task asks for when it checks in with
/// [`RequestComputeBudget::register_task`].
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub token: u64,
    /// `None` falls back to `BudgetConfig::max_task_cpu`.
    pub requested_cpu: Option<Duration>,
    /// `None` falls back to `BudgetConfig::default_priority`.
    pub priority: Option<u8>,
    /// Whether this task may be parked (rather than rejected outright)
    /// when the request's remaining budget can't cover it.
    pub park_on_budget_exceeded: bool,
}

impl TaskSpec {
    pub fn new(token: u64) -> Self {
        Self {
            token,
            requested_cpu: None,
            priority: None,
            park_on_budget_exceeded: true,
        }
    }
}

/// The enforcer's verdict when a task registers, per `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetDecision {
    /// The task may run with `budget` of CPU time, at `priority`,
    /// checking in for a cooperative yield every `yield_interval`.
    Allow {
        budget: Duration,
        priority: u8,
        yield_interval: Duration,
    },
    /// The request's remaining budget can't cover this task right now;
    /// the caller should park it and retry registration after
    /// `retry_after_ms`.
    Park {
        reason: &'static str,
        retry_after_ms: u64,
    },
    /// The request's budget is exhausted and the task may not park
    /// either; reject with `code` (429 per `spec.md` §4.7).
    Reject { reason: &'static str, code: u16 },
}

struct TaskEntry {
    allocated: Duration,
    used_us: AtomicU64,
    priority: u8,
    yield_interval: Duration,
    started_at: Instant,
}

/// Per-request compute budget state: the atomic totals and the
/// token→entry map `spec.md` §4.7 describes. One instance lives on each
/// [`crate::context::CtxBase`] for the duration of its request.
pub struct RequestComputeBudget {
    config: BudgetConfig,
    total_used_us: AtomicU64,
    task_count: AtomicU64,
    budget_exceeded_count: AtomicU64,
    tasks: DashMap<u64, TaskEntry>,
}

impl RequestComputeBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            total_used_us: AtomicU64::new(0),
            task_count: AtomicU64::new(0),
            budget_exceeded_count: AtomicU64::new(0),
            tasks: DashMap::new(),
        }
    }

    /// Registers a compute task against this request's remaining budget,
    /// returning the enforcer's verdict. `park_on_exceeded` gates whether
    /// a task that doesn't fit is parked rather than rejected, per
    /// `spec.md` §4.7's `register_task` contract; when `enforce` is
    /// false the task is always allowed its full requested budget.
    pub fn register_task(&self, task: TaskSpec, telemetry: &TelemetryHandle) -> BudgetDecision {
        let requested = task.requested_cpu.unwrap_or(self.config.max_task_cpu);
        let priority = task.priority.unwrap_or(self.config.default_priority);

        if !self.config.enforce {
            self.insert(task.token, requested, priority, telemetry);
            return BudgetDecision::Allow {
                budget: requested,
                priority,
                yield_interval: self.config.default_yield_interval,
            };
        }

        let used = Duration::from_micros(self.total_used_us.load(Ordering::Relaxed));
        let remaining = self.config.max_request_cpu.saturating_sub(used);

        if requested > remaining {
            metrics::counter!("zerver_compute_budget_rejected_total").increment(1);
            return if self.config.park_on_exceeded && task.park_on_budget_exceeded {
                BudgetDecision::Park {
                    reason: "request_budget_exceeded",
                    retry_after_ms: requested.as_millis() as u64,
                }
            } else {
                BudgetDecision::Reject {
                    reason: "request_budget_exceeded",
                    code: 429,
                }
            };
        }

        self.insert(task.token, requested, priority, telemetry);
        BudgetDecision::Allow {
            budget: requested,
            priority,
            yield_interval: self.config.default_yield_interval,
        }
    }

    fn insert(&self, token: u64, allocated: Duration, priority: u8, telemetry: &TelemetryHandle) {
        self.tasks.insert(
            token,
            TaskEntry {
                allocated,
                used_us: AtomicU64::new(0),
                priority,
                yield_interval: self.config.default_yield_interval,
                started_at: Instant::now(),
            },
        );
        self.task_count.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("zerver_compute_tasks_active").increment(1.0);
        telemetry.emit(EventKind::ComputeBudgetRegistered {
            token,
            allocated_ms: allocated.as_millis() as u64,
        });
    }

    /// Records `spent` CPU time against `token`'s task and this request's
    /// running total, emitting `compute_budget_exceeded` the first time a
    /// task crosses its own allocation.
    pub fn record_cpu(&self, token: u64, spent: Duration, telemetry: &TelemetryHandle) {
        self.total_used_us
            .fetch_add(spent.as_micros() as u64, Ordering::Relaxed);
        metrics::counter!("zerver_compute_cpu_us_total").increment(spent.as_micros() as u64);

        let Some(entry) = self.tasks.get(&token) else {
            return;
        };
        let used =
            entry.used_us.fetch_add(spent.as_micros() as u64, Ordering::Relaxed) + spent.as_micros() as u64;
        if used > entry.allocated.as_micros() as u64 {
            self.budget_exceeded_count.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("zerver_compute_budget_exceeded_total").increment(1);
            telemetry.emit(EventKind::ComputeBudgetExceeded {
                token,
                used_ms: used / 1000,
                allocated_ms: entry.allocated.as_millis() as u64,
            });
        }
    }

    /// Cooperative yield hint: true once `token`'s task has run longer
    /// than its `yield_interval_ms` since registration, per `spec.md`
    /// §4.7's "cooperative hint to long-running compute tasks".
    pub fn should_yield(&self, token: u64, telemetry: &TelemetryHandle) -> bool {
        let Some(entry) = self.tasks.get(&token) else {
            return false;
        };
        let elapsed = entry.started_at.elapsed();
        let due = elapsed >= entry.yield_interval;
        if due {
            telemetry.emit(EventKind::ComputeBudgetYield {
                token,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        due
    }

    /// Clears `token`'s entry once its task has finished, per `spec.md`
    /// §4.7's `unregister_task`.
    pub fn unregister_task(&self, token: u64) {
        if self.tasks.remove(&token).is_some() {
            metrics::gauge!("zerver_compute_tasks_active").decrement(1.0);
        }
    }

    /// The configuration this enforcer was built with, so a caller
    /// backing off a parked registration (the dispatcher's compute
    /// admission loop) knows what a task's default ask looks like without
    /// duplicating `BudgetConfig` defaults of its own.
    pub fn config(&self) -> BudgetConfig {
        self.config
    }

    pub fn total_cpu_used(&self) -> Duration {
        Duration::from_micros(self.total_used_us.load(Ordering::Relaxed))
    }

    pub fn task_count(&self) -> u64 {
        self.task_count.load(Ordering::Relaxed)
    }

    pub fn budget_exceeded_count(&self) -> u64 {
        self.budget_exceeded_count.load(Ordering::Relaxed)
    }
}
