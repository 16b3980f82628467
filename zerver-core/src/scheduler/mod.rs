//! The cooperative task scheduler: multiplexes request continuations and
//! effect dispatch onto bounded worker pools atop the tokio reactor, per
//! `spec.md` §4.6.

pub mod pool;
pub mod priority;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::Instrument;

use crate::context::CtxBase;
use crate::dispatcher::Dispatcher;
use crate::interpreter::{self, Pipeline, PipelineOutcome};
use crate::render::ErrorRenderer;
use crate::telemetry::{PromoteConfig, TelemetryHandle};
use pool::{ComputeMode, WorkerPool};
pub use priority::Priority;

/// Scheduler configuration, surfaced to callers via
/// [`crate::config::ZerverConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub continuation_workers: usize,
    pub effector_workers: usize,
    pub compute: ComputeModeConfig,
}

/// Serializable mirror of [`ComputeMode`], since `ComputeMode::Dedicated`
/// carries a worker count that configuration needs to express too.
#[derive(Debug, Clone, Copy)]
pub enum ComputeModeConfig {
    Disabled,
    Shared,
    Dedicated { workers: usize },
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            continuation_workers: num_cpus_fallback(),
            effector_workers: num_cpus_fallback() * 4,
            compute: ComputeModeConfig::Shared,
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Multiplexes the continuation pool, the effector pool, and (depending
/// on [`ComputeModeConfig`]) a compute pool onto the tokio runtime.
pub struct Scheduler {
    continuation_pool: WorkerPool,
    effector_pool: WorkerPool,
    compute_pool: Option<WorkerPool>,
    compute_mode: ComputeMode,
    promote: PromoteConfig,
}

impl Scheduler {
    pub fn start(config: SchedulerConfig, promote: PromoteConfig, telemetry_seed: TelemetryHandle) -> Self {
        let continuation_pool =
            WorkerPool::spawn("continuation", config.continuation_workers, telemetry_seed.clone());
        let effector_pool =
            WorkerPool::spawn("effector", config.effector_workers, telemetry_seed.clone());

        let (compute_pool, compute_mode) = match config.compute {
            ComputeModeConfig::Disabled => (None, ComputeMode::Disabled),
            ComputeModeConfig::Shared => (None, ComputeMode::Shared),
            ComputeModeConfig::Dedicated { workers } => (
                Some(WorkerPool::spawn("compute", workers, telemetry_seed)),
                ComputeMode::Dedicated { workers },
            ),
        };

        Self {
            continuation_pool,
            effector_pool,
            compute_pool,
            compute_mode,
            promote,
        }
    }

    /// Submits a request's pipeline to the continuation pool under
    /// `priority`, returning a future that resolves once the pipeline
    /// reaches a terminal state. The pipeline itself dispatches effects
    /// through `dispatcher`; this scheduler only governs how many
    /// concurrent pipelines (and, indirectly, how many concurrent effect
    /// dispatches) are in flight at once.
    pub fn submit_request(
        &self,
        pipeline: Arc<Pipeline>,
        ctx: Arc<CtxBase>,
        dispatcher: Arc<Dispatcher>,
        error_renderer: ErrorRenderer,
        priority: Priority,
    ) -> oneshot::Receiver<PipelineOutcome> {
        let (tx, rx) = oneshot::channel();
        let telemetry = ctx.telemetry().clone();
        let promote = self.promote;
        let enqueued_at = Instant::now();
        self.continuation_pool.submit(priority, &telemetry, move |slot| {
            let run = async move {
                ctx.set_continuation_slot(slot).await;
                ctx.telemetry().emit(crate::telemetry::EventKind::JobStarted);
                let outcome =
                    interpreter::run(&pipeline, ctx.clone(), &dispatcher, &error_renderer, &promote)
                        .await;
                ctx.telemetry().emit(crate::telemetry::EventKind::JobCompleted {
                    success: outcome.error.is_none(),
                    attempts: 1,
                });
                let _ = tx.send(outcome);
            };
            let waited_ms = enqueued_at.elapsed().as_millis() as u64;
            if promote.should_promote_queue(waited_ms) {
                let span = telemetry.promote("job");
                Box::pin(run.instrument(span))
            } else {
                Box::pin(run)
            }
        });
        rx
    }

    /// The pool effect dispatch routes I/O-bound work through. Cloned
    /// into a `Dispatcher` by `RuntimeBuilder::build` so effector
    /// execution shares this scheduler's concurrency bound rather than
    /// running on unbounded tokio tasks.
    pub fn effector_pool(&self) -> &WorkerPool {
        &self.effector_pool
    }

    pub fn compute_pool(&self) -> Option<&WorkerPool> {
        self.compute_pool.as_ref()
    }

    pub fn compute_mode(&self) -> ComputeMode {
        self.compute_mode
    }
}
