//! The process-wide `Runtime` handle, per the REDESIGN FLAGS' "no hidden
//! singletons in core" requirement: every piece of shared state
//! (dispatcher, scheduler, reactor) is reachable only through one handle
//! the HTTP frontend constructs and threads through explicitly, never
//! through a `lazy_static`/`OnceCell` global.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ZerverConfig;
use crate::context::{CtxBase, ParsedRequest};
use crate::dispatcher::Dispatcher;
use crate::effector::Effector;
use crate::interpreter::{self, Pipeline, PipelineOutcome};
use crate::reactor::Reactor;
use crate::render::{default_error_renderer, ErrorRenderer};
use crate::response::Response;
use crate::scheduler::{Priority, Scheduler};
use crate::telemetry::TelemetryHandle;

/// Owns the dispatcher, scheduler, and reactor for one running process.
/// Construct exactly one per process (per `zerver-http` listener, in
/// practice) and share it as `Arc<Runtime>`.
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    reactor: Arc<Reactor>,
    error_renderer: ErrorRenderer,
    budget_config: crate::budget::BudgetConfig,
    promote: crate::telemetry::PromoteConfig,
    default_deadline: Option<std::time::Duration>,
}

impl Runtime {
    /// Builds a runtime with no effectors registered; call
    /// [`RuntimeBuilder::register_effector`] to add the backends
    /// `zerver-effects` (or an application) provides.
    pub fn builder(config: ZerverConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            effectors: Vec::new(),
            error_renderer: default_error_renderer(),
        }
    }

    /// Runs `pipeline` against a freshly built [`CtxBase`] for `request`,
    /// through the scheduler's continuation pool under `priority`. This
    /// is the entry point the HTTP frontend calls per inbound request —
    /// `handle_request` in `spec.md`'s own naming.
    pub async fn handle_request(
        &self,
        request: ParsedRequest,
        pipeline: Arc<Pipeline>,
        priority: Priority,
    ) -> PipelineOutcome {
        let deadline = self
            .default_deadline
            .map(|d| std::time::Instant::now() + d);
        let ctx = Arc::new(CtxBase::new_full(request, self.budget_config, deadline));
        let rx = self.scheduler.submit_request(
            pipeline,
            ctx,
            self.dispatcher.clone(),
            self.error_renderer.clone(),
            priority,
        );
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = crate::error::Error::internal("scheduler", "continuation_dropped");
                PipelineOutcome {
                    response: Response::empty(error.kind.status()),
                    error: Some(error),
                }
            }
        }
    }

    /// Runs `pipeline` directly against an already-built context, bypassing
    /// the scheduler's priority queue. Used by tests and by callers that
    /// have already decided to run inline (e.g. a warm-up request).
    pub async fn handle_request_inline(
        &self,
        ctx: Arc<CtxBase>,
        pipeline: &Pipeline,
    ) -> PipelineOutcome {
        interpreter::run(pipeline, ctx, &self.dispatcher, &self.error_renderer, &self.promote).await
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }
}

/// Builder for [`Runtime`], collecting effector registrations before the
/// scheduler's worker pools are spun up.
pub struct RuntimeBuilder {
    config: ZerverConfig,
    effectors: Vec<Arc<dyn Effector>>,
    error_renderer: ErrorRenderer,
}

impl RuntimeBuilder {
    pub fn register_effector(mut self, effector: Arc<dyn Effector>) -> Self {
        self.effectors.push(effector);
        self
    }

    /// Overrides the default JSON error renderer, e.g. with one that
    /// matches an application's existing error response shape.
    pub fn with_error_renderer(mut self, renderer: ErrorRenderer) -> Self {
        self.error_renderer = renderer;
        self
    }

    pub fn build(self) -> Runtime {
        let telemetry_seed = TelemetryHandle::new(Uuid::nil());
        let promote = crate::telemetry::PromoteConfig {
            queue_ms: self.config.promote_queue_ms,
            park_ms: self.config.promote_park_ms,
            debug: self.config.debug_jobs,
        };
        let scheduler = Scheduler::start(self.config.scheduler, promote, telemetry_seed);
        let reactor = Arc::new(Reactor::new());
        // Built after the scheduler, so the dispatcher shares its
        // effector/compute pools rather than dispatching effects on
        // unbounded tokio tasks (`spec.md` §4.5).
        let mut dispatcher = Dispatcher::with_scheduler_pools(
            reactor.clone(),
            scheduler.effector_pool().clone(),
            scheduler.compute_pool().cloned(),
            scheduler.compute_mode(),
        );
        for effector in self.effectors {
            dispatcher.register(effector);
        }
        Runtime {
            dispatcher: Arc::new(dispatcher),
            scheduler: Arc::new(scheduler),
            reactor,
            error_renderer: self.error_renderer,
            budget_config: self.config.budget,
            promote,
            default_deadline: self.config.default_deadline,
        }
    }
}
