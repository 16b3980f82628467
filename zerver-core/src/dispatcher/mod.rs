//! The effect dispatcher: routes a `Need`'s effects to registered
//! [`Effector`]s, drives retry per effect, and evaluates the batch's
//! [`Join`] policy as outcomes arrive, per `spec.md` §4.4.

pub mod join;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::budget::{BudgetDecision, RequestComputeBudget, TaskSpec};
use crate::decision::{Join, Mode};
use crate::effect::{Effect, EffectKind, EffectOutcome};
use crate::effector::Effector;
use crate::error::{Error, Kind};
use crate::reactor::Reactor;
use crate::scheduler::pool::{ComputeMode, WorkerPool};
use crate::scheduler::Priority;
use crate::telemetry::{EventKind, TelemetryHandle};
use join::{JoinProgress, JoinState};

/// Routes effects to registered effectors and evaluates joins. One
/// `Dispatcher` is shared process-wide (held behind `Arc` by the
/// [`crate::runtime::Runtime`]) — it has no per-request state itself,
/// only the effector registry and the pools/reactor it routes dispatch
/// through.
pub struct Dispatcher {
    effectors: Vec<Arc<dyn Effector>>,
    reactor: Arc<Reactor>,
    effector_pool: WorkerPool,
    compute_pool: Option<WorkerPool>,
    compute_mode: ComputeMode,
}

impl Dispatcher {
    /// Builds a standalone dispatcher with its own reactor and a small
    /// private effector pool — for unit tests and any caller that doesn't
    /// have a `Scheduler` to share pools with. Production callers should
    /// use [`Dispatcher::with_scheduler_pools`] via `RuntimeBuilder`.
    pub fn new() -> Self {
        let telemetry_seed = TelemetryHandle::new(uuid::Uuid::nil());
        Self {
            effectors: Vec::new(),
            reactor: Arc::new(Reactor::new()),
            effector_pool: WorkerPool::spawn("effector", 8, telemetry_seed),
            compute_pool: None,
            compute_mode: ComputeMode::Shared,
        }
    }

    /// Builds a dispatcher that shares `reactor` and the given pools with
    /// a [`crate::scheduler::Scheduler`], so effect dispatch concurrency
    /// is governed by the same bounds as the rest of the process's
    /// scheduling, per `spec.md` §4.5.
    pub fn with_scheduler_pools(
        reactor: Arc<Reactor>,
        effector_pool: WorkerPool,
        compute_pool: Option<WorkerPool>,
        compute_mode: ComputeMode,
    ) -> Self {
        Self {
            effectors: Vec::new(),
            reactor,
            effector_pool,
            compute_pool,
            compute_mode,
        }
    }

    pub fn register(&mut self, effector: Arc<dyn Effector>) {
        self.effectors.push(effector);
    }

    fn find_effector(&self, effect: &Effect) -> Option<&Arc<dyn Effector>> {
        self.effectors
            .iter()
            .find(|e| e.kinds().contains(&effect.kind) && e.supports(effect))
    }

    /// Picks the pool an effect of `kind` should run on. Compute-kind
    /// effects are rejected outright when the scheduler's compute pool is
    /// `Disabled`, per `spec.md` §4.6, rather than silently falling back
    /// to unbounded execution.
    fn pool_for(&self, kind: EffectKind) -> Result<&WorkerPool, Error> {
        match kind {
            EffectKind::Io | EffectKind::Timer => Ok(&self.effector_pool),
            EffectKind::Compute => match self.compute_mode {
                ComputeMode::Disabled => {
                    Err(Error::service_unavailable("effect", "compute_disabled"))
                }
                ComputeMode::Shared => Ok(&self.effector_pool),
                ComputeMode::Dedicated { .. } => Ok(self
                    .compute_pool
                    .as_ref()
                    .expect("dedicated compute mode always has a compute pool")),
            },
        }
    }

    /// Dispatches one `Need`'s worth of effects, returning outcomes for
    /// every effect once the `Join` policy is satisfied (or failed).
    /// Outcomes for effects still outstanding when the join resolves are
    /// omitted from the returned vector; their effectors are asked to
    /// cancel and any late completion is telemetry-only, per `spec.md`
    /// §9 Open Question #3.
    pub async fn dispatch(
        &self,
        effects: Vec<Effect>,
        mode: Mode,
        join: Join,
        join_timeout: Duration,
        compute_budget: &Arc<RequestComputeBudget>,
        telemetry: &TelemetryHandle,
    ) -> Result<Vec<EffectOutcome>, Error> {
        for effect in &effects {
            if effect.compensation.is_some() {
                return Err(Error::new(Kind::Internal, "compensation", effect.token));
            }
        }

        let total = effects.len();
        let need_sequence = telemetry.next_need_sequence();
        telemetry.emit(EventKind::NeedRequested {
            effect_count: total,
            mode: mode.telemetry_kind(),
            join: join.telemetry_kind(),
            sequence: need_sequence,
        });

        let started = std::time::Instant::now();
        let work = async {
            match mode {
                Mode::Parallel => {
                    self.dispatch_parallel(effects, join, need_sequence, compute_budget, telemetry)
                        .await
                }
                Mode::Sequential => {
                    self.dispatch_sequential(effects, join, need_sequence, compute_budget, telemetry)
                        .await
                }
            }
        };

        let (outcomes, completed, failed) = match tokio::time::timeout(join_timeout, work).await {
            Ok(r) => r?,
            Err(_) => return Err(Error::timeout("need", "join")),
        };
        telemetry.emit(EventKind::NeedJoin {
            sequence: need_sequence,
            completed,
            failed,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(outcomes)
    }

    async fn dispatch_parallel(
        &self,
        effects: Vec<Effect>,
        join: Join,
        need_sequence: u64,
        compute_budget: &Arc<RequestComputeBudget>,
        telemetry: &TelemetryHandle,
    ) -> Result<(Vec<EffectOutcome>, usize, usize), Error> {
        let required_count = effects.iter().filter(|e| e.required).count();
        let total = effects.len();
        let mut join_state = JoinState::new(join, total, required_count);

        let (tx, mut rx) = mpsc::unbounded_channel::<(bool, EffectOutcome)>();
        let mut handles = Vec::with_capacity(total);

        for effect in effects {
            let effector = self.find_effector(&effect).cloned();
            let pool = self.pool_for(effect.kind).map(|p| p.clone());
            let reactor = self.reactor.clone();
            let tx = tx.clone();
            let telemetry = telemetry.clone();
            let compute_budget = compute_budget.clone();
            let required = effect.required;
            let handle = tokio::spawn(async move {
                let outcome = run_effect_with_budget(
                    effect,
                    effector,
                    pool,
                    &reactor,
                    &compute_budget,
                    need_sequence,
                    &telemetry,
                )
                .await;
                let _ = tx.send((required, outcome));
            });
            handles.push(handle);
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        let mut resolved = false;
        while let Some((required, outcome)) = rx.recv().await {
            let progress = join_state.record(&outcome, required);
            outcomes.push(outcome);
            match progress {
                JoinProgress::Pending => continue,
                JoinProgress::Satisfied => {
                    resolved = true;
                    break;
                }
                JoinProgress::Failed => {
                    for handle in &handles {
                        handle.abort();
                    }
                    return Err(join_state
                        .first_failure()
                        .cloned()
                        .unwrap_or_else(|| Error::new(Kind::Internal, "need", "join")));
                }
            }
        }

        if resolved {
            for handle in &handles {
                handle.abort();
            }
        }

        let completed = join_state.completed();
        let failed = join_state.failed();
        Ok((outcomes, completed, failed))
    }

    async fn dispatch_sequential(
        &self,
        effects: Vec<Effect>,
        join: Join,
        need_sequence: u64,
        compute_budget: &Arc<RequestComputeBudget>,
        telemetry: &TelemetryHandle,
    ) -> Result<(Vec<EffectOutcome>, usize, usize), Error> {
        let required_count = effects.iter().filter(|e| e.required).count();
        let total = effects.len();
        let mut join_state = JoinState::new(join, total, required_count);
        let mut outcomes = Vec::with_capacity(total);

        for effect in effects {
            let required = effect.required;
            let effector = self.find_effector(&effect).cloned();
            let pool = self.pool_for(effect.kind).map(|p| p.clone());
            let outcome = run_effect_with_budget(
                effect,
                effector,
                pool,
                &self.reactor,
                compute_budget,
                need_sequence,
                telemetry,
            )
            .await;
            let progress = join_state.record(&outcome, required);
            outcomes.push(outcome);
            match progress {
                JoinProgress::Pending => continue,
                JoinProgress::Satisfied => break,
                JoinProgress::Failed => {
                    return Err(Error::new(Kind::Internal, "need", "all_required"));
                }
            }
        }

        let completed = join_state.completed();
        let failed = join_state.failed();
        Ok((outcomes, completed, failed))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome synthesized when no registered effector supports an
/// effect's kind/target, per `spec.md` §4.4's "dispatcher submission
/// failure" path — still emits the same `effect_start`/`effect_end` pair
/// a real attempt would, so telemetry sees every effect exactly once
/// regardless of whether a backend was found for it.
fn unsupported_effect_outcome(
    effect: &Effect,
    need_sequence: u64,
    telemetry: &TelemetryHandle,
) -> EffectOutcome {
    let sequence = telemetry.next_effect_sequence();
    telemetry.emit(EventKind::EffectStart {
        sequence,
        need_sequence,
        kind: effect.kind.as_str(),
        token: effect.token,
        required: effect.required,
        target: effect.target.clone(),
        timeout_ms: effect.timeout.as_millis() as u64,
    });
    let error = Error::new(Kind::Internal, "effector", effect.target.clone());
    telemetry.emit(EventKind::EffectEnd {
        sequence,
        kind: effect.kind.as_str(),
        success: false,
        bytes: None,
        error: Some(error.clone()),
        duration_ms: 0,
        late: false,
    });
    EffectOutcome {
        token: effect.token,
        result: Err(error),
        attempts: 0,
        late: false,
    }
}

/// The outcome synthesized when the dispatcher refuses to submit an
/// effect at all, e.g. a `Compute`-kind effect while the scheduler's
/// compute pool is `Disabled`. Still emits the usual telemetry pair so
/// this looks, from the outside, like any other failed attempt.
fn rejected_effect_outcome(
    effect: &Effect,
    need_sequence: u64,
    telemetry: &TelemetryHandle,
    error: Error,
) -> EffectOutcome {
    let sequence = telemetry.next_effect_sequence();
    telemetry.emit(EventKind::EffectStart {
        sequence,
        need_sequence,
        kind: effect.kind.as_str(),
        token: effect.token,
        required: effect.required,
        target: effect.target.clone(),
        timeout_ms: effect.timeout.as_millis() as u64,
    });
    telemetry.emit(EventKind::EffectEnd {
        sequence,
        kind: effect.kind.as_str(),
        success: false,
        bytes: None,
        error: Some(error.clone()),
        duration_ms: 0,
        late: false,
    });
    EffectOutcome {
        token: effect.token,
        result: Err(error),
        attempts: 0,
        late: false,
    }
}

/// Runs one effect to completion, gating `Compute`-kind effects through
/// `compute_budget` first (`spec.md` §4.7). Io/Timer effects bypass the
/// budget entirely — the enforcer only governs CPU-bound work.
async fn run_effect_with_budget(
    effect: Effect,
    effector: Option<Arc<dyn Effector>>,
    pool: Result<WorkerPool, Error>,
    reactor: &Arc<Reactor>,
    compute_budget: &Arc<RequestComputeBudget>,
    need_sequence: u64,
    telemetry: &TelemetryHandle,
) -> EffectOutcome {
    if effect.kind != EffectKind::Compute {
        return dispatch_one(effect, effector, pool, reactor, need_sequence, telemetry).await;
    }

    match admit_compute_budget(compute_budget, telemetry).await {
        Ok(token) => {
            let started = std::time::Instant::now();
            let outcome = dispatch_one(effect, effector, pool, reactor, need_sequence, telemetry).await;
            compute_budget.record_cpu(token, started.elapsed(), telemetry);
            compute_budget.unregister_task(token);
            outcome
        }
        Err(err) => rejected_effect_outcome(&effect, need_sequence, telemetry, err),
    }
}

/// Dispatches one effect to its effector/pool pairing, synthesizing a
/// telemetry-matched failure outcome when no effector supports it or the
/// dispatcher refuses to submit it (e.g. `pool_for` rejecting a `Compute`
/// effect while the compute pool is `Disabled`).
async fn dispatch_one(
    effect: Effect,
    effector: Option<Arc<dyn Effector>>,
    pool: Result<WorkerPool, Error>,
    reactor: &Arc<Reactor>,
    need_sequence: u64,
    telemetry: &TelemetryHandle,
) -> EffectOutcome {
    match (effector, pool) {
        (Some(effector), Ok(pool)) => {
            retry::run_with_retry(
                effector,
                effect,
                reactor,
                &pool,
                Priority::Default,
                need_sequence,
                telemetry,
            )
            .await
        }
        (None, _) => unsupported_effect_outcome(&effect, need_sequence, telemetry),
        (Some(_), Err(err)) => rejected_effect_outcome(&effect, need_sequence, telemetry, err),
    }
}

/// Admits a `Compute`-kind effect against `compute_budget`, per `spec.md`
/// §4.7: parks (sleeps, then retries registration) while the enforcer
/// says `Park`, backing its ask off by half each retry so a task that
/// can't get its preferred share still fits once the request's remaining
/// budget is smaller than what a first attempt asked for, and fails
/// outright on `Reject`. The returned token is reported back to the
/// enforcer via `record_cpu`/`unregister_task` once the effect completes.
async fn admit_compute_budget(
    compute_budget: &Arc<RequestComputeBudget>,
    telemetry: &TelemetryHandle,
) -> Result<u64, Error> {
    let token = telemetry.next_effect_sequence();
    let mut requested = compute_budget.config().max_task_cpu;
    loop {
        let spec = TaskSpec {
            token,
            requested_cpu: Some(requested),
            priority: None,
            park_on_budget_exceeded: true,
        };
        match compute_budget.register_task(spec, telemetry) {
            BudgetDecision::Allow { .. } => return Ok(token),
            BudgetDecision::Park { retry_after_ms, .. } => {
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                requested = (requested / 2).max(Duration::from_millis(1));
                continue;
            }
            BudgetDecision::Reject { reason, .. } => {
                return Err(Error::new(Kind::TooManyRequests, "compute_budget", reason));
            }
        }
    }
}
