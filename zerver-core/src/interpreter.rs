//! The step pipeline interpreter: drives a `Vec<Box<dyn DynStep>>` to
//! completion, handling `Continue`/`Done`/`Fail`/`Need` per `spec.md`
//! §4.3's state machine.

use std::sync::Arc;
use std::time::Instant;

use crate::context::CtxBase;
use crate::decision::Decision;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::render::ErrorRenderer;
use crate::response::Response;
use crate::step::DynStep;
use crate::telemetry::{EventKind, PromoteConfig, StepOutcome};
use tracing::Instrument;

/// A compiled pipeline: an ordered list of steps run in sequence, with
/// `Need` suspending the current step and resuming via its continuation
/// once the dispatcher's join resolves.
pub struct Pipeline {
    pub layer: String,
    pub steps: Vec<Box<dyn DynStep>>,
}

impl Pipeline {
    pub fn new(layer: impl Into<String>, steps: Vec<Box<dyn DynStep>>) -> Self {
        Self {
            layer: layer.into(),
            steps,
        }
    }
}

/// The outcome of running a pipeline to completion. Per `spec.md` §4.3
/// ("never `Failed` once rendered"), a pipeline is always `Completed` with
/// a [`Response`] by the time `run` returns — a `Decision::Fail` is turned
/// into one via the configured [`ErrorRenderer`] before `run` ever gives
/// control back to the caller.
pub struct PipelineOutcome {
    pub response: Response,
    /// The error that produced `response`, if the pipeline ended via
    /// `Fail` (or a runtime-synthesized failure) rather than `Done`. Kept
    /// alongside the rendered response for telemetry/logging — the
    /// response itself is already final.
    pub error: Option<Error>,
}

impl PipelineOutcome {
    fn done(response: Response) -> Self {
        Self {
            response,
            error: None,
        }
    }

    fn failed(response: Response, error: Error) -> Self {
        Self {
            response,
            error: Some(error),
        }
    }
}

/// Runs `pipeline` against `ctx`, executing each step in order. A
/// `Continue` advances to the next step; `Done` terminates the pipeline
/// with its response; `Fail` is rendered through `error_renderer` into a
/// response and terminates the pipeline the same way (running `ctx`'s exit
/// hooks exactly once in either case); `Need` suspends, dispatches its
/// effects through `dispatcher`, and resumes by calling the continuation
/// with the joined outcomes — whose own returned `Decision` is interpreted
/// exactly the same way, including a nested `Need`.
///
/// This is the core interpreter loop named in `spec.md` §4.3. It is
/// transport-agnostic: nothing here knows about HTTP, routes, or the
/// reactor's wire-level I/O — those are `zerver-http`'s and
/// `zerver-effects`'s concerns respectively.
pub async fn run(
    pipeline: &Pipeline,
    ctx: Arc<CtxBase>,
    dispatcher: &Dispatcher,
    error_renderer: &ErrorRenderer,
    promote: &PromoteConfig,
) -> PipelineOutcome {
    let request_started = Instant::now();
    let mut index = 0usize;

    loop {
        // "If ctx.deadline < now at any dispatch point, the executor
        // short-circuits with {kind=Timeout, what="request", ...}"
        // (`spec.md` §4.3). Checked before running the next step; the
        // other dispatch point — entering a `Need` — is checked inside
        // `drive_to_next`.
        let decision = if ctx.deadline_expired() {
            Decision::Fail(Error::timeout("request", ctx.path().to_string()))
        } else {
            match pipeline.steps.get(index) {
                Some(step) => {
                    let started = Instant::now();
                    ctx.telemetry().emit(EventKind::StepStart {
                        layer: pipeline.layer.clone(),
                        name: step.name(),
                    });
                    let decision = step.run(&ctx);
                    ctx.telemetry().emit(EventKind::StepEnd {
                        layer: pipeline.layer.clone(),
                        name: step.name(),
                        outcome: outcome_of(&decision),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    decision
                }
                // Pipeline exhausted without an explicit `Done`/`Fail`; treat
                // as the empty-step-list boundary behavior `spec.md` §8
                // requires: `200 OK` with an empty body.
                None => Decision::Done(Response::empty(200)),
            }
        };

        match drive_to_next(decision, &ctx, dispatcher, promote).await {
            Settled::Done(response) => {
                ctx.set_status(response.status);
                ctx.run_exit_hooks();
                ctx.telemetry().emit(EventKind::RequestEnd {
                    status: response.status,
                    duration_ms: request_started.elapsed().as_millis() as u64,
                    error: None,
                });
                return PipelineOutcome::done(response);
            }
            Settled::Fail(err) => {
                ctx.set_last_error(err.clone());
                let response = error_renderer(&ctx, &err);
                ctx.set_status(response.status);
                ctx.run_exit_hooks();
                ctx.telemetry().emit(EventKind::RequestEnd {
                    status: response.status,
                    duration_ms: request_started.elapsed().as_millis() as u64,
                    error: Some(err.clone()),
                });
                return PipelineOutcome::failed(response, err);
            }
            Settled::Advance => index += 1,
        }
    }
}

enum Settled {
    Advance,
    Done(Response),
    Fail(Error),
}

/// Resolves one `Decision`, recursively dispatching and resuming through
/// any chain of `Need`s it produces, until it settles into
/// `Continue`/`Done`/`Fail`.
async fn drive_to_next(
    mut decision: Decision,
    ctx: &Arc<CtxBase>,
    dispatcher: &Dispatcher,
    promote: &PromoteConfig,
) -> Settled {
    loop {
        match decision {
            Decision::Continue => return Settled::Advance,
            Decision::Done(response) => return Settled::Done(response),
            Decision::Fail(err) => return Settled::Fail(err),
            Decision::Need {
                effects,
                mode,
                join,
                join_timeout,
                continuation,
            } => {
                // Second dispatch point `spec.md` §4.3 names: entering a
                // `Need` checks the deadline before submitting a single
                // effect.
                if ctx.deadline_expired() {
                    return Settled::Fail(Error::timeout("request", ctx.path().to_string()));
                }
                ctx.telemetry().emit(EventKind::JobParked {
                    cause: "need_join",
                    token: None,
                });
                // Give up this request's continuation-pool slot for the
                // duration of the join: the continuation isn't doing any
                // pool-bound work while parked on a `Need`'s effects, so
                // holding the slot would only starve other continuations
                // waiting to run (`spec.md` §4.5).
                ctx.release_continuation_slot().await;
                let dispatch = dispatcher.dispatch(
                    effects,
                    mode,
                    join,
                    join_timeout,
                    ctx.compute_budget(),
                    ctx.telemetry(),
                );
                let join_future = async {
                    if promote.debug {
                        dispatch.instrument(ctx.telemetry().promote("need_join")).await
                    } else {
                        park_with_promotion(dispatch, ctx, promote).await
                    }
                };
                // A request deadline tighter than the `Need`'s own
                // `join_timeout` still cuts the join short — outstanding
                // effects keep running to completion in their own spawned
                // tasks (`spec.md` §5's "best-effort" cancellation), but
                // their eventual results are never awaited or stored.
                let result = match ctx.deadline_remaining() {
                    Some(remaining) => match tokio::time::timeout(remaining, join_future).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::timeout("request", ctx.path().to_string())),
                    },
                    None => join_future.await,
                };
                ctx.reacquire_continuation_slot().await;
                let outcomes = match result {
                    Ok(outcomes) => {
                        ctx.telemetry().emit(EventKind::JobResumed);
                        outcomes
                    }
                    Err(err) => return Settled::Fail(err),
                };
                decision = continuation(ctx, &outcomes);
            }
        }
    }
}

/// Races a parked `Need`'s dispatch against the park-promotion threshold:
/// if it resolves first, the park never shows up as a span (the common
/// case, per `spec.md` §4.8); otherwise the remainder of the dispatch is
/// wrapped in a promoted span so slow joins get full trace context.
async fn park_with_promotion<F, T>(dispatch: F, ctx: &Arc<CtxBase>, promote: &PromoteConfig) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(dispatch);
    match tokio::time::timeout(
        std::time::Duration::from_millis(promote.park_ms),
        &mut dispatch,
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            let span = ctx.telemetry().promote("need_join");
            dispatch.instrument(span).await
        }
    }
}

fn outcome_of(decision: &Decision) -> StepOutcome {
    match decision {
        Decision::Continue => StepOutcome::Continue,
        Decision::Done(_) => StepOutcome::Done,
        Decision::Fail(_) => StepOutcome::Fail,
        Decision::Need { .. } => StepOutcome::Need,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::request::{HeaderEntry, ParsedRequest};
    use crate::decision::{Decision, Join, Mode};
    use crate::effect::{Effect, EffectKind};
    use crate::effector::Effector;
    use crate::slot::NoSlots;
    use crate::step::Step;
    use crate::{slot, slot_set};
    use crate::render::default_error_renderer;
    use async_trait::async_trait;
    use std::time::Duration;

    slot!(Loaded: String);
    slot_set!(Writes = [Loaded]);
    slot_set!(Reads = [Loaded]);

    struct EchoEffector;

    #[async_trait]
    impl Effector for EchoEffector {
        fn supports(&self, _effect: &Effect) -> bool {
            true
        }
        async fn execute(&self, effect: &Effect) -> Result<bytes::Bytes, Error> {
            Ok(bytes::Bytes::from(effect.target.clone().into_bytes()))
        }
        fn kinds(&self) -> &'static [EffectKind] {
            &[EffectKind::Io]
        }
    }

    fn ctx() -> Arc<CtxBase> {
        Arc::new(CtxBase::new(ParsedRequest {
            method: "GET".into(),
            path: "/".into(),
            headers: Vec::<HeaderEntry>::new(),
            path_params: Default::default(),
            query_params: Default::default(),
            client_addr: None,
            body: bytes::Bytes::new(),
        }))
    }

    #[tokio::test]
    async fn simple_pipeline_runs_to_done() {
        let steps = vec![
            Step::<NoSlots, NoSlots>::new("first", |_| Decision::Continue).erase(),
            Step::<NoSlots, NoSlots>::new("second", |_| Decision::Done(Response::empty(200)))
                .erase(),
        ];
        let pipeline = Pipeline::new("test", steps);
        let dispatcher = Dispatcher::new();
        let renderer = default_error_renderer();
        let outcome = run(&pipeline, ctx(), &dispatcher, &renderer, &PromoteConfig::default()).await;
        assert_eq!(outcome.response.status, 200);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn failed_step_is_rendered_into_a_response() {
        let steps = vec![Step::<NoSlots, NoSlots>::new("first", |_| {
            Decision::Fail(Error::new(crate::error::Kind::NotFound, "record", "missing"))
        })
        .erase()];
        let pipeline = Pipeline::new("test", steps);
        let dispatcher = Dispatcher::new();
        let renderer = default_error_renderer();
        let outcome = run(&pipeline, ctx(), &dispatcher, &renderer, &PromoteConfig::default()).await;
        assert_eq!(outcome.response.status, 404);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn need_suspends_and_resumes_via_continuation() {
        let steps = vec![Step::<NoSlots, Writes>::new("load", |view| {
            Decision::need(
                vec![Effect::new("load", EffectKind::Io, "record-1").with_timeout(Duration::from_secs(1))],
                Join::All,
                Box::new(move |ctx, outcomes| {
                    let body = String::from_utf8(outcomes[0].result.as_ref().unwrap().to_vec())
                        .unwrap();
                    ctx.view::<NoSlots, Writes>().put::<Loaded>(body).unwrap();
                    Decision::Continue
                }),
            )
        })
        .erase()];
        let pipeline = Pipeline::new("test", steps);
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(std::sync::Arc::new(EchoEffector));
        let context = ctx();
        let renderer = default_error_renderer();
        let outcome = run(&pipeline, context.clone(), &dispatcher, &renderer, &PromoteConfig::default()).await;
        assert_eq!(outcome.response.status, 200);
        assert_eq!(
            context.view::<Reads, NoSlots>().require::<Loaded>().unwrap(),
            "record-1"
        );
    }
}
