//! Per-effect retry/backoff, per `spec.md` §4.4: exponential backoff with
//! jitter, bounded by the effect's [`RetryPolicy`], retried only while the
//! failure is transient.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use rand::Rng;

use crate::effect::{Effect, EffectOutcome};
use crate::effector::Effector;
use crate::error::Error;
use crate::reactor::{CompletionPort, Reactor};
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::Priority;
use crate::telemetry::{EventKind, TelemetryHandle};

/// Runs `effect` against `effector`, retrying transient failures under
/// `effect.retry` until it succeeds, exhausts its attempt budget, or fails
/// with a non-transient error. Each attempt is submitted to `pool` and
/// actually executed through `reactor`, so effect concurrency shares the
/// same bound and cancellation seam as the rest of the scheduler (`spec.md`
/// §4.5), rather than running on an unbounded tokio task.
///
/// The same `effect.idempotency_key` (if any) is presented to the
/// effector on every attempt, so a write effector can dedupe retried
/// attempts against a prior one that actually reached its backend before
/// the timeout fired — `spec.md` §4.4's idempotency-key semantics for
/// write-effect retries. The dispatcher does not itself dedupe; that's an
/// effector-side concern.
pub async fn run_with_retry(
    effector: Arc<dyn Effector>,
    effect: Effect,
    reactor: &Arc<Reactor>,
    pool: &WorkerPool,
    priority: Priority,
    need_sequence: u64,
    telemetry: &TelemetryHandle,
) -> EffectOutcome {
    // One `effect_start` per attempt, one `effect_end` for the final
    // outcome — `spec.md` §8 scenario 4: "three `effect_start` events;
    // final `effect_end`" for an effect retried twice. All attempts of one
    // effect share the same `sequence` so a subscriber can correlate them.
    let sequence = telemetry.next_effect_sequence();

    let mut attempt = 0u32;
    let batch_started = Instant::now();
    loop {
        attempt += 1;
        telemetry.emit(EventKind::EffectStart {
            sequence,
            need_sequence,
            kind: effect.kind.as_str(),
            token: effect.token,
            required: effect.required,
            target: effect.target.clone(),
            timeout_ms: effect.timeout.as_millis() as u64,
        });
        let result = execute_once(&effector, &effect, reactor, pool, priority, telemetry).await;

        match &result {
            Ok(bytes) => {
                telemetry.emit(EventKind::EffectEnd {
                    sequence,
                    kind: effect.kind.as_str(),
                    success: true,
                    bytes: Some(bytes.len()),
                    error: None,
                    duration_ms: batch_started.elapsed().as_millis() as u64,
                    late: false,
                });
                return EffectOutcome {
                    token: effect.token,
                    result,
                    attempts: attempt,
                    late: false,
                };
            }
            Err(err)
                if err.is_transient()
                    && attempt < effect.retry.max_attempts
                    && (effect.idempotency_key.is_some() || effect.is_read()) =>
            {
                let jitter_sample = rand::rng().random_range(-1.0..=1.0);
                let delay = effect.retry.delay_for_attempt(attempt, jitter_sample);
                telemetry.emit(EventKind::Retry {
                    attempt,
                    reason: "transient_effect_failure",
                    backoff_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(err) => {
                telemetry.emit(EventKind::EffectEnd {
                    sequence,
                    kind: effect.kind.as_str(),
                    success: false,
                    bytes: None,
                    error: Some(err.clone()),
                    duration_ms: batch_started.elapsed().as_millis() as u64,
                    late: false,
                });
                return EffectOutcome {
                    token: effect.token,
                    result,
                    attempts: attempt,
                    late: false,
                };
            }
        }
    }
}

/// Reports an effector's outcome back through a oneshot channel, letting
/// the retry loop await a pool-submitted, reactor-run attempt the same
/// way it would await a direct call.
struct OneshotPort(StdMutex<Option<tokio::sync::oneshot::Sender<Result<bytes::Bytes, Error>>>>);

impl CompletionPort for OneshotPort {
    fn complete(&self, result: Result<bytes::Bytes, Error>) {
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }
}

/// Runs one attempt of `effect` against `effector`, routed through
/// `pool`'s concurrency bound and `reactor`'s submission surface. The job
/// submitted to `pool` holds its permit for exactly as long as the
/// reactor-run attempt takes, since it awaits the reactor's `WorkHandle`
/// to completion before returning.
async fn execute_once(
    effector: &Arc<dyn Effector>,
    effect: &Effect,
    reactor: &Arc<Reactor>,
    pool: &WorkerPool,
    priority: Priority,
    telemetry: &TelemetryHandle,
) -> Result<bytes::Bytes, Error> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let port: Arc<dyn CompletionPort> = Arc::new(OneshotPort(StdMutex::new(Some(tx))));
    let job_effector = effector.clone();
    let job_effect = effect.clone();
    let job_reactor = reactor.clone();
    let timeout = effect.timeout;

    pool.submit(priority, telemetry, move |_permit| {
        Box::pin(async move {
            let work: Pin<Box<dyn Future<Output = Result<bytes::Bytes, Error>> + Send>> =
                Box::pin(async move { job_effector.execute(&job_effect).await });
            job_reactor.submit_work(port, work).wait().await;
        })
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::internal("dispatch", "pool_dropped")),
        Err(_) => Err(Error::timeout("effect", effect.target.clone())),
    }
}
