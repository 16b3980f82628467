//! Worker pools: bounded, cooperative execution lanes for continuations,
//! effect dispatch, and compute-bound step work, per `spec.md` §4.6.
//!
//! Each pool is a tokio task count bounded by a `Semaphore` plus a
//! `PriorityQueue` of pending jobs; a single dispatch loop per pool pops
//! the next job under fairness/aging and spawns it once a permit is free,
//! realizing "cooperative (non-preemptive) suspension only at `Need`" —
//! a job is handed its own [`PoolPermit`] and normally holds it for its
//! entire run. The one exception is a request's continuation job, which
//! releases its permit for the duration of a `Need`'s join (`spec.md`
//! §4.5) so a request parked on I/O doesn't tie up a continuation slot.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use super::priority::{Priority, PriorityQueue};
use crate::telemetry::{EventKind, TelemetryHandle};

type Job = Box<dyn FnOnce(PoolPermit) -> futures::future::BoxFuture<'static, ()> + Send>;

/// A pool permit handed to a running job. Most jobs just hold it until
/// they finish, matching the pool's concurrency bound for their whole
/// run. A continuation job parked awaiting a `Need`'s join instead
/// releases it for the wait and reacquires it to resume running the
/// continuation, per `spec.md` §4.5 — a request stalled on I/O shouldn't
/// tie up a continuation-pool slot it isn't using.
pub struct PoolPermit {
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    pool: WorkerPool,
}

impl PoolPermit {
    pub fn release(&mut self) {
        self.permit = None;
    }

    /// Reacquires a slot in this permit's pool if it was released, waiting
    /// if the pool is currently full.
    pub async fn reacquire(&mut self) {
        if self.permit.is_none() {
            self.permit = Some(
                self.pool
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore is never closed while the pool is alive"),
            );
        }
    }
}

/// How a [`WorkerPool`] sizes and schedules its compute lane, per
/// `spec.md` §4.6's compute pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    /// Compute-bound `Need`s are rejected outright; the dispatcher fails
    /// them with `Kind::ServiceUnavailable`.
    Disabled,
    /// Compute-bound work shares worker capacity with effect dispatch.
    Shared,
    /// Compute-bound work gets its own bounded worker pool.
    Dedicated { workers: usize },
}

/// A bounded, priority-aware lane of concurrent jobs. Cheap to clone —
/// every field is an `Arc`/channel handle onto the same dispatch loop, so
/// a clone shares the same queue and permits as the original rather than
/// spawning a second pool.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    queue: Arc<Mutex<PriorityQueue<Job>>>,
    permits: Arc<Semaphore>,
    notify: mpsc::UnboundedSender<()>,
}

impl WorkerPool {
    /// Spawns `workers` concurrent dispatch slots and returns a handle for
    /// submitting jobs. The dispatch loop itself runs on the tokio
    /// executor's own scheduler; `workers` only bounds how many jobs may
    /// be *running* at once, per the bounded-FIFO-per-pool requirement.
    pub fn spawn(name: &'static str, workers: usize, telemetry: TelemetryHandle) -> Self {
        let queue = Arc::new(Mutex::new(PriorityQueue::new()));
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();

        let pool_handle = Self {
            name,
            queue: queue.clone(),
            permits: permits.clone(),
            notify: notify_tx.clone(),
        };

        let loop_queue = queue.clone();
        let loop_permits = permits.clone();
        let loop_pool = pool_handle.clone();
        tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                loop {
                    let next = { loop_queue.lock().pop() };
                    let Some((job, priority)) = next else { break };
                    let permit = loop_permits.clone().acquire_owned().await.expect(
                        "worker pool semaphore is never closed while the pool is alive",
                    );
                    telemetry.emit(EventKind::JobTaken { worker_id: 0 });
                    metrics::counter!("zerver_pool_jobs_taken_total", "pool" => name).increment(1);
                    let _ = priority;
                    let slot = PoolPermit {
                        permit: Some(permit),
                        pool: loop_pool.clone(),
                    };
                    tokio::spawn(async move {
                        job(slot).await;
                    });
                }
            }
        });

        pool_handle
    }

    /// Enqueues `job` under `priority` and wakes the dispatch loop.
    pub fn submit(
        &self,
        priority: Priority,
        telemetry: &TelemetryHandle,
        job: impl FnOnce(PoolPermit) -> futures::future::BoxFuture<'static, ()> + Send + 'static,
    ) {
        let depth_start = {
            let mut queue = self.queue.lock();
            queue.push(priority, Box::new(job));
            queue.len()
        };
        telemetry.emit(EventKind::JobEnqueued {
            queue: self.name,
            depth_start,
        });
        metrics::gauge!("zerver_pool_queue_depth", "pool" => self.name).set(depth_start as f64);
        let _ = self.notify.send(());
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
