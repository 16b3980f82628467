//! The per-request context: request metadata, the typed slot store, the
//! scratch arena, exit callbacks, and the telemetry handle, per `spec.md`
//! §3's `CtxBase` definition.

pub mod arena;
pub mod request;
pub mod view;

use std::any::TypeId;
use std::fmt::Arguments;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

pub use arena::Arena;
pub use request::{HeaderEntry, ParsedRequest, RequestIdentity};
pub use view::CtxView;

use crate::budget::{BudgetConfig, RequestComputeBudget};
use crate::error::{Error, Kind};
use crate::scheduler::pool::PoolPermit;
use crate::slot::{ErasedValue, Slot, SlotSet};
use crate::telemetry::{EventKind, TelemetryHandle};

/// A callback registered via [`CtxBase::on_exit`], run once the request
/// reaches a terminal state (`Done`, `Fail`, or an interpreter-level
/// error), in reverse registration order — LIFO, matching the teacher's
/// `RouterContext::defer` convention.
type ExitHook = Box<dyn FnOnce(&CtxBase) + Send>;

/// Owns everything a request's step pipeline can touch: the immutable
/// request metadata, the single-writer slot store, the scratch arena, and
/// bookkeeping (exit hooks, last error, HTTP status, telemetry).
///
/// `CtxBase` is built once per request by `handle_request` and lives for
/// exactly that request's duration; nothing here outlives the request.
pub struct CtxBase {
    request: ParsedRequest,
    identity: RequestIdentity,
    slots: DashMap<TypeId, ErasedValue>,
    slot_names: DashMap<TypeId, &'static str>,
    arena: Arena,
    exit_hooks: Mutex<Vec<ExitHook>>,
    last_error: Mutex<Option<Error>>,
    status: AtomicU16,
    telemetry: TelemetryHandle,
    /// Shared via `Arc` (rather than owned outright) so the dispatcher can
    /// clone a handle into a per-effect spawned task for `Compute`-kind
    /// effects' admission/`record_cpu`/`unregister_task` bookkeeping
    /// without the task borrowing from this `CtxBase`.
    compute_budget: Arc<RequestComputeBudget>,
    deadline: Option<Instant>,
    /// This request's continuation-pool permit, if it's running through
    /// the scheduler rather than inline (`handle_request_inline`, tests).
    /// `None` means there is no pool slot to release/reacquire around a
    /// `Need`'s join.
    continuation_slot: tokio::sync::Mutex<Option<PoolPermit>>,
}

impl CtxBase {
    pub fn new(request: ParsedRequest) -> Self {
        Self::new_full(request, BudgetConfig::default(), None)
    }

    /// Builds a context whose compute budget enforcer is configured from
    /// `budget_config` rather than the default, per `spec.md` §4.7 — used
    /// by `Runtime::handle_request`, which threads the process-wide
    /// `ZerverConfig::budget` through to every request it builds.
    pub fn new_with_budget(request: ParsedRequest, budget_config: BudgetConfig) -> Self {
        Self::new_full(request, budget_config, None)
    }

    /// Builds a context carrying an optional wall-clock `deadline` — the
    /// `StepExecutionContext`'s "optional deadline" from `spec.md` §3,
    /// threaded in by `Runtime::handle_request` from
    /// `ZerverConfig::default_deadline`. The interpreter checks it at
    /// every dispatch point (§4.3); `None` means no request-level
    /// deadline is enforced beyond each effect's own `timeout_ms`/
    /// `join_timeout`.
    pub fn new_full(
        request: ParsedRequest,
        budget_config: BudgetConfig,
        deadline: Option<Instant>,
    ) -> Self {
        let identity = RequestIdentity::new();
        let telemetry = TelemetryHandle::new(identity.request_id);
        telemetry.emit(EventKind::RequestStart {
            method: request.method.clone(),
            path: request.path.clone(),
        });
        Self {
            request,
            identity,
            slots: DashMap::new(),
            slot_names: DashMap::new(),
            arena: Arena::new(),
            exit_hooks: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            status: AtomicU16::new(0),
            telemetry,
            compute_budget: Arc::new(RequestComputeBudget::new(budget_config)),
            deadline,
            continuation_slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a read/write-scoped [`CtxView`] for a step declaring read
    /// set `R` and write set `W`.
    pub fn view<R: SlotSet, W: SlotSet>(&self) -> CtxView<'_, R, W> {
        CtxView::new(self)
    }

    /// Writes a slot's value. Fails with `Kind::Internal` if the slot was
    /// already written — slots are single-writer for the lifetime of the
    /// request, per `spec.md` §4.1.
    pub(crate) fn put<S: Slot>(&self, value: S::Value) -> Result<(), Error> {
        let key = TypeId::of::<S>();
        if self.slots.contains_key(&key) {
            return Err(Error::new(Kind::Internal, "slot", S::NAME));
        }
        let size_bytes = std::mem::size_of::<S::Value>();
        self.slots.insert(key, Box::new(value));
        self.slot_names.insert(key, S::NAME);
        self.telemetry.emit(EventKind::SlotWrite {
            slot: S::NAME,
            size_bytes,
        });
        Ok(())
    }

    /// Reads a slot's value, if written.
    pub(crate) fn get<S: Slot>(&self) -> Option<&S::Value> {
        let entry = self.slots.get(&TypeId::of::<S>())?;
        // SAFETY: values are only ever inserted under their own `S`'s
        // `TypeId`, so a hit for `TypeId::of::<S>()` is always a boxed
        // `S::Value`. The returned reference borrows from the `DashMap`
        // entry guard; extending it to `&self`'s lifetime is sound because
        // entries are append-only (single-writer) and never removed or
        // moved for the life of `self`.
        let value_ptr = entry.downcast_ref::<S::Value>()? as *const S::Value;
        drop(entry);
        Some(unsafe { &*value_ptr })
    }

    // --- request metadata, mirroring `ParsedRequest`'s accessors -------

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.request.header_all(name)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query(name)
    }

    pub fn client_addr(&self) -> Option<std::net::SocketAddr> {
        self.request.client_addr
    }

    pub fn body(&self) -> &bytes::Bytes {
        &self.request.body
    }

    pub fn request_id(&self) -> uuid::Uuid {
        self.identity.request_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.identity.elapsed_ms()
    }

    /// Whether this request's deadline, if any, has already elapsed.
    /// Checked by the interpreter before running the next step and
    /// before dispatching a `Need`'s effects — "at any dispatch point"
    /// per `spec.md` §4.3.
    pub fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time remaining until this request's deadline, if one was set.
    /// Used to bound a parked `Need`'s join wait so a request-level
    /// deadline can cut a join short even when it's tighter than the
    /// `Need`'s own `join_timeout`.
    pub fn deadline_remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    // --- arena ------------------------------------------------------

    pub fn buf_fmt(&self, args: Arguments<'_>) -> Result<&str, Error> {
        self.arena.buf_fmt(args)
    }

    pub fn to_json<T: serde::Serialize>(&self, value: &T) -> Result<&str, Error> {
        self.arena.to_json(value)
    }

    // --- exit hooks, status, last error ------------------------------

    /// Registers a callback run when the request reaches a terminal state.
    /// Hooks run in reverse registration order, each isolated from the
    /// others' panics/errors by the runner (a hook that errors is logged,
    /// not propagated, since exit hooks run after the response outcome is
    /// already decided).
    pub fn on_exit(&self, hook: impl FnOnce(&CtxBase) + Send + 'static) {
        self.exit_hooks.lock().push(Box::new(hook));
    }

    /// Runs all registered exit hooks in LIFO order. Called exactly once,
    /// by the interpreter, when a request's pipeline reaches `Done`,
    /// `Fail`, or an interpreter-level error.
    pub(crate) fn run_exit_hooks(&self) {
        let hooks = std::mem::take(&mut *self.exit_hooks.lock());
        for hook in hooks.into_iter().rev() {
            hook(self);
        }
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Relaxed);
    }

    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn set_last_error(&self, error: Error) {
        *self.last_error.lock() = Some(error);
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    pub fn log_debug(&self, message: &str) {
        tracing::debug!(request_id = %self.identity.request_id, message);
    }

    pub fn telemetry(&self) -> &TelemetryHandle {
        &self.telemetry
    }

    /// This request's compute budget enforcer, per `spec.md` §4.7 —
    /// compute-bound steps register, check in, and unregister against
    /// this rather than a process-wide singleton, since budgets are
    /// scoped per request.
    pub fn compute_budget(&self) -> &Arc<RequestComputeBudget> {
        &self.compute_budget
    }

    /// Records this request's continuation-pool permit, called once by
    /// `Scheduler::submit_request` before running the pipeline. Left
    /// unset for inline/test runs.
    pub(crate) async fn set_continuation_slot(&self, slot: PoolPermit) {
        *self.continuation_slot.lock().await = Some(slot);
    }

    /// Releases this request's continuation-pool permit for the duration
    /// of a `Need`'s join, per `spec.md` §4.5. A no-op if this context
    /// isn't running through the continuation pool.
    pub(crate) async fn release_continuation_slot(&self) {
        if let Some(slot) = self.continuation_slot.lock().await.as_mut() {
            slot.release();
        }
    }

    /// Reacquires this request's continuation-pool permit to run its
    /// continuation, waiting if the pool is currently full.
    pub(crate) async fn reacquire_continuation_slot(&self) {
        if let Some(slot) = self.continuation_slot.lock().await.as_mut() {
            slot.reacquire().await;
        }
    }
}
