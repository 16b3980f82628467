//! The event reactor adapter: the narrow, non-blocking submission surface
//! effectors use to register I/O and timers with the tokio runtime, per
//! `spec.md` §4.5.
//!
//! `zerver-core` doesn't implement its own reactor — tokio's is the
//! reactor — but it does not let effectors (or anything else) reach
//! into the scheduler directly either. This module is that boundary: a
//! small `submit_work`/`submit_timer`/`close` surface that re-enters the
//! scheduler only through the narrow [`CompletionPort`] callback, never
//! through a back-reference, per the REDESIGN FLAGS "no back-reference
//! cycles" requirement.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Narrow callback surface the reactor uses to report completion back
/// into whatever is waiting (the dispatcher's retry/join machinery). Kept
/// as a trait object rather than a generic so the reactor itself never
/// needs to know about `Dispatcher`, `JoinState`, or anything upstream of
/// it — only this one-method contract.
pub trait CompletionPort: Send + Sync {
    fn complete(&self, result: Result<bytes::Bytes, crate::error::Error>);
}

/// A handle to a submitted unit of reactor work, usable to cancel it
/// before it completes.
pub struct WorkHandle {
    join: JoinHandle<()>,
}

impl WorkHandle {
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// Awaits this unit of reactor work running to completion. The
    /// result itself already went to the work's [`CompletionPort`]; this
    /// is for a caller (the dispatcher's worker pool) that wants to hold
    /// a resource — a pool permit — for as long as the work is in
    /// flight, not just until it was handed to the reactor.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

/// The reactor adapter itself. Stateless beyond what tokio's own runtime
/// handle carries; cheap to clone and share as `Arc<Reactor>`.
#[derive(Clone, Default)]
pub struct Reactor;

impl Reactor {
    pub fn new() -> Self {
        Self
    }

    /// Submits a unit of non-blocking work (typically an effector's
    /// `execute` future) to run on the tokio runtime, reporting its
    /// outcome through `port` once it resolves.
    pub fn submit_work(
        &self,
        port: Arc<dyn CompletionPort>,
        work: Pin<Box<dyn Future<Output = Result<bytes::Bytes, crate::error::Error>> + Send>>,
    ) -> WorkHandle {
        let join = tokio::spawn(async move {
            let result = work.await;
            port.complete(result);
        });
        WorkHandle { join }
    }

    /// Submits a pure delay, reporting completion through `port` once
    /// `duration` elapses. Used for a `Need`'s join timeout and for
    /// `EffectKind::Timer` effects.
    pub fn submit_timer(&self, port: Arc<dyn CompletionPort>, duration: Duration) -> WorkHandle {
        let join = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            port.complete(Ok(bytes::Bytes::new()));
        });
        WorkHandle { join }
    }

    /// Closes the reactor. A no-op today since the reactor holds no
    /// resources beyond the shared tokio runtime, which outlives any one
    /// `Reactor` handle; kept as an explicit method so callers (and
    /// `zerver-http`'s shutdown sequence) have one place to call during
    /// graceful shutdown regardless of what the reactor grows to own
    /// later.
    pub fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturePort(Mutex<Option<Result<bytes::Bytes, crate::error::Error>>>);

    impl CompletionPort for CapturePort {
        fn complete(&self, result: Result<bytes::Bytes, crate::error::Error>) {
            *self.0.lock().unwrap() = Some(result);
        }
    }

    #[tokio::test]
    async fn submit_work_reports_through_completion_port() {
        let reactor = Reactor::new();
        let port = Arc::new(CapturePort(Mutex::new(None)));
        let handle = reactor.submit_work(
            port.clone(),
            Box::pin(async { Ok(bytes::Bytes::from_static(b"done")) }),
        );
        let _ = handle.join.await;
        assert!(port.0.lock().unwrap().as_ref().unwrap().is_ok());
    }
}
