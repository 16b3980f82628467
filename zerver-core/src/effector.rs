//! The seam between `zerver-core` and concrete effect backends. Backends
//! (HTTP clients, KV stores, file I/O — all living in `zerver-effects`)
//! implement [`Effector`]; the core only ever calls through the trait
//! object, per the `EffectKind` enum + `dyn Effector` REDESIGN FLAG (no
//! class hierarchy, no generic-per-backend dispatcher).

use async_trait::async_trait;

use crate::effect::{Effect, EffectKind};
use crate::error::Error;

/// A concrete effect backend. One `Effector` may handle more than one
/// `EffectKind`/target shape; [`Effector::supports`] lets the dispatcher
/// ask before routing.
#[async_trait]
pub trait Effector: Send + Sync {
    /// Whether this effector can execute `effect`. The dispatcher tries
    /// registered effectors in registration order and uses the first that
    /// returns `true`; an effect with no supporting effector fails with
    /// `Kind::Internal, what="effector", key=<target>`.
    fn supports(&self, effect: &Effect) -> bool;

    /// Executes one attempt of `effect`, returning the raw response bytes
    /// on success. The dispatcher owns retry/backoff/timeout around this
    /// call — an effector implementation should attempt exactly once per
    /// invocation and propagate failures as `Error`, not retry internally.
    async fn execute(&self, effect: &Effect) -> Result<bytes::Bytes, Error>;

    /// Best-effort cancellation of an in-flight effect, invoked by the
    /// join manager when a `FirstSuccess`/`Any` join resolves while
    /// siblings are still outstanding. Effectors for which cancellation
    /// isn't meaningful (e.g. a already-fired fire-and-forget write) may
    /// no-op.
    async fn cancel(&self, _token: &'static str) {}

    /// The [`EffectKind`]s this effector handles, used for a cheap
    /// pre-filter before calling `supports` on every registered effector.
    fn kinds(&self) -> &'static [EffectKind];
}
