//! `CtxView<'a, R, W>`: the compile-time-checked projection through which
//! step bodies touch the context. `R` and `W` are [`SlotSet`] marker types;
//! a step can only `require`/`optional` slots that are `Member<S, R>` and
//! can only `put` slots that are `Member<S, W>`, so an undeclared slot
//! access is a compile error, not a runtime panic — the central guarantee
//! `spec.md` §3 asks for.

use std::marker::PhantomData;

use crate::context::CtxBase;
use crate::error::Error;
use crate::slot::{Member, Slot, SlotSet};

/// A read/write-scoped view over a [`CtxBase`], parameterized by the slot
/// sets `R` (readable) and `W` (writable) the current step declared.
pub struct CtxView<'a, R: SlotSet, W: SlotSet> {
    base: &'a CtxBase,
    _reads: PhantomData<R>,
    _writes: PhantomData<W>,
}

impl<'a, R: SlotSet, W: SlotSet> CtxView<'a, R, W> {
    pub(crate) fn new(base: &'a CtxBase) -> Self {
        Self {
            base,
            _reads: PhantomData,
            _writes: PhantomData,
        }
    }

    /// Reads a required slot. Returns `Err(Kind::Internal)` if the slot was
    /// never written — a prior step in the pipeline is expected to have
    /// produced it, so a miss here is a pipeline wiring bug, not user
    /// input, per `spec.md` §4.1's `require` contract.
    pub fn require<S>(&self) -> Result<&S::Value, Error>
    where
        S: Slot,
        R: Member<S>,
    {
        self.base
            .get::<S>()
            .ok_or_else(|| Error::internal("slot", S::NAME))
    }

    /// Reads an optional slot, returning `None` if it was never written.
    pub fn optional<S>(&self) -> Option<&S::Value>
    where
        S: Slot,
        R: Member<S>,
    {
        self.base.get::<S>()
    }

    /// Writes a slot. Fails with `Kind::Internal` if the slot already has a
    /// value — slots are single-writer, per `spec.md` §4.1's "duplicate
    /// `put` is a fatal wiring error" edge case.
    pub fn put<S>(&self, value: S::Value) -> Result<(), Error>
    where
        S: Slot,
        W: Member<S>,
    {
        self.base.put::<S>(value)
    }

    /// Direct access to the underlying [`CtxBase`] for request-metadata
    /// accessors (`method`, `path`, `header`, ...) that aren't
    /// slot-scoped.
    pub fn base(&self) -> &CtxBase {
        self.base
    }
}

// `CtxView` is a read-only-by-construction borrow wrapper; deriving `Copy`
// would be surprising given the `base` reference, so it's left `!Copy` and
// steps take it by value per call (it's already just a fat pointer plus two
// zero-sized markers).
