//! Typed, per-request slots.
//!
//! A slot is declared as a zero-sized marker type carrying its value type as
//! an associated type. Two slots never collide even if they share a display
//! name, because the slot store keys on `TypeId::of::<S>()`, not on the
//! name — the name exists purely for tracing output (`spec.md` says
//! "insertion order is irrelevant to correctness but recorded for tracing";
//! the same is true of the display name).
//!
//! Application code declares slots with [`slot!`] rather than implementing
//! [`Slot`] by hand:
//!
//! ```
//! zerver_core::slot!(TodoItem: serde_json::Value);
//! zerver_core::slot!(UserId: String);
//! ```

use std::any::{Any, TypeId};

/// A declared, typed per-request cell. Implemented only by the zero-sized
/// marker types the [`slot!`] macro generates — never implement this by
/// hand, since the dispatcher and interpreter assume one marker type per
/// logical slot.
pub trait Slot: 'static {
    /// The type of value stored in this slot.
    type Value: Send + Sync + 'static;

    /// Display name, used only in tracing/error output.
    const NAME: &'static str;

    #[doc(hidden)]
    fn type_id() -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Declares one or more zero-sized slot marker types.
#[macro_export]
macro_rules! slot {
    ($($(#[$meta:meta])* $name:ident : $ty:ty),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl $crate::slot::Slot for $name {
                type Value = $ty;
                const NAME: &'static str = stringify!($name);
            }
        )+
    };
}

/// A compile-time set of slots, used to parameterize [`CtxView`] read/write
/// sets. Built from tuples of [`Slot`] types via the [`slot_set!`] macro or
/// the blanket tuple impls below.
///
/// [`CtxView`]: crate::context::view::CtxView
pub trait SlotSet {
    /// Whether slot `S` is a member of this set, checked purely at the type
    /// level by the [`Member`] trait below — this method exists only so
    /// `SlotSet` has a concrete, object-safety-free shape; callers never
    /// need to invoke it, as membership is enforced by trait bounds on
    /// `CtxView::require`/`optional`/`put`, not by a runtime check.
    fn names() -> &'static [&'static str];
}

/// Marker: slot `S` is a member of set `Set`. Implemented by the
/// [`slot_set!`] macro for every slot declared in that set.
pub trait Member<S: Slot> {}

/// Declares a named slot set usable as a `CtxView` read or write set.
#[macro_export]
macro_rules! slot_set {
    ($set:ident = [$($slot:ident),* $(,)?]) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $set;

        impl $crate::slot::SlotSet for $set {
            fn names() -> &'static [&'static str] {
                &[$(<$slot as $crate::slot::Slot>::NAME),*]
            }
        }

        $(
            impl $crate::slot::Member<$slot> for $set {}
        )*
    };
}

/// An empty slot set, usable where a step declares no reads or no writes.
#[derive(Debug, Clone, Copy)]
pub struct NoSlots;

impl SlotSet for NoSlots {
    fn names() -> &'static [&'static str] {
        &[]
    }
}

/// Type-erased storage cell for a slot's value, boxed as `dyn Any` so the
/// store can hold heterogeneous slot types behind one map keyed by
/// `TypeId`. Values live as long as the request; the box itself is a thin
/// handle, the payload for arena-allocated data is just a `&'static`-shaped
/// reference borrowed for the request lifetime via unsafe lifetime
/// extension confined to [`crate::context::CtxBase`] (see that module for
/// the soundness argument).
pub(crate) type ErasedValue = Box<dyn Any + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    slot!(Foo: u32, Bar: String);
    slot_set!(Reads = [Foo]);
    slot_set!(Writes = [Bar]);

    #[test]
    fn slot_names_are_distinct() {
        assert_eq!(Foo::NAME, "Foo");
        assert_eq!(Bar::NAME, "Bar");
        assert_ne!(Foo::type_id(), Bar::type_id());
    }

    #[test]
    fn slot_sets_expose_member_names() {
        assert_eq!(Reads::names(), &["Foo"]);
        assert_eq!(Writes::names(), &["Bar"]);
    }

    fn _assert_member<S: Slot, Set: Member<S>>() {}
    #[allow(dead_code)]
    fn _compiles() {
        _assert_member::<Foo, Reads>();
        _assert_member::<Bar, Writes>();
    }
}
