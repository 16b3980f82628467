//! Steps: the unit of pipeline composition, per `spec.md` §4.2.
//!
//! A step is declared with concrete read/write slot sets and a typed
//! closure over `CtxView<R, W>`; [`Step::erase`] wraps it in a
//! [`DynStep`] trampoline so the interpreter can hold a heterogeneous
//! `Vec<Box<dyn DynStep>>` pipeline without every step sharing one
//! read/write signature.

use crate::context::{CtxBase, CtxView};
use crate::decision::Decision;
use crate::slot::SlotSet;

/// A named, typed pipeline step.
pub struct Step<R: SlotSet, W: SlotSet> {
    pub name: &'static str,
    body: Box<dyn Fn(CtxView<'_, R, W>) -> Decision + Send + Sync>,
}

impl<R: SlotSet + 'static, W: SlotSet + 'static> Step<R, W> {
    pub fn new(
        name: &'static str,
        body: impl Fn(CtxView<'_, R, W>) -> Decision + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            body: Box::new(body),
        }
    }

    /// Type-erases this step into a [`DynStep`] trampoline for insertion
    /// into an interpreter pipeline.
    pub fn erase(self) -> Box<dyn DynStep> {
        Box::new(self)
    }
}

/// The type-erased form the interpreter actually drives. Every `Step<R,
/// W>` implements this by constructing a `CtxView<R, W>` over the shared
/// `CtxBase` and invoking its typed body — the read/write type parameters
/// disappear at this boundary, but the compile-time check they enforced
/// already happened at step-construction time.
pub trait DynStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, base: &CtxBase) -> Decision;
}

impl<R: SlotSet + 'static, W: SlotSet + 'static> DynStep for Step<R, W> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, base: &CtxBase) -> Decision {
        let view = base.view::<R, W>();
        (self.body)(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::request::{HeaderEntry, ParsedRequest};
    use crate::slot::NoSlots;
    use crate::{slot, slot_set};

    slot!(Greeting: String);
    slot_set!(Writes = [Greeting]);

    fn ctx() -> CtxBase {
        CtxBase::new(ParsedRequest {
            method: "GET".into(),
            path: "/".into(),
            headers: Vec::<HeaderEntry>::new(),
            path_params: Default::default(),
            query_params: Default::default(),
            client_addr: None,
            body: bytes::Bytes::new(),
        })
    }

    #[test]
    fn erased_step_runs_typed_body() {
        let step: Box<dyn DynStep> = Step::<NoSlots, Writes>::new("greet", |view| {
            view.put::<Greeting>("hi".to_string()).unwrap();
            Decision::Continue
        })
        .erase();

        let ctx = ctx();
        let decision = step.run(&ctx);
        assert!(matches!(decision, Decision::Continue));
        assert_eq!(
            ctx.view::<Writes, NoSlots>().optional::<Greeting>(),
            Some(&"hi".to_string())
        );
    }
}
