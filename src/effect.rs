use std::{cell::RefCell, rc::Rc};

use crate::{
    core::{BindSink, ScopeKind, Slot, SourceBinder, Task},
    SignalContext, Subscription,
};

#[cfg(test)]
mod tests;

/// Call a function each time a cell it reads changes.
///
/// The function runs in a read-only scope: cell writes inside it fail with
/// [`WriteError::WriteNotPermitted`](crate::WriteError::WriteNotPermitted).
/// Reads performed by subroutines called from the function register against
/// the same scope, unless wrapped in [`SignalContext::untrack`].
///
/// The first run is scheduled at registration and performed by the next
/// [`Runtime::run_effects`](crate::core::Runtime::run_effects) or
/// [`Runtime::update`](crate::core::Runtime::update). Later runs are scheduled
/// whenever a cell read during the previous run changes; multiple changes
/// before a run coalesce into a single run.
///
/// If the [`Subscription`] returned from this function is dropped, the function
/// will not be called again.
pub fn effect(f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
    effect_raw(f, false)
}

/// Like [`effect`], but cell writes inside the function are permitted.
///
/// This is a discouraged escape hatch reserved for store-internal mediation:
/// writes from effects enable unbounded propagation chains and hide dependency
/// relationships. A write-permitted effect that writes a cell it also reads
/// loops forever (every run schedules the next).
pub fn effect_writable(f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
    effect_raw(f, true)
}

fn effect_raw(f: impl FnMut(&mut SignalContext) + 'static, writable: bool) -> Subscription {
    let node = EffectNode::new(f, writable);
    node.schedule();
    Subscription::from_rc(node)
}

struct EffectData<F> {
    f: F,
    sb: SourceBinder,
}

struct EffectNode<F> {
    data: RefCell<EffectData<F>>,
    writable: bool,
}
impl<F> EffectNode<F>
where
    F: FnMut(&mut SignalContext) + 'static,
{
    fn new(f: F, writable: bool) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            data: RefCell::new(EffectData {
                f,
                sb: SourceBinder::new(this, Slot(0)),
            }),
            writable,
        })
    }

    fn schedule(self: &Rc<Self>) {
        Task::from_weak_fn(Rc::downgrade(self), Self::call).schedule()
    }
    fn call(self: Rc<Self>) {
        let d = &mut *self.data.borrow_mut();
        if !d.sb.is_clean() {
            let scope = ScopeKind::Effect {
                writable: self.writable,
            };
            d.sb.update(scope, &mut d.f);
        }
    }
}

impl<F> BindSink for EffectNode<F>
where
    F: FnMut(&mut SignalContext) + 'static,
{
    fn notify(self: Rc<Self>, slot: Slot) {
        let need_schedule = match self.data.try_borrow_mut() {
            Ok(mut data) => data.sb.on_notify(slot),
            Err(_) => panic!("detect cyclic dependency"),
        };
        if need_schedule {
            self.schedule();
        }
    }
}
