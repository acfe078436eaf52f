use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

use derive_ex::derive_ex;

use crate::{
    core::{BindKey, BindSink, BindSource, ScopeKind, SinkBindings, Slot, SourceBinder},
    SignalContext,
};

#[cfg(test)]
mod tests;

/// A read-only value computed from other cells, memoized until a dependency changes.
///
/// The compute function runs lazily, on read, and at most once between any two
/// changes of its dependency set no matter how often the value is read in between.
/// It runs in a compute scope: cell writes inside it fail with
/// [`WriteError::IllegalWrite`](crate::WriteError::IllegalWrite).
///
/// Dependencies are dynamic: only the cells actually read during the latest
/// computation stay subscribed.
#[derive_ex(Clone, bound())]
pub struct Derived<T: 'static>(Rc<RawDerived<T>>);

impl<T: 'static> Derived<T> {
    /// Create a new `Derived` from a pure compute function.
    pub fn new(f: impl Fn(&mut SignalContext) -> T + 'static) -> Self {
        Self(RawDerived::new(Box::new(f)))
    }

    /// Obtains a reference to the current value, recomputing it first if a
    /// dependency changed, and subscribes the context's current consumer,
    /// if any, to this derived cell.
    pub fn borrow(&self, sc: &mut SignalContext) -> Ref<'_, T> {
        self.0.ensure_fresh();
        self.0.bind(sc);
        let data = match self.0.data.try_borrow() {
            Ok(data) => data,
            Err(_) => panic!("detect cyclic dependency"),
        };
        Ref::map(data, |d| match &d.value {
            Some(value) => value,
            None => unreachable!("fresh derived cell has a value"),
        })
    }

    /// Gets the current value, recomputing it first if a dependency changed,
    /// and subscribes the context's current consumer, if any, to this derived cell.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.data.try_borrow() {
            Ok(data) => match &data.value {
                Some(value) => std::fmt::Debug::fmt(value, f),
                None => write!(f, "<uncomputed>"),
            },
            Err(_) => write!(f, "<computing>"),
        }
    }
}

struct DerivedData<T> {
    compute: Box<dyn Fn(&mut SignalContext) -> T>,
    value: Option<T>,
    sb: SourceBinder,
}

struct RawDerived<T: 'static> {
    data: RefCell<DerivedData<T>>,
    sinks: RefCell<SinkBindings>,
}

impl<T: 'static> RawDerived<T> {
    fn new(compute: Box<dyn Fn(&mut SignalContext) -> T>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            data: RefCell::new(DerivedData {
                compute,
                value: None,
                sb: SourceBinder::new(this, Slot(0)),
            }),
            sinks: RefCell::new(SinkBindings::new()),
        })
    }
    fn bind(self: &Rc<Self>, sc: &mut SignalContext) {
        self.sinks.borrow_mut().bind(self.clone(), Slot(0), sc);
    }
    fn ensure_fresh(self: &Rc<Self>) {
        let mut data = match self.data.try_borrow_mut() {
            Ok(data) => data,
            Err(_) => panic!("detect cyclic dependency"),
        };
        let d = &mut *data;
        if !d.sb.is_clean() {
            let compute = &d.compute;
            d.value = Some(d.sb.update(ScopeKind::Compute, |sc| compute(sc)));
        }
    }
}

impl<T: 'static> BindSource for RawDerived<T> {
    fn unbind(self: Rc<Self>, _slot: Slot, key: BindKey) {
        self.sinks.borrow_mut().unbind(key);
    }
}
impl<T: 'static> BindSink for RawDerived<T> {
    fn notify(self: Rc<Self>, slot: Slot) {
        let need_notify = match self.data.try_borrow_mut() {
            Ok(mut data) => data.sb.on_notify(slot),
            Err(_) => panic!("detect cyclic dependency"),
        };
        if need_notify {
            self.sinks.borrow_mut().notify();
        }
    }
}
