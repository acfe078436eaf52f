use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::{
    core::{BindKey, BindSource, SinkBindings, Slot},
    SignalContext, WriteError,
};


/// A mutable observable storage location.
///
/// Similar to `Rc<RefCell<T>>`, but reads performed through a [`SignalContext`]
/// subscribe the reading consumer to changes, and writes notify all subscribers
/// synchronously before returning.
///
/// Writes are permitted from top-level scopes ([`Runtime::sc`](crate::core::Runtime::sc)),
/// scheduled actions and write-permitted effects. Writes from derived computations
/// and read-only effects fail with a [`WriteError`].
#[derive(Default)]
#[derive_ex(Clone, bound())]
pub struct Cell<T: 'static>(Rc<RawCell<T>>);

impl<T: 'static> Cell<T> {
    /// Create a new `Cell` with the given initial value.
    pub fn new(value: T) -> Self {
        Self(Rc::new(RawCell {
            sinks: RefCell::new(SinkBindings::new()),
            value: RefCell::new(value),
        }))
    }

    /// Obtains a reference to the current value and subscribes the context's
    /// current consumer, if any, to this cell.
    pub fn borrow(&self, sc: &mut SignalContext) -> Ref<'_, T> {
        self.0.bind(sc);
        self.0.value.borrow()
    }

    /// Gets the current value and subscribes the context's current consumer,
    /// if any, to this cell.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Obtains a reference to the current value without subscribing anything.
    pub fn untracked(&self) -> Ref<'_, T> {
        self.0.value.borrow()
    }

    /// Sets the value and notifies subscribers only if it differs from the
    /// current value.
    ///
    /// Returns a [`WriteError`] if the scope forbids writes. Notification is
    /// synchronous: every subscriber is marked dirty before this returns
    /// (effect re-runs are scheduled, not run inline).
    pub fn try_set(&self, value: T, sc: &mut SignalContext) -> Result<(), WriteError>
    where
        T: PartialEq,
    {
        sc.check_write()?;
        let mut current = self.0.borrow_value_mut();
        if *current != value {
            *current = value;
            drop(current);
            self.0.notify();
        }
        Ok(())
    }

    /// Sets the value and notifies subscribers only if it differs from the
    /// current value.
    ///
    /// Panics if the scope forbids writes; use [`try_set`](Self::try_set) to
    /// handle the error instead.
    pub fn set(&self, value: T, sc: &mut SignalContext)
    where
        T: PartialEq,
    {
        if let Err(e) = self.try_set(value, sc) {
            panic!("{e}");
        }
    }

    /// Sets the value and notifies subscribers unconditionally.
    ///
    /// For types where structural comparison is unavailable or undesirable.
    /// Returns a [`WriteError`] if the scope forbids writes.
    pub fn try_replace(&self, value: T, sc: &mut SignalContext) -> Result<(), WriteError> {
        sc.check_write()?;
        *self.0.borrow_value_mut() = value;
        self.0.notify();
        Ok(())
    }

    /// Sets the value and notifies subscribers unconditionally.
    ///
    /// Panics if the scope forbids writes.
    pub fn replace(&self, value: T, sc: &mut SignalContext) {
        if let Err(e) = self.try_replace(value, sc) {
            panic!("{e}");
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => std::fmt::Debug::fmt(&*value, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
impl<T> Serialize for Cell<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.0.value.try_borrow() {
            Ok(value) => T::serialize(&*value, serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}
impl<'de, T> Deserialize<'de> for Cell<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Cell<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(|value| Cell::new(value))
    }
}

#[derive(Default)]
struct RawCell<T: 'static> {
    sinks: RefCell<SinkBindings>,
    value: RefCell<T>,
}
impl<T: 'static> RawCell<T> {
    fn bind(self: &Rc<Self>, sc: &mut SignalContext) {
        self.sinks.borrow_mut().bind(self.clone(), Slot(0), sc);
    }
    fn borrow_value_mut(&self) -> std::cell::RefMut<'_, T> {
        match self.value.try_borrow_mut() {
            Ok(value) => value,
            Err(_) => panic!("detect cyclic dependency"),
        }
    }
    fn notify(&self) {
        self.sinks.borrow_mut().notify();
    }
}

impl<T: 'static> BindSource for RawCell<T> {
    fn unbind(self: Rc<Self>, _slot: Slot, key: BindKey) {
        self.sinks.borrow_mut().unbind(key);
    }
}
