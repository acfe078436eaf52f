use std::rc::Weak;

use crate::SignalContext;

use super::{BindSink, ScopeKind, Slot, SourceBindings};

/// Tracks the dependency set and dirty flag of a single consumer
/// (a derived cell or an effect).
pub struct SourceBinder {
    sources: SourceBindings,
    dirty: bool,
    sink: Weak<dyn BindSink>,
    slot: Slot,
}
impl SourceBinder {
    pub fn new(sink: &Weak<impl BindSink>, slot: Slot) -> Self {
        Self {
            sources: SourceBindings::new(),
            dirty: true,
            sink: sink.clone(),
            slot,
        }
    }
    pub fn is_clean(&self) -> bool {
        !self.dirty
    }

    /// Runs `f` in a tracked scope of the given kind, recapturing the dependency set.
    pub(crate) fn update<T>(
        &mut self,
        scope: ScopeKind,
        f: impl FnOnce(&mut SignalContext) -> T,
    ) -> T {
        self.dirty = false;
        self.sources.update(self.sink.clone(), self.slot, scope, f)
    }
    pub fn clear(&mut self) {
        self.sources.clear();
        self.dirty = true;
    }

    /// Marks this consumer dirty. Returns `true` if it was clean before,
    /// i.e. if the notification needs to be propagated or scheduled.
    pub fn on_notify(&mut self, slot: Slot) -> bool {
        if slot != self.slot {
            return false;
        }
        let need_notify = !self.dirty;
        self.dirty = true;
        need_notify
    }
}
