use std::{
    cell::RefCell,
    future::Future,
    mem::{replace, swap, take},
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Mutex},
    task::{Context, Poll, Wake, Waker},
    thread::AccessError,
};

use parse_display::Display;
use slabmap::SlabMap;

mod source_binder;

pub use source_binder::SourceBinder;


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    effects: Vec<Task>,
    actions: Vec<Action>,
    spawns: Vec<Rc<FutureTask>>,
    wakes: WakeRequests,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            effects: Vec::new(),
            actions: Vec::new(),
            spawns: Vec::new(),
            wakes: WakeRequests::default(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn swap_vec<T>(f: impl FnOnce(&mut Self) -> &mut Vec<T>, values: &mut Vec<T>) -> bool {
        Self::with(|g| swap(f(g), values));
        !values.is_empty()
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn push_effect(&mut self, task: Task) {
        self.effects.push(task);
    }
    fn push_action(&mut self, action: Action) {
        self.assert_exists();
        self.actions.push(action);
    }
    fn push_spawn(&mut self, task: Rc<FutureTask>) {
        self.assert_exists();
        self.spawns.push(task);
    }
    fn finish_runtime(&mut self) {
        self.is_runtime_exists = false;
        self.effects.clear();
        self.actions.clear();
        self.spawns.clear();
        self.wakes.0.lock().unwrap().clear();
    }
}

/// Error raised when a cell write is attempted from a scope that forbids it.
///
/// Both variants are programming errors. The `try_` write entry points return them,
/// the plain entry points panic with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WriteError {
    /// A write was attempted inside an effect created without write permission.
    #[display("write not permitted from a read-only effect scope")]
    WriteNotPermitted,
    /// A write was attempted inside a derived cell computation.
    #[display("illegal write during derived cell computation")]
    IllegalWrite,
}
impl std::error::Error for WriteError {}

/// Write capability of the scope a [`SignalContext`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Action,
    Compute,
    Effect { writable: bool },
}

/// Context for reading cells and tracking dependencies.
///
/// Reads performed through a `SignalContext` register the scope's current consumer
/// (a derived cell or an effect) as a subscriber of the source that was read.
/// The context also carries the scope's write capability: writes from derived
/// computations and read-only effects fail with a [`WriteError`].
pub struct SignalContext<'s> {
    scope: ScopeKind,
    sink: Option<&'s mut Sink>,
}

impl<'s> SignalContext<'s> {
    pub(crate) fn action() -> Self {
        Self {
            scope: ScopeKind::Action,
            sink: None,
        }
    }
    pub(crate) fn check_write(&self) -> Result<(), WriteError> {
        match self.scope {
            ScopeKind::Action | ScopeKind::Effect { writable: true } => Ok(()),
            ScopeKind::Compute => Err(WriteError::IllegalWrite),
            ScopeKind::Effect { writable: false } => Err(WriteError::WriteNotPermitted),
        }
    }

    /// Call a function with a `SignalContext` that does not track dependencies.
    ///
    /// Reads inside `f` (including reads performed by subroutines `f` calls) do not
    /// subscribe the current consumer to anything. The write capability of the scope
    /// is unchanged.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext<'s>) -> T) -> T {
        struct UntrackGuard<'s, 'a> {
            sc: &'a mut SignalContext<'s>,
            sink: Option<&'s mut Sink>,
        }
        impl Drop for UntrackGuard<'_, '_> {
            fn drop(&mut self) {
                self.sc.sink = self.sink.take();
            }
        }
        f(UntrackGuard {
            sink: self.sink.take(),
            sc: self,
        }
        .sc)
    }
}

/// Identifies one of multiple inputs of a dependency consumer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Slot(pub usize);

/// Identifies a subscriber entry within a source's [`SinkBindings`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BindKey(usize);

/// A dependency consumer. Notified when a source it subscribed to changes.
pub trait BindSink: 'static {
    fn notify(self: Rc<Self>, slot: Slot);
}

/// A dependency source. Keeps a set of subscribers and releases them on unbind.
pub trait BindSource: 'static {
    fn unbind(self: Rc<Self>, slot: Slot, key: BindKey);
}

struct SourceBinding {
    source: Rc<dyn BindSource>,
    slot: Slot,
    key: BindKey,
}
impl SourceBinding {
    fn is_same(&self, node: &Rc<dyn BindSource>, slot: Slot) -> bool {
        Rc::ptr_eq(&self.source, node) && self.slot == slot
    }
    fn unbind(self) {
        let Self { source, slot, key } = self;
        source.unbind(slot, key);
    }
}

/// The set of sources a consumer read during its last run.
///
/// Recaptured on every run, so the dependency set may differ between runs.
#[derive(Default)]
pub struct SourceBindings(Vec<SourceBinding>);

impl SourceBindings {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn update<T>(
        &mut self,
        sink: Weak<dyn BindSink>,
        slot: Slot,
        scope: ScopeKind,
        f: impl FnOnce(&mut SignalContext) -> T,
    ) -> T {
        let mut sink = Sink {
            sink,
            slot,
            sources: take(self),
            sources_len: 0,
        };
        let mut sc = SignalContext {
            scope,
            sink: Some(&mut sink),
        };
        let ret = f(&mut sc);
        let sources_len = sink.sources_len;
        *self = sink.sources;
        for b in self.0.drain(sources_len..) {
            b.unbind();
        }
        ret
    }
    pub fn clear(&mut self) {
        for b in self.0.drain(..) {
            b.unbind();
        }
    }
}
impl Drop for SourceBindings {
    fn drop(&mut self) {
        for b in self.0.drain(..) {
            b.unbind();
        }
    }
}

struct SinkBinding {
    sink: Weak<dyn BindSink>,
    slot: Slot,
}

impl SinkBinding {
    fn notify(&self) {
        if let Some(node) = self.sink.upgrade() {
            node.notify(self.slot)
        }
    }
}

/// The subscribers currently depending on a source.
#[derive(Default)]
pub struct SinkBindings(SlabMap<SinkBinding>);

impl SinkBindings {
    pub fn new() -> Self {
        Self(SlabMap::new())
    }
    /// Registers the context's current consumer, if any, as a subscriber of `this`.
    pub fn bind(&mut self, this: Rc<dyn BindSource>, this_slot: Slot, sc: &mut SignalContext) {
        let Some(sink) = &mut sc.sink else {
            return;
        };
        let sources_index = sink.sources_len;
        if let Some(source_old) = sink.sources.0.get(sources_index) {
            if source_old.is_same(&this, this_slot) {
                sink.sources_len += 1;
                return;
            }
        }
        let key = BindKey(self.0.insert(SinkBinding {
            sink: sink.sink.clone(),
            slot: sink.slot,
        }));
        if let Some(old) = sink.push(SourceBinding {
            source: this,
            slot: this_slot,
            key,
        }) {
            old.unbind();
        }
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Removes the subscriber identified by `key`.
    pub fn unbind(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }
    /// Notifies every subscriber, synchronously, before returning.
    pub fn notify(&mut self) {
        self.0.optimize();
        for binding in self.0.values() {
            binding.notify();
        }
    }
}

struct Sink {
    sink: Weak<dyn BindSink>,
    slot: Slot,
    sources: SourceBindings,
    sources_len: usize,
}
impl Sink {
    #[must_use]
    fn push(&mut self, binding: SourceBinding) -> Option<SourceBinding> {
        let index = self.sources_len;
        self.sources_len += 1;
        if index < self.sources.0.len() {
            Some(replace(&mut self.sources.0[index], binding))
        } else {
            self.sources.0.push(binding);
            None
        }
    }
}

/// A scheduled re-run of a dependency consumer.
pub(crate) struct Task(Box<dyn FnOnce()>);

impl Task {
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, f: impl Fn(Rc<T>) + 'static) -> Self {
        Task(Box::new(move || {
            if let Some(this) = this.upgrade() {
                f(this)
            }
        }))
    }
    pub fn schedule(self) {
        let _ = Globals::try_with(|g| g.push_effect(self));
    }
    fn run(self) {
        (self.0)()
    }
}

struct Action(Box<dyn FnOnce(&mut SignalContext)>);

impl Action {
    fn run(self, sc: &mut SignalContext) {
        (self.0)(sc)
    }
}

/// Schedules a function to run with a write-permitted [`SignalContext`].
///
/// The function runs when [`Runtime::run_actions`] (or [`Runtime::update`]) is called.
/// Panics if no [`Runtime`] exists on this thread.
pub fn spawn_action(f: impl FnOnce(&mut SignalContext) + 'static) {
    Globals::with(|g| g.push_action(Action(Box::new(f))));
}

pub(crate) fn spawn_future(task: Rc<FutureTask>) {
    Globals::with(|g| g.push_spawn(task));
}

/// A cooperatively cancellable future owned by the runtime.
///
/// `data` is `None` once the future finished or was cancelled; a cancelled
/// future never runs again and its eventual wake-ups are no-ops.
pub(crate) struct FutureTask {
    data: RefCell<Option<FutureData>>,
}

struct FutureData {
    future: Pin<Box<dyn Future<Output = ()>>>,
    waker: Option<Waker>,
}

impl FutureTask {
    pub fn new(future: impl Future<Output = ()> + 'static) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(Some(FutureData {
                future: Box::pin(future),
                waker: None,
            })),
        })
    }
    pub fn cancel(&self) {
        if let Some(data) = self.data.borrow_mut().take() {
            // Wake so the runtime drops its table entry.
            if let Some(waker) = data.waker {
                waker.wake();
            }
        }
    }
    fn is_cancelled(&self) -> bool {
        self.data.borrow().is_none()
    }
    fn set_waker(&self, waker: Waker) {
        if let Some(data) = &mut *self.data.borrow_mut() {
            data.waker = Some(waker);
        }
    }
    /// Returns `true` if the task is finished and should be removed.
    fn poll(&self) -> bool {
        let mut data = self.data.borrow_mut();
        let Some(d) = &mut *data else {
            return true;
        };
        let Some(waker) = d.waker.clone() else {
            return false;
        };
        let mut cx = Context::from_waker(&waker);
        match d.future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *data = None;
                true
            }
            Poll::Pending => false,
        }
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<Mutex<Vec<usize>>>);

impl WakeRequests {
    fn waker(&self, key: usize) -> Waker {
        Arc::new(WakeHandle {
            requests: self.clone(),
            key,
        })
        .into()
    }
    fn drain(&self, to: &mut Vec<usize>) -> bool {
        let mut woken = self.0.lock().unwrap();
        swap(&mut *woken, to);
        !to.is_empty()
    }
}

struct WakeHandle {
    requests: WakeRequests,
    key: usize,
}
impl Wake for WakeHandle {
    fn wake(self: Arc<Self>) {
        self.requests.0.lock().unwrap().push(self.key);
    }
}

/// Reactive runtime.
///
/// Drives scheduled effect runs, deferred write actions and in-flight intent
/// futures on a single thread. Only one `Runtime` can exist per thread.
pub struct Runtime {
    futures: SlabMap<Rc<FutureTask>>,
    wakes: WakeRequests,
    effects_buffer: Vec<Task>,
    actions_buffer: Vec<Action>,
    spawns_buffer: Vec<Rc<FutureTask>>,
    woken_buffer: Vec<usize>,
}

impl Runtime {
    pub fn new() -> Self {
        let wakes = Globals::with(|g| {
            if replace(&mut g.is_runtime_exists, true) {
                panic!("Only one `Runtime` can exist in the same thread at the same time.");
            }
            g.wakes.clone()
        });
        Self {
            futures: SlabMap::new(),
            wakes,
            effects_buffer: Vec::new(),
            actions_buffer: Vec::new(),
            spawns_buffer: Vec::new(),
            woken_buffer: Vec::new(),
        }
    }

    /// Obtains a top-level, write-permitted [`SignalContext`].
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::action()
    }

    /// Runs scheduled write actions.
    ///
    /// Returns `true` if any action was performed.
    pub fn run_actions(&mut self) -> bool {
        let mut handled = false;
        let mut actions = take(&mut self.actions_buffer);
        while Globals::swap_vec(|g| &mut g.actions, &mut actions) {
            for action in actions.drain(..) {
                action.run(&mut self.sc());
                handled = true;
            }
        }
        self.actions_buffer = actions;
        handled
    }

    /// Runs scheduled effect re-runs.
    ///
    /// Returns `true` if any effect was run.
    pub fn run_effects(&mut self) -> bool {
        let mut handled = false;
        let mut effects = take(&mut self.effects_buffer);
        while Globals::swap_vec(|g| &mut g.effects, &mut effects) {
            for task in effects.drain(..) {
                task.run();
                handled = true;
            }
        }
        self.effects_buffer = effects;
        handled
    }

    /// Polls newly dispatched and woken intent futures.
    ///
    /// Returns `true` if any future was polled.
    pub fn run_intents(&mut self) -> bool {
        let mut handled = false;
        let mut spawns = take(&mut self.spawns_buffer);
        while Globals::swap_vec(|g| &mut g.spawns, &mut spawns) {
            for task in spawns.drain(..) {
                if task.is_cancelled() {
                    continue;
                }
                let key = self.futures.insert(task.clone());
                task.set_waker(self.wakes.waker(key));
                if task.poll() {
                    self.futures.remove(key);
                }
                handled = true;
            }
        }
        self.spawns_buffer = spawns;

        let mut woken = take(&mut self.woken_buffer);
        while self.wakes.drain(&mut woken) {
            for key in woken.drain(..) {
                if let Some(task) = self.futures.get(key) {
                    let task = task.clone();
                    if task.poll() {
                        self.futures.remove(key);
                    }
                    handled = true;
                }
            }
        }
        self.woken_buffer = woken;
        handled
    }

    /// Repeats [`run_actions`](Self::run_actions), [`run_intents`](Self::run_intents)
    /// and [`run_effects`](Self::run_effects) until there is nothing left to do.
    pub fn update(&mut self) {
        loop {
            if self.run_actions() {
                continue;
            }
            if self.run_intents() {
                continue;
            }
            if self.run_effects() {
                continue;
            }
            break;
        }
    }

    fn cancel_futures(&mut self) {
        for task in self.futures.values() {
            task.cancel();
        }
        self.futures = SlabMap::new();
        let mut spawns = Vec::new();
        Globals::swap_vec(|g| &mut g.spawns, &mut spawns);
        for task in spawns {
            task.cancel();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.cancel_futures();
        let _ = Globals::try_with(|g| g.finish_runtime());
    }
}
