use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    future::Future,
    rc::Rc,
};

use derive_ex::derive_ex;
use futures::future::{FutureExt, LocalBoxFuture};
use parse_display::Display;

use crate::{
    core::{spawn_action, spawn_future, FutureTask},
    SignalContext,
};


/// A named request carrying a payload, handled by a [`Store`].
pub struct Intent {
    kind: &'static str,
    payload: Box<dyn Any>,
}

impl Intent {
    pub fn new(kind: &'static str, payload: impl Any) -> Self {
        Self {
            kind,
            payload: Box::new(payload),
        }
    }
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Error produced by an intent's asynchronous work.
///
/// An expected runtime condition, not a programming error: the store catches it,
/// leaves result cells untouched and forwards it to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{message}")]
pub struct IntentError {
    message: String,
}
impl IntentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}
impl std::error::Error for IntentError {}

/// Error returned by [`Store::dispatch`] before any work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DispatchError {
    /// No handler is registered for the intent's kind.
    #[display("no handler registered for intent `{0}`")]
    UnknownIntent(&'static str),
    /// The payload's type does not match the registered handler's payload type.
    #[display("payload type mismatch for intent `{0}`")]
    PayloadType(&'static str),
}
impl std::error::Error for DispatchError {}

/// A failed intent, as delivered to the store's notifier.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("intent `{kind}` failed: {error}")]
pub struct IntentFailure {
    pub kind: &'static str,
    pub error: IntentError,
}

type HandlerFn = dyn Fn(Box<dyn Any>, IntentContext) -> LocalBoxFuture<'static, Result<(), IntentError>>;

struct KindEntry {
    payload_type: TypeId,
    handler: Rc<HandlerFn>,
    state: Rc<RefCell<KindState>>,
}

#[derive(Default)]
struct KindState {
    generation: u64,
    running: Option<Rc<FutureTask>>,
}

/// Mediator serializing named intents into cell writes.
///
/// Each intent kind moves `Idle -> Running -> Idle`; dispatching a kind that is
/// already `Running` cancels the in-flight work before starting the new work, so
/// overlapping asynchronous intents of one kind never interleave their results
/// (last intent wins). Different kinds run independently.
///
/// On success a handler writes its result into cells through its
/// [`IntentContext`]; on failure the store writes nothing and forwards the error
/// to the notifier.
#[derive_ex(Clone)]
pub struct Store(Rc<RawStore>);

struct RawStore {
    kinds: RefCell<HashMap<&'static str, KindEntry>>,
    notifier: Rc<dyn Fn(IntentFailure)>,
}

impl Store {
    /// Create a store whose notifier logs failed intents via `tracing`.
    pub fn new() -> Self {
        Self::with_notifier(|failure| {
            tracing::warn!(kind = failure.kind, error = %failure.error, "intent failed");
        })
    }

    /// Create a store that forwards failed intents to `notifier`.
    pub fn with_notifier(notifier: impl Fn(IntentFailure) + 'static) -> Self {
        Store(Rc::new(RawStore {
            kinds: RefCell::new(HashMap::new()),
            notifier: Rc::new(notifier),
        }))
    }

    /// Registers a handler for an intent kind.
    ///
    /// The handler receives the intent's payload and an [`IntentContext`] for
    /// writing its result. Registering a kind twice replaces the handler; the
    /// kind's in-flight work and generation are preserved.
    pub fn register<P, Fut>(
        &self,
        kind: &'static str,
        handler: impl Fn(P, IntentContext) -> Fut + 'static,
    ) where
        P: Any,
        Fut: Future<Output = Result<(), IntentError>> + 'static,
    {
        let handler: Rc<HandlerFn> = Rc::new(move |payload: Box<dyn Any>, icx: IntentContext| {
            let payload = payload
                .downcast::<P>()
                .expect("payload type checked at dispatch");
            handler(*payload, icx).boxed_local()
        });
        let mut kinds = self.0.kinds.borrow_mut();
        let state = kinds
            .get(kind)
            .map(|entry| entry.state.clone())
            .unwrap_or_default();
        kinds.insert(
            kind,
            KindEntry {
                payload_type: TypeId::of::<P>(),
                handler,
                state,
            },
        );
    }

    /// Dispatches an intent, cancelling in-flight work of the same kind first.
    ///
    /// The handler's future is polled by
    /// [`Runtime::run_intents`](crate::core::Runtime::run_intents) /
    /// [`Runtime::update`](crate::core::Runtime::update). Errors are returned
    /// only for dispatch-time problems; failures of the work itself go to the
    /// notifier.
    pub fn dispatch(&self, intent: Intent) -> Result<(), DispatchError> {
        let kinds = self.0.kinds.borrow();
        let entry = kinds
            .get(intent.kind)
            .ok_or(DispatchError::UnknownIntent(intent.kind))?;
        if (*intent.payload).type_id() != entry.payload_type {
            return Err(DispatchError::PayloadType(intent.kind));
        }
        let handler = entry.handler.clone();
        let state = entry.state.clone();
        drop(kinds);

        let generation = {
            let mut st = state.borrow_mut();
            st.generation += 1;
            if let Some(prev) = st.running.take() {
                tracing::debug!(kind = intent.kind, "superseding in-flight intent");
                prev.cancel();
            }
            st.generation
        };
        let icx = IntentContext {
            kind: intent.kind,
            generation,
            state: state.clone(),
        };
        let future = handler(intent.payload, icx);
        let kind = intent.kind;
        let notifier = self.0.notifier.clone();
        let retire_state = state.clone();
        let task = FutureTask::new(async move {
            let result = future.await;
            let mut st = retire_state.borrow_mut();
            if st.generation == generation {
                st.running = None;
            }
            drop(st);
            if let Err(error) = result {
                notifier(IntentFailure { kind, error });
            }
        });
        state.borrow_mut().running = Some(task.clone());
        spawn_future(task);
        tracing::debug!(kind, generation, "intent dispatched");
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Write access handed to an intent handler, valid for one intent execution.
///
/// Captures the dispatch's generation token; once a newer intent of the same
/// kind has been dispatched, [`apply`](Self::apply) becomes a no-op, so a
/// superseded intent's completion never writes a stale result.
pub struct IntentContext {
    kind: &'static str,
    generation: u64,
    state: Rc<RefCell<KindState>>,
}

impl IntentContext {
    /// Schedules `f` to run with a write-permitted [`SignalContext`], unless
    /// this intent has been superseded.
    pub fn apply(&self, f: impl FnOnce(&mut SignalContext) + 'static) {
        let kind = self.kind;
        let generation = self.generation;
        let state = self.state.clone();
        spawn_action(move |sc| {
            if state.borrow().generation == generation {
                f(sc);
            } else {
                tracing::debug!(kind, generation, "dropping write of superseded intent");
            }
        });
    }

    /// Whether this intent is still the latest of its kind.
    pub fn is_current(&self) -> bool {
        self.state.borrow().generation == self.generation
    }
}
