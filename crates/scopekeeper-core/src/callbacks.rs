//! Lifecycle callbacks
//!
//! Handlers are kept per event in registration order. Firing an event calls
//! every handler once: synchronous handlers complete inline, asynchronous
//! ones are started and then awaited together. Every handler runs even if a
//! sibling fails; the first failure (in registration order) is returned.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::{Error, Result};

/// The four points at which a data source notifies its handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The engine was connected; handlers receive the engine
    EngineCreated,
    /// Schema is in place and sessions can be handed out
    Ready,
    /// A scoped session is about to be closed and evicted
    BeforeSessionRemoved,
    /// A scoped session was closed and evicted
    AfterSessionRemoved,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::EngineCreated => "engine_created",
            LifecycleEvent::Ready => "ready",
            LifecycleEvent::BeforeSessionRemoved => "before_session_removed",
            LifecycleEvent::AfterSessionRemoved => "after_session_removed",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler produced when called
pub enum Invocation {
    /// Finished synchronously
    Done(Result<()>),
    /// Still running; awaited together with the other pending handlers
    Pending(BoxFuture<'static, Result<()>>),
}

impl Invocation {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Invocation::Pending(future.boxed())
    }
}

impl From<Result<()>> for Invocation {
    fn from(result: Result<()>) -> Self {
        Invocation::Done(result)
    }
}

impl From<()> for Invocation {
    fn from(_: ()) -> Self {
        Invocation::Done(Ok(()))
    }
}

pub type Handler<A> = Arc<dyn Fn(A) -> Invocation + Send + Sync>;

/// Wrap a synchronous closure as a handler
pub fn sync_handler<A, F>(f: F) -> Handler<A>
where
    F: Fn(A) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(move |args| Invocation::Done(f(args)))
}

/// Wrap a closure returning a future as a handler
pub fn async_handler<A, F, Fut>(f: F) -> Handler<A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |args| Invocation::pending(f(args)))
}

/// Append-only, ordered handler list for one event
pub struct CallbackList<A> {
    event: LifecycleEvent,
    handlers: RwLock<Vec<Handler<A>>>,
}

impl<A: Clone> CallbackList<A> {
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    pub fn register(&self, handler: Handler<A>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every handler with `args` and wait for all of them
    pub async fn fire(&self, args: A) -> Result<()> {
        // Snapshot so handlers may register more handlers without deadlocking.
        let handlers: Vec<Handler<A>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if handlers.is_empty() {
            return Ok(());
        }

        let mut outcomes: Vec<Option<Result<()>>> = Vec::with_capacity(handlers.len());
        let mut pending = Vec::new();

        for (index, handler) in handlers.iter().enumerate() {
            match handler(args.clone()) {
                Invocation::Done(result) => outcomes.push(Some(result)),
                Invocation::Pending(future) => {
                    outcomes.push(None);
                    pending.push(future.map(move |result| (index, result)));
                }
            }
        }

        for (index, result) in futures::future::join_all(pending).await {
            outcomes[index] = Some(result);
        }

        let mut first_error = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            if let Some(Err(e)) = outcome {
                tracing::error!(
                    event = %self.event,
                    handler = index,
                    error = %e,
                    "Lifecycle callback failed"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(source) => Err(Error::Callback {
                event: self.event,
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }
}

/// A handler tagged with the event it listens to
pub enum Callback<E> {
    EngineCreated(Handler<E>),
    Ready(Handler<()>),
    BeforeSessionRemoved(Handler<()>),
    AfterSessionRemoved(Handler<()>),
}

impl<E> Callback<E> {
    pub fn event(&self) -> LifecycleEvent {
        match self {
            Callback::EngineCreated(_) => LifecycleEvent::EngineCreated,
            Callback::Ready(_) => LifecycleEvent::Ready,
            Callback::BeforeSessionRemoved(_) => LifecycleEvent::BeforeSessionRemoved,
            Callback::AfterSessionRemoved(_) => LifecycleEvent::AfterSessionRemoved,
        }
    }
}

/// Handler lists for all four lifecycle events. `E` is the engine type
/// passed to `engine_created` handlers.
pub struct CallbackRegistry<E> {
    engine_created: CallbackList<E>,
    ready: CallbackList<()>,
    before_session_removed: CallbackList<()>,
    after_session_removed: CallbackList<()>,
}

impl<E: Clone> CallbackRegistry<E> {
    pub fn new() -> Self {
        Self {
            engine_created: CallbackList::new(LifecycleEvent::EngineCreated),
            ready: CallbackList::new(LifecycleEvent::Ready),
            before_session_removed: CallbackList::new(LifecycleEvent::BeforeSessionRemoved),
            after_session_removed: CallbackList::new(LifecycleEvent::AfterSessionRemoved),
        }
    }

    pub fn register(&self, callback: Callback<E>) {
        tracing::trace!(event = %callback.event(), "Registering lifecycle callback");
        match callback {
            Callback::EngineCreated(handler) => self.engine_created.register(handler),
            Callback::Ready(handler) => self.ready.register(handler),
            Callback::BeforeSessionRemoved(handler) => self.before_session_removed.register(handler),
            Callback::AfterSessionRemoved(handler) => self.after_session_removed.register(handler),
        }
    }

    /// Number of handlers registered for `event`
    pub fn count(&self, event: LifecycleEvent) -> usize {
        match event {
            LifecycleEvent::EngineCreated => self.engine_created.len(),
            LifecycleEvent::Ready => self.ready.len(),
            LifecycleEvent::BeforeSessionRemoved => self.before_session_removed.len(),
            LifecycleEvent::AfterSessionRemoved => self.after_session_removed.len(),
        }
    }

    pub async fn fire_engine_created(&self, engine: E) -> Result<()> {
        self.engine_created.fire(engine).await
    }

    pub async fn fire_ready(&self) -> Result<()> {
        self.ready.fire(()).await
    }

    pub async fn fire_before_session_removed(&self) -> Result<()> {
        self.before_session_removed.fire(()).await
    }

    pub async fn fire_after_session_removed(&self) -> Result<()> {
        self.after_session_removed.fire(()).await
    }
}

impl<E: Clone> Default for CallbackRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
