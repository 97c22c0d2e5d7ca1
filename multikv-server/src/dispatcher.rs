//! Request dispatch.

use crate::broadcast::EventBus;
use crate::session::{Completion, Session};
use futures::FutureExt;
use multikv_protocol::{Callback, ChangeEvent, Request};
use multikv_store::Store;
use std::sync::Arc;

/// Error text for mutations refused by a read-only server.
pub const READ_ONLY_ERROR: &str = "database is read-only";

/// Turns decoded requests into store calls and session work.
///
/// Store calls never block the caller: each becomes a future in the
/// session, and its callback is queued when it completes.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    bus: EventBus,
    readonly: bool,
}

impl Dispatcher {
    /// Creates a dispatcher over `store`, writable, with its own bus.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            bus: EventBus::default(),
            readonly: false,
        }
    }

    /// Refuses every Put, Delete and Batch when `readonly` is set.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Publishes mutations on `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Dispatches one request on behalf of `session`.
    pub fn dispatch(&self, session: &mut Session, request: Request) {
        if self.readonly && request.kind().is_mutation() {
            tracing::debug!(
                "[{}] Rejecting {:?} (id={}): read-only",
                session.peer,
                request.kind(),
                request.id()
            );
            session.send(Callback::error(request.id(), READ_ONLY_ERROR));
            return;
        }

        match request {
            Request::Get { id, key } => {
                let store = self.store.clone();
                session.spawn(
                    async move {
                        let callback = match store.get(key).await {
                            Ok(value) => Callback::ok(id, Some(value)),
                            Err(e) => Callback::error(id, e.to_string()),
                        };
                        Completion::Reply(callback.into())
                    }
                    .boxed(),
                );
            }
            Request::Put { id, key, value } => {
                self.mutate(session, id, ChangeEvent::Put { key, value });
            }
            Request::Delete { id, key } => {
                self.mutate(session, id, ChangeEvent::Del { key });
            }
            Request::Batch { id, ops } => {
                self.mutate(session, id, ChangeEvent::Batch { ops });
            }
            Request::Iterator { id, options, batch } => {
                let task = session
                    .iterators
                    .request(self.store.as_ref(), id, options, batch);
                session.spawn_cursor(task);
            }
            Request::Subscribe { id, event } => {
                tracing::debug!("[{}] Subscribe {} (id={})", session.peer, event, id);
                session.subscriptions.register(event, id);
            }
            Request::Unsubscribe { id, handler } => {
                let removed = session.subscriptions.unregister(handler);
                tracing::debug!(
                    "[{}] Unsubscribe handler {} (removed {})",
                    session.peer,
                    handler,
                    removed
                );
                session.send(Callback::ok(id, None));
            }
        }
    }

    /// Runs a mutation. On success the change goes out on the bus before
    /// the callback is queued; on failure only the error callback is sent.
    fn mutate(&self, session: &mut Session, id: u64, change: ChangeEvent) {
        let store = self.store.clone();
        let bus = self.bus.clone();
        session.spawn(
            async move {
                let result = match &change {
                    ChangeEvent::Put { key, value } => store.put(key.clone(), value.clone()).await,
                    ChangeEvent::Del { key } => store.del(key.clone()).await,
                    ChangeEvent::Batch { ops } => store.batch(ops.clone()).await,
                };
                let callback = match result {
                    Ok(()) => {
                        bus.publish(change);
                        Callback::ok(id, None)
                    }
                    Err(e) => Callback::error(id, e.to_string()),
                };
                Completion::Reply(callback.into())
            }
            .boxed(),
        );
    }
}
