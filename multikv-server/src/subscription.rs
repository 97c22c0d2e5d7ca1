//! Per-connection subscription registry.

use multikv_protocol::{Callback, ChangeEvent, EventKind, Response};
use std::collections::HashMap;

/// A registered listener, identified by the id of the Subscribe request
/// that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handler {
    id: u64,
}

/// Handlers per event kind, in registration order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `kind`, tagged with the subscribe request id.
    pub fn register(&mut self, kind: EventKind, id: u64) {
        self.handlers.entry(kind).or_default().push(Handler { id });
    }

    /// Removes every handler tagged with `id`, whatever its event kind.
    ///
    /// Returns how many were removed.
    pub fn unregister(&mut self, id: u64) -> usize {
        let mut removed = 0;
        for handlers in self.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.id != id);
            removed += before - handlers.len();
        }
        removed
    }

    /// Produces one push callback per handler registered for the event's kind.
    ///
    /// The event payload is encoded once and shared by every callback.
    pub fn broadcast(&self, event: &ChangeEvent) -> Vec<Response> {
        let handlers = match self.handlers.get(&event.kind()) {
            Some(handlers) if !handlers.is_empty() => handlers,
            _ => return Vec::new(),
        };

        let payload = event.encode();
        handlers
            .iter()
            .map(|h| Callback::ok(h.id, Some(payload.clone())).into())
            .collect()
    }

    /// Returns the number of handlers for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Returns the total number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
