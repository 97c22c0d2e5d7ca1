//! Per-connection state.

use crate::iterator::{CursorTask, Fetched, IteratorTable};
use crate::subscription::SubscriptionRegistry;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use multikv_protocol::Response;
use uuid::Uuid;

/// Outcome of a piece of work that was running on behalf of a connection.
pub enum Completion {
    /// A store call finished; send its callback.
    Reply(Response),
    /// An iterator fetch finished.
    Fetched(Fetched),
    /// A cursor was released.
    Released,
}

/// Work in flight for a connection.
pub type Pending = BoxFuture<'static, Completion>;

/// A client connection's state.
///
/// Everything here is owned by the connection's task, so none of it needs
/// locking.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Peer description for logs.
    pub peer: String,

    /// Open iterators.
    pub iterators: IteratorTable,

    /// Event subscriptions.
    pub subscriptions: SubscriptionRegistry,

    /// Store calls and cursor work in flight.
    in_flight: FuturesUnordered<Pending>,

    /// Responses waiting to be written.
    outbox: Vec<Response>,

    /// Requests decoded so far.
    request_count: u64,
}

impl Session {
    /// Creates a new session.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer: peer.into(),
            iterators: IteratorTable::new(),
            subscriptions: SubscriptionRegistry::new(),
            in_flight: FuturesUnordered::new(),
            outbox: Vec::new(),
            request_count: 0,
        }
    }

    /// Queues a response for writing.
    pub fn send(&mut self, response: impl Into<Response>) {
        self.outbox.push(response.into());
    }

    /// Queues several responses for writing, in order.
    pub fn send_all(&mut self, responses: impl IntoIterator<Item = Response>) {
        self.outbox.extend(responses);
    }

    /// Takes every queued response.
    pub fn drain_outbox(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Starts a piece of work.
    pub fn spawn(&mut self, work: Pending) {
        self.in_flight.push(work);
    }

    /// Starts iterator work, if there is any.
    pub fn spawn_cursor(&mut self, task: Option<CursorTask>) {
        if let Some(task) = task {
            self.spawn(
                task.map(|fetched| match fetched {
                    Some(fetched) => Completion::Fetched(fetched),
                    None => Completion::Released,
                })
                .boxed(),
            );
        }
    }

    /// Waits for the next piece of work to finish. Pending forever when
    /// nothing is in flight.
    pub async fn next_completion(&mut self) -> Completion {
        match self.in_flight.next().await {
            Some(completion) => completion,
            None => futures::future::pending::<Completion>().await,
        }
    }

    /// Returns the number of pieces of work in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Applies a finished piece of work, queueing whatever it produced.
    pub fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Reply(response) => self.send(response),
            Completion::Fetched(fetched) => {
                let (data, next) = self.iterators.complete(fetched);
                if let Some(data) = data {
                    self.send(data);
                }
                self.spawn_cursor(next);
            }
            Completion::Released => {}
        }
    }

    /// Records a decoded request.
    pub fn record_request(&mut self) {
        self.request_count += 1;
    }

    /// Returns the number of requests decoded.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Closes every iterator, then runs the remaining work to completion.
    ///
    /// Store calls already received still reach the store; their replies
    /// are discarded. A fetch that was in flight yields no element and its
    /// cursor is released once it returns.
    pub async fn teardown(&mut self) {
        for release in self.iterators.teardown() {
            self.spawn_cursor(Some(release));
        }

        let mut discarded = 0usize;
        while let Some(completion) = self.in_flight.next().await {
            match completion {
                Completion::Reply(_) => discarded += 1,
                Completion::Fetched(fetched) => {
                    let (_, release) = self.iterators.complete(fetched);
                    self.spawn_cursor(release);
                }
                Completion::Released => {}
            }
        }
        if discarded > 0 {
            tracing::debug!("[{}] Discarded {} replies on close", self.peer, discarded);
        }
        self.outbox.clear();
    }
}
