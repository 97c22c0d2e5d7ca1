//! High-level client API.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::iterator::RemoteIterator;
use bytes::Bytes;
use multikv_protocol::{BatchOp, Callback, ChangeEvent, EventKind, IteratorOptions, Request};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Default number of elements an iterator requests at a time.
pub const DEFAULT_ITERATOR_BATCH: u64 = 64;

/// Client options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Budget granted to each remote iterator at a time.
    pub iterator_batch: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            iterator_batch: DEFAULT_ITERATOR_BATCH,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iterator_batch(mut self, batch: u64) -> Self {
        self.iterator_batch = batch.max(1);
        self
    }
}

/// Change events delivered to one listener.
pub struct Listener {
    id: u64,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Listener {
    /// Returns the id to pass to [`Client::remove_listener`].
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Waits for the next event. `None` once the listener is removed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Returns an already delivered event, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

struct QueuedListener {
    id: u64,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

struct LiveListener {
    handler: u64,
    forwarder: JoinHandle<()>,
}

#[derive(Default)]
struct Listeners {
    /// Registered before the link existed, per kind in registration order.
    queued: HashMap<EventKind, Vec<QueuedListener>>,
    /// Attached to the link, by listener id.
    live: HashMap<u64, LiveListener>,
}

struct Inner {
    options: ClientOptions,
    link: watch::Sender<Option<Arc<Connection>>>,
    listeners: Mutex<Listeners>,
    flushes: broadcast::Sender<()>,
    next_listener: AtomicU64,
}

/// High-level client for a remote multikv store.
///
/// The client is usable before it is connected: store operations wait for
/// the link, and listeners are queued and attached once it exists.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client that is not connected yet.
    pub fn new(options: ClientOptions) -> Self {
        let (link, _) = watch::channel(None);
        let (flushes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                options,
                link,
                listeners: Mutex::new(Listeners::default()),
                flushes,
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Attaches the client to a server over `stream`.
    ///
    /// Queued listeners are attached in kind order (put, del, batch) and
    /// registration order within a kind, then deferred operations are
    /// released. If the client already has a link, that link is returned
    /// and `stream` is dropped.
    pub fn connect<S>(&self, stream: S) -> Result<Arc<Connection>, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        if let Some(conn) = self.inner.link.borrow().clone() {
            tracing::debug!("Already connected, reusing link");
            return Ok(conn);
        }

        let conn = Arc::new(Connection::with_flush_sender(
            stream,
            self.inner.flushes.clone(),
        ));

        for kind in EventKind::ALL {
            for queued in listeners.queued.remove(&kind).unwrap_or_default() {
                let live = attach(&conn, kind, queued.tx)?;
                listeners.live.insert(queued.id, live);
            }
        }
        listeners.queued.clear();

        self.inner.link.send_replace(Some(conn.clone()));
        tracing::debug!("Client connected ({} listeners)", listeners.live.len());
        Ok(conn)
    }

    /// Connects to a server over TCP.
    pub async fn connect_tcp(&self, addr: SocketAddr) -> Result<Arc<Connection>, ClientError> {
        if let Some(conn) = self.connection() {
            return Ok(conn);
        }
        tracing::debug!("Connecting to {}...", addr);
        let stream = TcpStream::connect(addr).await?;
        // Configure TCP options for better performance
        stream.set_nodelay(true).ok();
        self.connect(stream)
    }

    /// Returns the link, if connected.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.link.borrow().clone()
    }

    /// Returns whether the client has a live link.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|conn| !conn.is_closed())
    }

    /// Closes the link. Later operations fail with
    /// [`ClientError::ConnectionClosed`].
    pub fn close(&self) {
        if let Some(conn) = self.connection() {
            conn.close();
        }
    }

    /// Subscribes to flush notifications. One arrives each time every
    /// outstanding call has been answered.
    pub fn flushes(&self) -> broadcast::Receiver<()> {
        self.inner.flushes.subscribe()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Waits until the client is connected.
    async fn link(&self) -> Result<Arc<Connection>, ClientError> {
        let mut rx = self.inner.link.subscribe();
        let link = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        link.clone().ok_or(ClientError::ConnectionClosed)
    }

    async fn request(&self, build: impl FnOnce(u64) -> Request) -> Result<Callback, ClientError> {
        let conn = self.link().await?;
        let callback = conn.call(build).await?;
        match callback.error {
            Some(error) => Err(ClientError::from_remote(error)),
            None => Ok(callback),
        }
    }

    // =========================================================================
    // Store operations
    // =========================================================================

    /// Gets the value stored under `key`.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Bytes, ClientError> {
        let key = key.into();
        let callback = self.request(|id| Request::Get { id, key }).await?;
        Ok(callback.value.unwrap_or_default())
    }

    /// Stores `value` under `key`.
    pub async fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let (key, value) = (key.into(), value.into());
        self.request(|id| Request::Put { id, key, value }).await?;
        Ok(())
    }

    /// Deletes `key`.
    pub async fn del(&self, key: impl Into<Bytes>) -> Result<(), ClientError> {
        let key = key.into();
        self.request(|id| Request::Delete { id, key }).await?;
        Ok(())
    }

    /// Applies `ops` as one batch.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), ClientError> {
        self.request(|id| Request::Batch { id, ops }).await?;
        Ok(())
    }

    /// Opens a range read.
    pub async fn iterator(&self, options: IteratorOptions) -> Result<RemoteIterator, ClientError> {
        let conn = self.link().await?;
        RemoteIterator::open(conn, options, self.inner.options.iterator_batch)
    }

    // =========================================================================
    // Change listeners
    // =========================================================================

    /// Registers a listener for `kind` changes made by any client of the
    /// server.
    pub fn on(&self, kind: EventKind) -> Result<Listener, ClientError> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut listeners = self.inner.listeners.lock();
        match self.connection() {
            Some(conn) => {
                let live = attach(&conn, kind, tx)?;
                listeners.live.insert(id, live);
            }
            None => {
                listeners
                    .queued
                    .entry(kind)
                    .or_default()
                    .push(QueuedListener { id, tx });
            }
        }

        Ok(Listener { id, kind, rx })
    }

    /// Removes a listener. A live one is unsubscribed on the server; no
    /// further events reach it either way.
    pub async fn remove_listener(&self, id: u64) -> Result<(), ClientError> {
        let live = {
            let mut listeners = self.inner.listeners.lock();
            for queued in listeners.queued.values_mut() {
                if let Some(pos) = queued.iter().position(|q| q.id == id) {
                    queued.remove(pos);
                    return Ok(());
                }
            }
            listeners.live.remove(&id)
        };

        let live = live.ok_or(ClientError::UnknownListener(id))?;
        live.forwarder.abort();
        let conn = self.link().await?;
        conn.unsubscribe(live.handler).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

/// Subscribes on the link and forwards decoded events to a listener.
fn attach(
    conn: &Connection,
    kind: EventKind,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) -> Result<LiveListener, ClientError> {
    let (handler, mut pushes) = conn.subscribe(kind)?;
    let forwarder = tokio::spawn(async move {
        while let Some(callback) = pushes.recv().await {
            let Some(payload) = callback.value else {
                tracing::debug!("subscription {} got an empty push", handler);
                continue;
            };
            match ChangeEvent::decode(payload) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("subscription {} got a bad event: {}", handler, e);
                }
            }
        }
    });
    Ok(LiveListener { handler, forwarder })
}

#[cfg(test)]
mod tests {
    use super::*;
    use multikv_server::{Server, ServerConfig};
    use multikv_store::{MemStore, Store};
    use std::time::Duration;

    fn server(readonly: bool) -> (MemStore, Arc<Server>) {
        let store = MemStore::new();
        let config = ServerConfig::default().with_readonly(readonly);
        let server = Arc::new(Server::new(config, Arc::new(store.clone())));
        (store, server)
    }

    fn connected(server: &Server, options: ClientOptions) -> Client {
        let client = Client::new(options);
        let (local, remote) = tokio::io::duplex(64 * 1024);
        server.serve(remote);
        client.connect(local).unwrap();
        client
    }

    async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("timed out")
    }

    fn b(s: &'static str) -> Bytes {
        Bytes::from(s)
    }

    #[tokio::test]
    async fn test_get() {
        let (store, server) = server(false);
        store.open().await.unwrap();
        store.put(b("hello"), b("world")).await.unwrap();

        let client = connected(&server, ClientOptions::default());
        assert_eq!(client.get("hello").await.unwrap(), b("world"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());

        client.put("hello", "world").await.unwrap();
        assert_eq!(client.get("hello").await.unwrap(), b("world"));
    }

    #[tokio::test]
    async fn test_readonly() {
        let (store, server) = server(true);
        store.open().await.unwrap();
        store.put(b("hello"), b("verden")).await.unwrap();

        let client = connected(&server, ClientOptions::default());
        let err = client.put("hello", "world").await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref m) if m == "database is read-only"));
        assert_eq!(client.get("hello").await.unwrap(), b("verden"));
    }

    #[tokio::test]
    async fn test_del() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());

        client.put("hello", "world").await.unwrap();
        client.del("hello").await.unwrap();
        let err = client.get("hello").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_batch() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());

        client
            .batch(vec![
                BatchOp::put("hello", "world"),
                BatchOp::put("hej", "verden"),
            ])
            .await
            .unwrap();
        assert_eq!(client.get("hello").await.unwrap(), b("world"));
        assert_eq!(client.get("hej").await.unwrap(), b("verden"));
    }

    #[tokio::test]
    async fn test_read_stream() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());
        client.put("hello", "world").await.unwrap();
        client.put("hej", "verden").await.unwrap();

        let all = client
            .iterator(IteratorOptions::default())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(
            all,
            vec![
                (Some(b("hej")), Some(b("verden"))),
                (Some(b("hello")), Some(b("world"))),
            ]
        );

        let bounded = client
            .iterator(IteratorOptions::new().with_gt("hej"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(bounded, vec![(Some(b("hello")), Some(b("world")))]);
    }

    #[tokio::test]
    async fn test_read_stream_tops_up_budget() {
        let (store, server) = server(false);
        store.open().await.unwrap();
        for i in 0..50u8 {
            store
                .put(Bytes::from(vec![i]), Bytes::from(vec![i]))
                .await
                .unwrap();
        }

        let client = connected(&server, ClientOptions::new().with_iterator_batch(4));
        let entries = within(async {
            client
                .iterator(IteratorOptions::new().with_values(false))
                .await
                .unwrap()
                .collect()
                .await
                .unwrap()
        })
        .await;
        assert_eq!(entries.len(), 50);
        assert!(entries.iter().all(|(k, v)| k.is_some() && v.is_none()));
        assert_eq!(entries[49].0, Some(Bytes::from(vec![49u8])));
    }

    #[tokio::test]
    async fn test_early_close_releases_handle() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::new().with_iterator_batch(2));
        for key in ["a", "b", "c", "d"] {
            client.put(key, "v").await.unwrap();
        }

        let mut iter = client.iterator(IteratorOptions::default()).await.unwrap();
        let first = iter.next().await.unwrap().unwrap();
        assert_eq!(first.0, Some(b("a")));
        iter.close();

        // The link stays healthy.
        assert_eq!(client.get("d").await.unwrap(), b("v"));
    }

    #[tokio::test]
    async fn test_events_between_clients() {
        let (_store, server) = server(false);
        let alice = connected(&server, ClientOptions::default());
        let bob = connected(&server, ClientOptions::default());

        let mut puts = bob.on(EventKind::Put).unwrap();
        let mut dels = bob.on(EventKind::Del).unwrap();
        let mut batches = bob.on(EventKind::Batch).unwrap();
        // Subscriptions are registered once this round trip completes.
        let _ = bob.get("sync").await;

        alice.put("hello", "world").await.unwrap();
        assert_eq!(
            within(puts.recv()).await.unwrap(),
            ChangeEvent::Put {
                key: b("hello"),
                value: b("world"),
            }
        );

        alice.del("hello").await.unwrap();
        assert_eq!(
            within(dels.recv()).await.unwrap(),
            ChangeEvent::Del { key: b("hello") }
        );

        let ops = vec![BatchOp::put("x", "1"), BatchOp::del("y")];
        alice.batch(ops.clone()).await.unwrap();
        assert_eq!(
            within(batches.recv()).await.unwrap(),
            ChangeEvent::Batch { ops }
        );

        // Exactly once.
        let _ = bob.get("sync").await;
        assert!(puts.try_recv().is_none());
        assert!(dels.try_recv().is_none());
        assert!(batches.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());

        let mut removed = client.on(EventKind::Put).unwrap();
        let mut kept = client.on(EventKind::Put).unwrap();
        let _ = client.get("sync").await;

        client.put("a", "1").await.unwrap();
        assert!(within(removed.recv()).await.is_some());
        assert!(within(kept.recv()).await.is_some());

        client.remove_listener(removed.id()).await.unwrap();
        client.put("b", "2").await.unwrap();
        assert_eq!(
            within(kept.recv()).await.unwrap(),
            ChangeEvent::Put {
                key: b("b"),
                value: b("2"),
            }
        );
        assert!(within(removed.recv()).await.is_none());

        assert!(matches!(
            client.remove_listener(removed.id()).await,
            Err(ClientError::UnknownListener(_))
        ));
    }

    #[tokio::test]
    async fn test_listeners_queued_before_connect() {
        let (_store, server) = server(false);
        let client = Client::default();

        let mut puts = client.on(EventKind::Put).unwrap();
        let dropped = client.on(EventKind::Put).unwrap();
        client.remove_listener(dropped.id()).await.unwrap();

        // Store operations issued now wait for the link.
        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.put("early", "bird").await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        let (local, remote) = tokio::io::duplex(64 * 1024);
        server.serve(remote);
        let conn = client.connect(local).unwrap();
        within(pending).await.unwrap().unwrap();

        // Only the listener still queued was attached.
        assert_eq!(conn.pending_count(), 1);
        assert_eq!(
            within(puts.recv()).await.unwrap(),
            ChangeEvent::Put {
                key: b("early"),
                value: b("bird"),
            }
        );
    }

    #[tokio::test]
    async fn test_second_connect_reuses_link() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());

        let first = client.connection().unwrap();
        let (spare, _unused) = tokio::io::duplex(1024);
        let second = client.connect(spare).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_flush_event() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());
        let mut flushes = client.flushes();

        client.put("hello", "world").await.unwrap();
        within(flushes.recv()).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_client_fails_fast() {
        let (_store, server) = server(false);
        let client = connected(&server, ClientOptions::default());
        client.close();
        assert!(!client.is_connected());
        assert!(matches!(
            client.get("hello").await,
            Err(ClientError::ConnectionClosed)
        ));
    }
}
