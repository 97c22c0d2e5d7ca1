//! Connection management and call correlation.
//!
//! A [`Connection`] owns two background tasks: a writer fed by an unbounded
//! queue of encoded frames, and a reader that decodes responses and routes
//! them. Callbacks are routed by correlation id to the resolver registered
//! when the call was made; iterator data is routed by iterator handle.

use crate::error::ClientError;
use bytes::BytesMut;
use multikv_protocol::{
    Callback, Decoded, Decoder, Encoder, EventKind, IteratorData, IteratorOptions, Request,
    Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default capacity of the flush notification channel.
const FLUSH_CHANNEL_CAPACITY: usize = 16;

/// Receives the callback for one call, or every callback for a subscription.
enum Resolver {
    Once(oneshot::Sender<Callback>),
    Repeating(mpsc::UnboundedSender<Callback>),
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, Resolver>,
    /// Number of `Once` entries in `calls`.
    once: usize,
}

struct Shared {
    pending: Mutex<PendingTable>,
    iterators: Mutex<HashMap<u64, mpsc::UnboundedSender<IteratorData>>>,
    closed: AtomicBool,
    flushes: broadcast::Sender<()>,
}

impl Shared {
    fn route_callback(&self, callback: Callback) {
        let mut pending = self.pending.lock();
        let id = callback.id;

        match pending.calls.remove(&id) {
            Some(Resolver::Once(tx)) => {
                pending.once -= 1;
                let drained = pending.once == 0;
                drop(pending);

                let _ = tx.send(callback);
                if drained {
                    // Ignore send errors (no receivers)
                    let _ = self.flushes.send(());
                }
            }
            Some(Resolver::Repeating(tx)) => {
                if tx.send(callback).is_ok() {
                    pending.calls.insert(id, Resolver::Repeating(tx));
                } else {
                    tracing::debug!("subscription {} has no receiver, dropping it", id);
                }
            }
            None => {
                tracing::debug!("no pending call for id={}", id);
            }
        }
    }

    fn route_iterator_data(&self, data: IteratorData) {
        let iterators = self.iterators.lock();
        match iterators.get(&data.id) {
            Some(tx) => {
                let _ = tx.send(data);
            }
            None => {
                tracing::debug!("no open iterator for handle={}", data.id);
            }
        }
    }
}

enum Outbound {
    Frame(BytesMut),
    Close,
}

/// A link to a multikv server over one duplex stream.
pub struct Connection {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Next correlation id.
    next_id: AtomicU64,
    /// Next iterator handle.
    next_handle: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Starts a connection over `stream`.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (flushes, _) = broadcast::channel(FLUSH_CHANNEL_CAPACITY);
        Self::with_flush_sender(stream, flushes)
    }

    /// Starts a connection that reports flushes on `flushes`.
    pub fn with_flush_sender<S>(stream: S, flushes: broadcast::Sender<()>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            iterators: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            flushes,
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, shared.clone()));
        let writer = tokio::spawn(write_loop(write_half, outbound_rx, shared.clone()));

        Self {
            shared,
            outbound,
            next_id: AtomicU64::new(1),
            next_handle: AtomicU64::new(0),
            reader,
            writer,
        }
    }

    /// Sends a request built around a fresh correlation id and waits for its
    /// callback.
    ///
    /// There is no timeout: if the callback never arrives, neither does the
    /// result.
    pub async fn call(&self, build: impl FnOnce(u64) -> Request) -> Result<Callback, ClientError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = build(id);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            pending.calls.insert(id, Resolver::Once(tx));
            pending.once += 1;
        }

        if let Err(e) = self.send(&request) {
            self.forget(id);
            return Err(e);
        }
        tracing::debug!("Request id={} {:?} sent", id, request.kind());

        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Subscribes to `event`. Returns the handler id and a receiver for every
    /// push callback.
    pub fn subscribe(
        &self,
        event: EventKind,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Callback>), ClientError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .pending
            .lock()
            .calls
            .insert(id, Resolver::Repeating(tx));

        if let Err(e) = self.send(&Request::Subscribe { id, event }) {
            self.forget(id);
            return Err(e);
        }
        tracing::debug!("Subscribed to {} (handler={})", event, id);
        Ok((id, rx))
    }

    /// Stops delivery for `handler` and asks the server to drop it.
    pub async fn unsubscribe(&self, handler: u64) -> Result<(), ClientError> {
        self.forget(handler);
        let callback = self
            .call(|id| Request::Unsubscribe { id, handler })
            .await?;
        match callback.error {
            Some(e) => Err(ClientError::from_remote(e)),
            None => Ok(()),
        }
    }

    /// Opens a server-side iterator with an initial budget of `batch`.
    pub fn open_iterator(
        &self,
        options: IteratorOptions,
        batch: u64,
    ) -> Result<(u64, mpsc::UnboundedReceiver<IteratorData>), ClientError> {
        self.ensure_open()?;
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.iterators.lock().insert(handle, tx);

        let request = Request::Iterator {
            id: handle,
            options,
            batch,
        };
        if let Err(e) = self.send(&request) {
            self.shared.iterators.lock().remove(&handle);
            return Err(e);
        }
        tracing::debug!("Iterator {} opened (batch={})", handle, batch);
        Ok((handle, rx))
    }

    /// Grants `batch` more elements to an open iterator.
    pub fn request_more(&self, handle: u64, batch: u64) -> Result<(), ClientError> {
        self.send(&Request::Iterator {
            id: handle,
            options: IteratorOptions::default(),
            batch,
        })
    }

    /// Closes an iterator. Frames still in transit for it are dropped.
    pub fn close_iterator(&self, handle: u64) {
        self.shared.iterators.lock().remove(&handle);
        if self.request_more(handle, 0).is_err() {
            tracing::debug!("Iterator {} closed locally, link is down", handle);
        }
    }

    /// Subscribes to flush notifications: one each time the table of
    /// pending single-shot calls drains to empty.
    pub fn flushes(&self) -> broadcast::Receiver<()> {
        self.shared.flushes.subscribe()
    }

    /// Returns whether the link is down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of calls and subscriptions awaiting callbacks.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().calls.len()
    }

    /// Closes the link. The writer flushes queued frames, then shuts the
    /// stream down. Pending calls stay pending.
    pub fn close(&self) {
        tracing::debug!("Closing connection...");
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn send(&self, request: &Request) -> Result<(), ClientError> {
        self.ensure_open()?;
        let frame = Encoder::encode_request(request)?;
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    fn forget(&self, id: u64) {
        let mut pending = self.shared.pending.lock();
        if let Some(Resolver::Once(_)) = pending.calls.remove(&id) {
            pending.once -= 1;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) where
    S: AsyncWrite,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!("write_loop: write error: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    let _ = writer.shutdown().await;
    tracing::debug!("write_loop: stopped");
}

async fn read_loop<S>(mut reader: ReadHalf<S>, shared: Arc<Shared>)
where
    S: AsyncRead,
{
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("read_loop: connection closed");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("read_loop: read error: {}", e);
                break;
            }
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_response() {
                Ok(Some(Decoded::Message(Response::Callback(callback)))) => {
                    shared.route_callback(callback);
                }
                Ok(Some(Decoded::Message(Response::IteratorData(data)))) => {
                    shared.route_iterator_data(data);
                }
                Ok(Some(Decoded::Dropped(e))) => {
                    tracing::warn!("read_loop: dropping malformed frame: {}", e);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("read_loop: stream out of sync: {}", e);
                    shared.closed.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::DuplexStream;

    /// Scripted server end of a duplex pair.
    struct FakeServer {
        stream: DuplexStream,
        decoder: Decoder,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Request {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(Decoded::Message(request)) = self.decoder.decode_request().unwrap() {
                    return request;
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed the stream");
                self.decoder.extend(&buf[..n]);
            }
        }

        async fn reply(&mut self, response: impl Into<Response>) {
            let bytes = Encoder::encode_response(&response.into()).unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }
    }

    fn pair() -> (Connection, FakeServer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = FakeServer {
            stream: server,
            decoder: Decoder::new(),
        };
        (Connection::new(client), server)
    }

    fn get(key: &'static str) -> impl FnOnce(u64) -> Request {
        move |id| Request::Get {
            id,
            key: Bytes::from(key),
        }
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (conn, mut server) = pair();
        let conn = Arc::new(conn);

        let c = conn.clone();
        let first = tokio::spawn(async move { c.call(get("a")).await });
        assert_eq!(server.recv().await.id(), 1);
        let c = conn.clone();
        let second = tokio::spawn(async move { c.call(get("b")).await });
        assert_eq!(server.recv().await.id(), 2);

        // Answer out of order.
        server.reply(Callback::ok(2, Some(Bytes::from("B")))).await;
        server.reply(Callback::ok(1, Some(Bytes::from("A")))).await;

        assert_eq!(first.await.unwrap().unwrap().value, Some(Bytes::from("A")));
        assert_eq!(second.await.unwrap().unwrap().value, Some(Bytes::from("B")));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_when_pending_drains() {
        let (conn, mut server) = pair();
        let conn = Arc::new(conn);
        let mut flushes = conn.flushes();

        let c = conn.clone();
        let a = tokio::spawn(async move { c.call(get("a")).await });
        server.recv().await;
        let c = conn.clone();
        let b = tokio::spawn(async move { c.call(get("b")).await });
        server.recv().await;

        server.reply(Callback::ok(1, None)).await;
        a.await.unwrap().unwrap();
        assert!(flushes.try_recv().is_err());

        server.reply(Callback::ok(2, None)).await;
        b.await.unwrap().unwrap();
        flushes.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_resolver_repeats() {
        let (conn, mut server) = pair();

        let (handler, mut pushes) = conn.subscribe(EventKind::Put).unwrap();
        match server.recv().await {
            Request::Subscribe { id, event } => {
                assert_eq!(id, handler);
                assert_eq!(event, EventKind::Put);
            }
            other => panic!("unexpected request: {:?}", other),
        }

        for n in 0..3u8 {
            server.reply(Callback::ok(handler, Some(Bytes::from(vec![n])))).await;
        }
        for n in 0..3u8 {
            let cb = pushes.recv().await.unwrap();
            assert_eq!(cb.value, Some(Bytes::from(vec![n])));
        }
        assert_eq!(conn.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_iterator_handles_are_separate_from_ids() {
        let (conn, mut server) = pair();

        let (h0, mut rx0) = conn.open_iterator(IteratorOptions::default(), 4).unwrap();
        let (h1, _rx1) = conn.open_iterator(IteratorOptions::default(), 4).unwrap();
        assert_eq!((h0, h1), (0, 1));
        server.recv().await;
        server.recv().await;

        server
            .reply(IteratorData {
                id: 0,
                key: Some(Bytes::from("k")),
                ..Default::default()
            })
            .await;
        assert_eq!(rx0.recv().await.unwrap().key, Some(Bytes::from("k")));

        conn.close_iterator(h0);
        match server.recv().await {
            Request::Iterator { id, batch, .. } => assert_eq!((id, batch), (0, 0)),
            other => panic!("unexpected request: {:?}", other),
        }
        // A late frame for the closed handle is dropped.
        server
            .reply(IteratorData {
                id: 0,
                ..Default::default()
            })
            .await;
        assert!(rx0.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let (conn, _server) = pair();
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.call(get("a")).await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(conn.subscribe(EventKind::Del).is_err());
    }

    #[tokio::test]
    async fn test_peer_close_keeps_pending_calls() {
        let (conn, mut server) = pair();
        let conn = Arc::new(conn);

        let c = conn.clone();
        let call = tokio::spawn(async move { c.call(get("a")).await });
        server.recv().await;
        drop(server);

        // The link goes down, the call stays pending.
        while !conn.is_closed() {
            tokio::task::yield_now().await;
        }
        assert_eq!(conn.pending_count(), 1);
        assert!(!call.is_finished());
        call.abort();
    }
}
