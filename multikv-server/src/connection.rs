//! Connection loop.

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::server::ServerStats;
use crate::session::Session;
use bytes::BytesMut;
use multikv_protocol::{Decoded, Decoder, Encoder, ProtocolError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

/// Serves one client over any duplex byte stream until it closes.
///
/// The store is opened first if it is not open yet. A single loop then
/// waits on finished store work, change events from other connections,
/// incoming bytes and the shutdown signal; queued responses are written
/// after each step. The loop ends on EOF, a transport error, a framing
/// error that loses sync with the stream, or shutdown. Iterators are torn
/// down either way.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: String,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ServerStats>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let store = dispatcher.store();
    if !store.is_open() {
        store.open().await?;
    }

    let mut events = dispatcher.bus().subscribe();
    let mut bus_open = true;
    let mut session = Session::new(peer);
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 8192];
    let mut out = BytesMut::with_capacity(8192);

    tracing::info!("Client connected: {} (session {})", session.peer, session.id);

    let result = loop {
        tokio::select! {
            completion = session.next_completion() => {
                session.complete(completion);
            }

            event = events.recv(), if bus_open => {
                match event {
                    Ok(event) => {
                        let pushes = session.subscriptions.broadcast(&event);
                        session.send_all(pushes);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("[{}] Lagged {} change events", session.peer, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bus_open = false;
                    }
                }
            }

            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        tracing::debug!("[{}] Connection closed by client", session.peer);
                        break Ok(());
                    }
                    Ok(n) => {
                        tracing::debug!("[{}] Received {} bytes", session.peer, n);
                        decoder.extend(&buf[..n]);
                        if let Err(e) = dispatch_decoded(&mut decoder, &dispatcher, &mut session, &stats) {
                            tracing::warn!("[{}] Closing on framing error: {}", session.peer, e);
                            break Err(e.into());
                        }
                    }
                    Err(e) => {
                        tracing::debug!("[{}] Read error: {}", session.peer, e);
                        break Err(e.into());
                    }
                }
            }

            _ = shutdown.recv() => {
                tracing::debug!("[{}] Shutdown signal received", session.peer);
                break Err(ServerError::ShuttingDown);
            }
        }

        if session.has_output() {
            if let Err(e) = write_outbox(&mut stream, &mut session, &mut out).await {
                tracing::debug!("[{}] Write error: {}", session.peer, e);
                break Err(e);
            }
        }
    };

    session.teardown().await;
    tracing::debug!(
        "[{}] Session {} ended after {} requests",
        session.peer,
        session.id,
        session.request_count()
    );
    result
}

/// Dispatches every whole frame in the decoder.
///
/// Malformed frames are counted and skipped. `Err` means the stream can no
/// longer be delimited.
fn dispatch_decoded(
    decoder: &mut Decoder,
    dispatcher: &Dispatcher,
    session: &mut Session,
    stats: &ServerStats,
) -> Result<(), ProtocolError> {
    while let Some(decoded) = decoder.decode_request()? {
        match decoded {
            Decoded::Message(request) => {
                stats.requests_total.fetch_add(1, Ordering::Relaxed);
                session.record_request();
                tracing::debug!(
                    "[{}] Request: {:?} (id={})",
                    session.peer,
                    request.kind(),
                    request.id()
                );
                dispatcher.dispatch(session, request);
            }
            Decoded::Dropped(e) => {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[{}] Dropping malformed frame: {}", session.peer, e);
            }
        }
    }
    Ok(())
}

async fn write_outbox<S>(
    stream: &mut S,
    session: &mut Session,
    out: &mut BytesMut,
) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    out.clear();
    for response in session.drain_outbox() {
        if let Err(e) = Encoder::append_response(&response, out) {
            tracing::warn!("[{}] Dropping unencodable response: {}", session.peer, e);
        }
    }
    if out.is_empty() {
        return Ok(());
    }

    tracing::debug!("[{}] Writing {} bytes", session.peer, out.len());
    stream.write_all(out).await?;
    stream.flush().await?;
    Ok(())
}
