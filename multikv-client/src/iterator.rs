//! Remote range iteration.

use crate::connection::Connection;
use crate::error::ClientError;
use bytes::Bytes;
use multikv_protocol::{IteratorData, IteratorOptions};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One element of a remote range read. Either side is absent when the
/// iterator options excluded it.
pub type RemoteEntry = (Option<Bytes>, Option<Bytes>);

/// A server-side cursor read through the connection.
///
/// The iterator grants `batch` elements up front and grants more once at
/// most half of the granted elements are still outstanding, so the server
/// never streams faster than the reader consumes. The handle is closed on
/// exhaustion, on error, on [`close`](Self::close) and on drop.
pub struct RemoteIterator {
    conn: Arc<Connection>,
    handle: u64,
    rx: mpsc::UnboundedReceiver<IteratorData>,
    batch: u64,
    /// Granted but not yet received.
    outstanding: u64,
    done: bool,
}

impl RemoteIterator {
    pub(crate) fn open(
        conn: Arc<Connection>,
        options: IteratorOptions,
        batch: u64,
    ) -> Result<Self, ClientError> {
        let batch = batch.max(1);
        let (handle, rx) = conn.open_iterator(options, batch)?;
        Ok(Self {
            conn,
            handle,
            rx,
            batch,
            outstanding: batch,
            done: false,
        })
    }

    /// Returns the iterator handle.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Returns the next element, or `None` once the range is exhausted.
    pub async fn next(&mut self) -> Result<Option<RemoteEntry>, ClientError> {
        if self.done {
            return Ok(None);
        }

        let data = match self.rx.recv().await {
            Some(data) => data,
            None => {
                self.done = true;
                return Err(ClientError::ConnectionClosed);
            }
        };
        self.outstanding = self.outstanding.saturating_sub(1);

        if let Some(error) = data.error {
            self.finish();
            return Err(ClientError::from_remote(error));
        }
        if data.key.is_none() && data.value.is_none() {
            self.finish();
            return Ok(None);
        }

        if self.outstanding <= self.batch / 2 {
            let grant = self.batch - self.outstanding;
            self.conn.request_more(self.handle, grant)?;
            self.outstanding += grant;
        }

        Ok(Some((data.key, data.value)))
    }

    /// Reads every remaining element.
    pub async fn collect(mut self) -> Result<Vec<RemoteEntry>, ClientError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Closes the iterator early.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.conn.close_iterator(self.handle);
        }
    }
}

impl Drop for RemoteIterator {
    fn drop(&mut self) {
        self.finish();
    }
}
