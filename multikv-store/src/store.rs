//! The store contract the server executes requests against.

use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use multikv_protocol::{BatchOp, IteratorOptions};

/// One cursor element. Either side is absent when the iterator options
/// excluded keys or values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

/// An ordered key-value store.
///
/// Every operation may suspend before completing. A single `put`, `del` or
/// `batch` call is atomic as far as the implementation guarantees it; the
/// server adds no coordination of its own.
#[async_trait]
pub trait Store: Send + Sync {
    fn is_open(&self) -> bool;

    async fn open(&self) -> Result<(), StoreError>;

    async fn get(&self, key: Bytes) -> Result<Bytes, StoreError>;

    async fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError>;

    async fn del(&self, key: Bytes) -> Result<(), StoreError>;

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Opens a range cursor.
    fn iterator(&self, options: IteratorOptions) -> Box<dyn Cursor>;
}

/// A range cursor over a [`Store`].
#[async_trait]
pub trait Cursor: Send {
    /// Advances the cursor. `Ok(None)` means it is exhausted.
    async fn next(&mut self) -> Result<Option<Entry>, StoreError>;

    /// Releases the cursor. Later calls to `next` fail.
    async fn end(&mut self);
}
