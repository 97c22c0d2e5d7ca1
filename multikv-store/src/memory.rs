//! In-memory ordered store.

use crate::error::StoreError;
use crate::store::{Cursor, Entry, Store};
use async_trait::async_trait;
use bytes::Bytes;
use multikv_protocol::{BatchOp, ChangeEvent, IteratorOptions};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the local change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
    open: AtomicBool,
    changes: broadcast::Sender<ChangeEvent>,
}

/// Ordered in-memory store. Clones share the same data.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<Inner>,
}

impl MemStore {
    /// Creates an empty store. It must be opened before use.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(BTreeMap::new()),
                open: AtomicBool::new(false),
                changes,
            }),
        }
    }

    /// Subscribes to changes made through this store.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    /// Closes the store. Data is kept and reappears on the next open.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.read().is_empty()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.inner.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotOpen)
        }
    }

    fn notify(&self, event: ChangeEvent) {
        // Ignore send errors (no receivers)
        let _ = self.inner.changes.send(event);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), StoreError> {
        self.inner.open.store(true, Ordering::SeqCst);
        tracing::debug!("memory store opened ({} keys)", self.len());
        Ok(())
    }

    async fn get(&self, key: Bytes) -> Result<Bytes, StoreError> {
        self.check_open()?;
        self.inner
            .data
            .read()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
        self.check_open()?;
        self.inner.data.write().insert(key.clone(), value.clone());
        self.notify(ChangeEvent::Put { key, value });
        Ok(())
    }

    async fn del(&self, key: Bytes) -> Result<(), StoreError> {
        self.check_open()?;
        self.inner.data.write().remove(&key);
        self.notify(ChangeEvent::Del { key });
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        self.check_open()?;
        {
            let mut data = self.inner.data.write();
            for op in &ops {
                match op {
                    BatchOp::Put { key, value } => {
                        data.insert(key.clone(), value.clone());
                    }
                    BatchOp::Del { key } => {
                        data.remove(key);
                    }
                }
            }
        }
        self.notify(ChangeEvent::Batch { ops });
        Ok(())
    }

    fn iterator(&self, options: IteratorOptions) -> Box<dyn Cursor> {
        Box::new(MemCursor {
            inner: self.inner.clone(),
            options,
            position: None,
            yielded: 0,
            exhausted: false,
            ended: false,
        })
    }
}

/// Cursor over a [`MemStore`].
///
/// Holds no lock between calls; each `next` re-seeks just past the last
/// returned key, so concurrent writes ahead of the cursor are visible.
pub struct MemCursor {
    inner: Arc<Inner>,
    options: IteratorOptions,
    position: Option<Bytes>,
    yielded: u64,
    exhausted: bool,
    ended: bool,
}

impl MemCursor {
    fn bounds(&self) -> (Bound<Bytes>, Bound<Bytes>) {
        let o = &self.options;
        let mut lower = match (&o.gt, &o.gte) {
            (Some(gt), Some(gte)) if gte > gt => Bound::Included(gte.clone()),
            (Some(gt), _) => Bound::Excluded(gt.clone()),
            (None, Some(gte)) => Bound::Included(gte.clone()),
            (None, None) => Bound::Unbounded,
        };
        let mut upper = match (&o.lt, &o.lte) {
            (Some(lt), Some(lte)) if lte < lt => Bound::Included(lte.clone()),
            (Some(lt), _) => Bound::Excluded(lt.clone()),
            (None, Some(lte)) => Bound::Included(lte.clone()),
            (None, None) => Bound::Unbounded,
        };

        // The last returned key always lies inside the range, so it is
        // the tighter bound on the side the cursor moves away from.
        if let Some(position) = &self.position {
            if o.reverse {
                upper = Bound::Excluded(position.clone());
            } else {
                lower = Bound::Excluded(position.clone());
            }
        }
        (lower, upper)
    }

    fn step(&mut self) -> Option<(Bytes, Bytes)> {
        let (lower, upper) = self.bounds();
        if range_is_empty(&lower, &upper) {
            return None;
        }

        let data = self.inner.data.read();
        let mut range = data.range::<Bytes, _>((lower, upper));
        let found = if self.options.reverse {
            range.next_back()
        } else {
            range.next()
        };
        found.map(|(k, v)| (k.clone(), v.clone()))
    }
}

#[async_trait]
impl Cursor for MemCursor {
    async fn next(&mut self) -> Result<Option<Entry>, StoreError> {
        if self.ended {
            return Err(StoreError::CursorEnded);
        }
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(StoreError::NotOpen);
        }
        if self.exhausted || self.options.limit.is_some_and(|limit| self.yielded >= limit) {
            return Ok(None);
        }

        match self.step() {
            Some((key, value)) => {
                self.position = Some(key.clone());
                self.yielded += 1;
                Ok(Some(Entry {
                    key: self.options.keys.then_some(key),
                    value: self.options.values.then_some(value),
                }))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    async fn end(&mut self) {
        self.ended = true;
    }
}

/// Whether no key can satisfy both bounds. `BTreeMap::range` panics on
/// inverted bounds, so this is checked first.
fn range_is_empty(lower: &Bound<Bytes>, upper: &Bound<Bytes>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
