//! Iterator engine.
//!
//! Each handle on a connection owns one store cursor. The client grants a
//! budget of elements; the engine fetches one element at a time and stops
//! when the budget runs out, the cursor is exhausted, or the cursor fails.
//!
//! Fetches run as futures owned by the connection loop. A fetch future takes
//! the cursor with it and hands it back in [`Fetched`], so a handle has at
//! most one fetch in flight and its elements leave in fetch order.

use futures::future::BoxFuture;
use futures::FutureExt;
use multikv_protocol::{IteratorData, IteratorOptions};
use multikv_store::{Cursor, Entry, Store, StoreError};
use std::collections::HashMap;

/// Work produced by the engine: a cursor fetch, or a cursor release that
/// resolves to `None`.
pub type CursorTask = BoxFuture<'static, Option<Fetched>>;

/// Lifecycle of an iterator handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Cursor opened, no fetch issued yet.
    Created,
    /// Fetching while budget allows.
    Streaming,
    /// Closed. The handle slot is cleared.
    Ended,
}

/// Result of one cursor fetch, carrying the cursor back to its handle.
pub struct Fetched {
    handle: u64,
    generation: u64,
    cursor: Box<dyn Cursor>,
    result: Result<Option<Entry>, StoreError>,
}

impl Fetched {
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

struct IteratorHandle {
    phase: Phase,
    /// Distinguishes this cursor from an earlier one opened under the same
    /// handle id.
    generation: u64,
    /// `None` while a fetch is in flight.
    cursor: Option<Box<dyn Cursor>>,
    budget: u64,
    in_flight: bool,
    fetched_once: bool,
    /// Last element was an error or the end marker.
    stopped: bool,
}

impl IteratorHandle {
    fn next_fetch(&mut self, handle: u64) -> Option<CursorTask> {
        if self.phase != Phase::Streaming || self.in_flight {
            return None;
        }
        if self.fetched_once && (self.budget == 0 || self.stopped) {
            return None;
        }

        let mut cursor = self.cursor.take()?;
        self.in_flight = true;
        self.fetched_once = true;
        let generation = self.generation;

        Some(
            async move {
                let result = cursor.next().await;
                Some(Fetched {
                    handle,
                    generation,
                    cursor,
                    result,
                })
            }
            .boxed(),
        )
    }
}

fn release(mut cursor: Box<dyn Cursor>) -> CursorTask {
    async move {
        cursor.end().await;
        None
    }
    .boxed()
}

/// Iterator handles of one connection.
#[derive(Default)]
pub struct IteratorTable {
    handles: HashMap<u64, IteratorHandle>,
    next_generation: u64,
}

impl IteratorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an Iterator request for `handle`.
    ///
    /// An unknown handle with a non-zero batch opens a cursor with that
    /// budget. A known handle with a non-zero batch gets the batch added to
    /// its budget. A zero batch closes the handle; on an unknown handle it
    /// does nothing.
    pub fn request(
        &mut self,
        store: &dyn Store,
        handle: u64,
        options: IteratorOptions,
        batch: u64,
    ) -> Option<CursorTask> {
        if batch == 0 {
            return self.close(handle);
        }

        if let Some(entry) = self.handles.get_mut(&handle) {
            entry.budget = entry.budget.saturating_add(batch);
            tracing::debug!("iterator {} budget now {}", handle, entry.budget);
            return entry.next_fetch(handle);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let mut entry = IteratorHandle {
            phase: Phase::Created,
            generation,
            cursor: Some(store.iterator(options)),
            budget: batch,
            in_flight: false,
            fetched_once: false,
            stopped: false,
        };
        tracing::debug!("iterator {} opened with budget {}", handle, batch);

        entry.phase = Phase::Streaming;
        let task = entry.next_fetch(handle);
        self.handles.insert(handle, entry);
        task
    }

    /// Closes `handle` and clears its slot.
    ///
    /// Returns the release of an idle cursor. A cursor that is out on a
    /// fetch is released when that fetch completes.
    pub fn close(&mut self, handle: u64) -> Option<CursorTask> {
        let mut entry = self.handles.remove(&handle)?;
        entry.phase = Phase::Ended;
        tracing::debug!("iterator {} closed", handle);
        entry.cursor.take().map(release)
    }

    /// Applies a completed fetch.
    ///
    /// Returns the element to send, if the handle is still live, and the
    /// next piece of work: either the following fetch, or the release of a
    /// cursor whose handle was closed meanwhile.
    pub fn complete(&mut self, fetched: Fetched) -> (Option<IteratorData>, Option<CursorTask>) {
        let Fetched {
            handle,
            generation,
            cursor,
            result,
        } = fetched;

        let entry = match self.handles.get_mut(&handle) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                tracing::debug!("discarding late fetch for iterator {}", handle);
                return (None, Some(release(cursor)));
            }
        };

        entry.in_flight = false;
        entry.cursor = Some(cursor);

        let data = match result {
            Ok(Some(Entry { key, value })) => IteratorData {
                id: handle,
                error: None,
                key,
                value,
            },
            Ok(None) => {
                entry.stopped = true;
                IteratorData {
                    id: handle,
                    ..Default::default()
                }
            }
            Err(e) => {
                entry.stopped = true;
                IteratorData {
                    id: handle,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        entry.budget = entry.budget.saturating_sub(1);

        (Some(data), entry.next_fetch(handle))
    }

    /// Closes every handle. Returns the releases of idle cursors. A cursor
    /// out on a fetch is released when [`complete`](Self::complete) sees
    /// the fetch come back.
    pub fn teardown(&mut self) -> Vec<CursorTask> {
        let count = self.handles.len();
        let releases: Vec<CursorTask> = self
            .handles
            .drain()
            .filter_map(|(_, mut entry)| {
                entry.phase = Phase::Ended;
                entry.cursor.take().map(release)
            })
            .collect();
        if count > 0 {
            tracing::debug!("closed {} iterators ({} idle)", count, releases.len());
        }
        releases
    }

    /// Returns the phase of a live handle.
    pub fn phase(&self, handle: u64) -> Option<Phase> {
        self.handles.get(&handle).map(|h| h.phase)
    }

    /// Returns the remaining budget of a live handle.
    pub fn budget(&self, handle: u64) -> Option<u64> {
        self.handles.get(&handle).map(|h| h.budget)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
