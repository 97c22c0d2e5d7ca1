//! # multikv-store
//!
//! Store contract for multikv.
//!
//! This crate provides:
//! - The async [`Store`] and [`Cursor`] traits the server executes against
//! - [`MemStore`], an ordered in-memory implementation with range cursors

pub mod error;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use memory::{MemCursor, MemStore};
pub use store::{Cursor, Entry, Store};
