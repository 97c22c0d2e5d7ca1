//! # multikv-client
//!
//! Client library for multikv.
//!
//! This crate provides:
//! - A call correlator over any async duplex stream
//! - Store operations that wait for the link when issued early
//! - Remote iterators with automatic budget top-ups
//! - Change listeners that survive being registered before connect

pub mod client;
pub mod connection;
pub mod error;
pub mod iterator;

pub use client::{Client, ClientOptions, Listener, DEFAULT_ITERATOR_BATCH};
pub use connection::Connection;
pub use error::ClientError;
pub use iterator::{RemoteEntry, RemoteIterator};
