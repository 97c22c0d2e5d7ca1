//! # multikv-server
//!
//! Remote access server for a multikv store.
//!
//! This crate provides:
//! - Connection handling over TCP or any async duplex stream
//! - Request dispatch with an optional read-only mode
//! - Server-side iterators with client-granted batch budgets
//! - Per-connection change subscriptions fed by a server-wide event bus

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod iterator;
pub mod server;
pub mod session;
pub mod subscription;

pub use broadcast::EventBus;
pub use config::{Config, ConfigError, NetworkConfig, ServerSection};
pub use connection::serve_connection;
pub use dispatcher::{Dispatcher, READ_ONLY_ERROR};
pub use error::ServerError;
pub use iterator::{IteratorTable, Phase};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::Session;
pub use subscription::SubscriptionRegistry;
