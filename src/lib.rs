// src/lib.rs

//! A messaging client library: connections, sessions, producers, consumers and
//! transactions over a pluggable [`Connector`].
//!
//! Call [`initialize`] once before opening connections and [`shutdown`] when
//! the library is no longer used.

pub mod config;
pub mod connection;
pub mod core;
pub mod logging;

// Re-export
pub use crate::config::{ClientConfig, SessionConfig, TransactionConfig};
pub use crate::connection::Connection;
pub use crate::core::concurrent::{AtomicBoolean, AtomicInteger, ExecutorService, executors};
pub use crate::core::connector::{AcknowledgeMode, Connector, LoopbackConnector};
pub use crate::core::errors::{CmsError, CmsResult, ConnectorError};
pub use crate::core::listener::{ExceptionListener, MessageListener};
pub use crate::core::message::{DeliveryMode, Destination, MapValue, Message, MessageBody};
pub use crate::core::session::{
    Closeable, MessageConsumer, MessageProducer, Session, TemporaryDestination,
};

/// Sets up process-wide library state. Calling it more than once is harmless.
pub fn initialize() {
    executors::initialize();
}

/// Tears down process-wide library state set up by [`initialize`].
pub fn shutdown() {
    executors::shutdown();
}
