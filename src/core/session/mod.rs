// src/core/session/mod.rs

//! The session layer: a session, the resources it creates, its transaction
//! coordinator and its async send worker.

pub mod async_sender;
pub mod consumer;
pub mod core;
pub mod producer;
pub mod registry;
pub mod temporary;
pub mod transaction;

pub use self::core::Session;
pub use async_sender::{AsyncSender, OutboundMessage};
pub use consumer::MessageConsumer;
pub use producer::MessageProducer;
pub use registry::ResourceRegistry;
pub use temporary::TemporaryDestination;
pub use transaction::{Redelivery, RedeliveryTarget, Transaction};

use crate::core::concurrent::AtomicInteger;
use crate::core::connector::{ConnectorResource, ResourceId};
use crate::core::errors::CmsResult;

/// A session-created object that needs explicit teardown.
pub trait Closeable: Send + Sync {
    /// Closes the resource. Closing an already closed resource is a no-op.
    fn close(&self) -> CmsResult<()>;

    /// The connector-level handle released when this resource is destroyed.
    fn connector_resource(&self) -> ConnectorResource;

    fn resource_id(&self) -> ResourceId {
        self.connector_resource().id()
    }
}

/// Per-session send counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    sent_sync: AtomicInteger,
    sent_async: AtomicInteger,
    purged: AtomicInteger,
}

impl SessionStats {
    /// Messages forwarded to the connector on the caller's thread.
    pub fn sent_sync(&self) -> usize {
        self.sent_sync.get().max(0) as usize
    }

    /// Messages forwarded to the connector by the async send worker.
    pub fn sent_async(&self) -> usize {
        self.sent_async.get().max(0) as usize
    }

    /// Queued async messages discarded by `close` without being forwarded.
    pub fn purged(&self) -> usize {
        self.purged.get().max(0) as usize
    }

    pub(crate) fn record_sync_send(&self) {
        self.sent_sync.increment_and_get();
    }

    pub(crate) fn record_async_send(&self) {
        self.sent_async.increment_and_get();
    }

    pub(crate) fn record_purged(&self, count: usize) {
        self.purged.add_and_get(count as i32);
    }
}
