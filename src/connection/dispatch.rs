// src/connection/dispatch.rs

//! Hands connector deliveries to the consumer registered for them.

use super::core::Connection;
use crate::core::concurrent::ExecutorService;
use crate::core::connector::InboundDispatcher;
use crate::core::message::Message;
use tracing::{debug, warn};

impl InboundDispatcher for Connection {
    /// Queues the delivery on the dispatch executor. Listeners never run on the
    /// connector's calling thread.
    fn dispatch(&self, consumer_id: &str, message: Message) {
        let Some(listener) = self
            .listeners
            .get(consumer_id)
            .map(|entry| entry.value().clone())
        else {
            debug!(
                "Connection {}: No listener for consumer {}, dropping message.",
                self.connection_id(),
                consumer_id
            );
            return;
        };
        if let Err(e) = self
            .dispatch_executor
            .submit(move || listener.on_message(message))
        {
            warn!(
                "Connection {}: Could not dispatch to consumer {}: {}",
                self.connection_id(),
                consumer_id,
                e
            );
        }
    }
}
