// src/core/session/consumer.rs

//! A session-owned message consumer.

use super::transaction::RedeliveryTarget;
use super::{Closeable, Session};
use crate::core::concurrent::{AtomicBoolean, BlockingQueue};
use crate::core::connector::{AcknowledgeMode, ConnectorResource, ConsumerInfo};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::listener::MessageListener;
use crate::core::message::{Destination, Message};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Receives messages for one connector-level consumer, either by polling
/// (`receive*`) or through a registered [`MessageListener`].
///
/// In auto, dups-ok and transacted modes every message handed to the
/// application is acknowledged through the session right after delivery. In
/// client mode the application calls [`MessageConsumer::acknowledge`].
pub struct MessageConsumer {
    info: ConsumerInfo,
    session: Weak<Session>,
    ack_mode: AcknowledgeMode,
    pending: BlockingQueue<Message>,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
    closed: AtomicBoolean,
    self_ref: Weak<MessageConsumer>,
}

impl MessageConsumer {
    pub(crate) fn new(
        info: ConsumerInfo,
        session: Weak<Session>,
        ack_mode: AcknowledgeMode,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            info,
            session,
            ack_mode,
            pending: BlockingQueue::new(),
            listener: RwLock::new(None),
            closed: AtomicBoolean::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    pub fn consumer_id(&self) -> &str {
        &self.info.consumer_id
    }

    pub fn destination(&self) -> &Destination {
        &self.info.destination
    }

    pub fn message_selector(&self) -> Option<&str> {
        self.info.selector.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Messages delivered but not yet received by the application.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn redelivery_target(&self) -> Weak<dyn RedeliveryTarget> {
        self.self_ref.clone()
    }

    fn ensure_open(&self, at: &str) -> CmsResult<()> {
        if self.closed.get() {
            return Err(CmsError::InvalidState(format!(
                "{at} - Consumer Already Closed"
            )));
        }
        Ok(())
    }

    /// Installs a listener, or removes it with `None`. Messages already waiting
    /// for `receive` are handed to the new listener.
    pub fn set_message_listener(
        &self,
        listener: Option<Arc<dyn MessageListener>>,
    ) -> CmsResult<()> {
        self.ensure_open("MessageConsumer::setMessageListener")?;
        *self.listener.write() = listener.clone();
        if let Some(listener) = listener {
            for message in self.pending.drain() {
                self.deliver_to(&listener, message);
            }
        }
        Ok(())
    }

    pub fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.listener.read().clone()
    }

    /// Blocks until a message arrives. Returns `None` if the consumer is closed
    /// while waiting.
    pub fn receive(&self) -> CmsResult<Option<Message>> {
        self.ensure_open("MessageConsumer::receive")?;
        loop {
            let Some(message) = self.pending.take_or_exit(|_| self.closed.get()) else {
                return Ok(None);
            };
            if let Some(message) = self.accept(message) {
                return Ok(Some(message));
            }
        }
    }

    /// Waits at most `timeout` for a message.
    pub fn receive_timeout(&self, timeout: Duration) -> CmsResult<Option<Message>> {
        self.ensure_open("MessageConsumer::receive")?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let Some(message) = self
                .pending
                .take_timeout(remaining, |_| self.closed.get())
            else {
                return Ok(None);
            };
            if let Some(message) = self.accept(message) {
                return Ok(Some(message));
            }
        }
    }

    pub fn receive_no_wait(&self) -> CmsResult<Option<Message>> {
        self.ensure_open("MessageConsumer::receiveNoWait")?;
        while let Some(message) = self.pending.try_take() {
            if let Some(message) = self.accept(message) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Acknowledges `message` in client-acknowledge mode. In the other modes
    /// messages are acknowledged on delivery and this is a no-op.
    pub fn acknowledge(&self, message: &Message) -> CmsResult<()> {
        self.ensure_open("MessageConsumer::acknowledge")?;
        if self.ack_mode != AcknowledgeMode::ClientAcknowledge {
            return Ok(());
        }
        self.session()?.acknowledge(self, message)
    }

    fn session(&self) -> CmsResult<Arc<Session>> {
        self.session.upgrade().ok_or_else(|| {
            CmsError::NullPointer("MessageConsumer - owning session is gone".to_string())
        })
    }

    /// Drops expired messages and acknowledges the ones handed to the application.
    fn accept(&self, message: Message) -> Option<Message> {
        if message.is_expired(Utc::now().timestamp_millis()) {
            debug!(
                "Consumer {}: Dropping expired message {:?}.",
                self.info.consumer_id, message.message_id
            );
            return None;
        }
        self.after_delivery(&message);
        Some(message)
    }

    fn deliver_to(&self, listener: &Arc<dyn MessageListener>, message: Message) {
        if message.is_expired(Utc::now().timestamp_millis()) {
            return;
        }
        listener.on_message(message.clone());
        self.after_delivery(&message);
    }

    fn after_delivery(&self, message: &Message) {
        if self.ack_mode == AcknowledgeMode::ClientAcknowledge {
            return;
        }
        let result = self
            .session()
            .and_then(|session| session.acknowledge(self, message));
        if let Err(e) = result {
            warn!(
                "Consumer {}: Failed to acknowledge message {:?}: {}",
                self.info.consumer_id, message.message_id, e
            );
        }
    }
}

impl MessageListener for MessageConsumer {
    /// Inbound delivery from the connection.
    fn on_message(&self, message: Message) {
        if self.closed.get() {
            return;
        }
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => self.deliver_to(&listener, message),
            None => self.pending.push(message),
        }
    }
}

impl RedeliveryTarget for MessageConsumer {
    fn redeliver(&self, message: Message) {
        debug!(
            "Consumer {}: Redelivering message {:?} (attempt {}).",
            self.info.consumer_id, message.message_id, message.redelivery_count
        );
        self.on_message(message);
    }
}

impl Closeable for MessageConsumer {
    fn close(&self) -> CmsResult<()> {
        if self.closed.get_and_set(true) {
            return Ok(());
        }
        self.pending.wake_all();
        *self.listener.write() = None;
        let discarded = self.pending.drain().len();
        if discarded > 0 {
            debug!(
                "Consumer {}: Discarded {} undelivered messages on close.",
                self.info.consumer_id, discarded
            );
        }
        match self.session.upgrade() {
            Some(session) => session.on_destroy_session_resource(&self.connector_resource()),
            // The session is being dropped and releases its resources itself.
            None => Ok(()),
        }
    }

    fn connector_resource(&self) -> ConnectorResource {
        ConnectorResource::Consumer(self.info.clone())
    }
}
