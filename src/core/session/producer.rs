// src/core/session/producer.rs

//! A session-owned message producer.

use super::{Closeable, Session};
use crate::core::concurrent::AtomicBoolean;
use crate::core::connector::{ConnectorResource, ProducerInfo};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::message::{DEFAULT_PRIORITY, DeliveryMode, Destination, Message};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

const MAX_PRIORITY: u8 = 9;

/// Header defaults a producer applies to every message it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    /// Message lifetime in milliseconds; `0` means messages never expire.
    pub time_to_live: i64,
    pub disable_message_id: bool,
    pub disable_timestamp: bool,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::default(),
            priority: DEFAULT_PRIORITY,
            time_to_live: 0,
            disable_message_id: false,
            disable_timestamp: false,
        }
    }
}

pub struct MessageProducer {
    info: Arc<ProducerInfo>,
    session: Weak<Session>,
    settings: Mutex<ProducerSettings>,
    closed: AtomicBoolean,
}

impl MessageProducer {
    pub(crate) fn new(info: ProducerInfo, session: Weak<Session>) -> Arc<Self> {
        Arc::new(Self {
            info: Arc::new(info),
            session,
            settings: Mutex::new(ProducerSettings::default()),
            closed: AtomicBoolean::new(false),
        })
    }

    pub fn info(&self) -> &Arc<ProducerInfo> {
        &self.info
    }

    pub fn producer_id(&self) -> &str {
        &self.info.producer_id
    }

    /// The fixed destination, or `None` for an anonymous producer.
    pub fn destination(&self) -> Option<&Destination> {
        self.info.destination.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn settings(&self) -> ProducerSettings {
        *self.settings.lock()
    }

    pub fn set_delivery_mode(&self, mode: DeliveryMode) {
        self.settings.lock().delivery_mode = mode;
    }

    pub fn set_priority(&self, priority: u8) -> CmsResult<()> {
        if priority > MAX_PRIORITY {
            return Err(CmsError::IllegalArgument(format!(
                "priority must be between 0 and {MAX_PRIORITY}, got {priority}"
            )));
        }
        self.settings.lock().priority = priority;
        Ok(())
    }

    pub fn set_time_to_live(&self, millis: i64) {
        self.settings.lock().time_to_live = millis.max(0);
    }

    pub fn set_disable_message_id(&self, disable: bool) {
        self.settings.lock().disable_message_id = disable;
    }

    pub fn set_disable_timestamp(&self, disable: bool) {
        self.settings.lock().disable_timestamp = disable;
    }

    /// Sends `message` to this producer's destination.
    ///
    /// The message headers are stamped in place, so after the call the caller's
    /// copy shows the producer id, priority, timestamp and expiration that were sent.
    pub fn send(&self, message: &mut Message) -> CmsResult<()> {
        let destination = self.info.destination.clone().ok_or_else(|| {
            CmsError::IllegalArgument(
                "MessageProducer::send - producer has no destination, use send_to".to_string(),
            )
        })?;
        self.dispatch(destination, message)
    }

    /// Sends `message` to `destination` through an anonymous producer.
    pub fn send_to(&self, destination: &Destination, message: &mut Message) -> CmsResult<()> {
        if let Some(own) = &self.info.destination
            && own != destination
        {
            return Err(CmsError::IllegalArgument(format!(
                "MessageProducer::send - producer is bound to {own}, cannot send to {destination}"
            )));
        }
        self.dispatch(destination.clone(), message)
    }

    fn dispatch(&self, destination: Destination, message: &mut Message) -> CmsResult<()> {
        if self.closed.get() {
            return Err(CmsError::InvalidState(
                "MessageProducer::send - Producer Already Closed".to_string(),
            ));
        }
        let session = self.session.upgrade().ok_or_else(|| {
            CmsError::NullPointer("MessageProducer - owning session is gone".to_string())
        })?;

        let settings = self.settings();
        message.destination = Some(destination);
        message.producer_id = Some(self.info.producer_id.clone());
        message.delivery_mode = settings.delivery_mode;
        message.priority = settings.priority;
        message.transaction_id = session
            .active_transaction("MessageProducer::send")?
            .map(|tx| tx.transaction_id);
        if settings.disable_message_id {
            message.message_id = None;
        }
        let now = Utc::now().timestamp_millis();
        message.timestamp = if settings.disable_timestamp { 0 } else { now };
        message.expiration = if settings.time_to_live > 0 {
            now + settings.time_to_live
        } else {
            0
        };

        session.send(message, &self.info)
    }
}

impl Closeable for MessageProducer {
    fn close(&self) -> CmsResult<()> {
        if self.closed.get_and_set(true) {
            return Ok(());
        }
        match self.session.upgrade() {
            Some(session) => session.on_destroy_session_resource(&self.connector_resource()),
            None => Ok(()),
        }
    }

    fn connector_resource(&self) -> ConnectorResource {
        ConnectorResource::Producer((*self.info).clone())
    }
}
