// src/core/message.rs

//! The message and destination types exchanged between sessions and connectors.
//!
//! `Message` is a plain value: `clone()` produces an independent snapshot, which is
//! what the async send path relies on when it queues a copy of the caller's message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a message is sent to or consumed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Queue(String),
    Topic(String),
    TemporaryQueue(String),
    TemporaryTopic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name)
            | Destination::Topic(name)
            | Destination::TemporaryQueue(name)
            | Destination::TemporaryTopic(name) => name,
        }
    }

    /// True for publish/subscribe destinations.
    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic(_) | Destination::TemporaryTopic(_))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Destination::TemporaryQueue(_) | Destination::TemporaryTopic(_)
        )
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue://{name}"),
            Destination::Topic(name) => write!(f, "topic://{name}"),
            Destination::TemporaryQueue(name) => write!(f, "temp-queue://{name}"),
            Destination::TemporaryTopic(name) => write!(f, "temp-topic://{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryMode {
    #[default]
    Persistent,
    NonPersistent,
}

/// The default message priority (0 lowest, 9 highest).
pub const DEFAULT_PRIORITY: u8 = 4;

/// A value stored in the body of a map message.
#[derive(Debug, Clone, PartialEq)]
pub enum MapValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Bytes),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MessageBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Map(BTreeMap<String, MapValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: Option<String>,
    pub destination: Option<Destination>,
    pub reply_to: Option<Destination>,
    pub correlation_id: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    /// Milliseconds since the Unix epoch at which the message was sent; `0` if unset.
    pub timestamp: i64,
    /// Milliseconds since the Unix epoch after which the message expires; `0` means never.
    pub expiration: i64,
    pub redelivery_count: u32,
    /// The transaction the message was created in, if its session is transacted.
    pub transaction_id: Option<u64>,
    pub producer_id: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub body: MessageBody,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            message_id: None,
            destination: None,
            reply_to: None,
            correlation_id: None,
            delivery_mode: DeliveryMode::default(),
            priority: DEFAULT_PRIORITY,
            timestamp: 0,
            expiration: 0,
            redelivery_count: 0,
            transaction_id: None,
            producer_id: None,
            properties: BTreeMap::new(),
            body: MessageBody::Empty,
        }
    }
}

impl Message {
    pub fn with_body(body: MessageBody) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Replaces the body with `text`.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.body = MessageBody::Text(text.into());
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            MessageBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Replaces the body with a copy of `bytes`.
    pub fn set_body_bytes(&mut self, bytes: &[u8]) {
        self.body = MessageBody::Bytes(Bytes::copy_from_slice(bytes));
    }

    /// The body length in bytes for bytes and text messages, `0` otherwise.
    pub fn body_length(&self) -> usize {
        match &self.body {
            MessageBody::Bytes(bytes) => bytes.len(),
            MessageBody::Text(text) => text.len(),
            _ => 0,
        }
    }

    /// Sets a map entry, turning the body into a map body if needed.
    pub fn set_map_value(&mut self, name: impl Into<String>, value: MapValue) {
        if !matches!(self.body, MessageBody::Map(_)) {
            self.body = MessageBody::Map(BTreeMap::new());
        }
        if let MessageBody::Map(map) = &mut self.body {
            map.insert(name.into(), value);
        }
    }

    pub fn map_value(&self, name: &str) -> Option<&MapValue> {
        match &self.body {
            MessageBody::Map(map) => map.get(name),
            _ => None,
        }
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// True if the message has an expiration that lies before `now_millis`.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expiration > 0 && self.expiration <= now_millis
    }
}
