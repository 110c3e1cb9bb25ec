// src/core/connector/info.rs

//! Connector-issued descriptors for sessions, consumers, producers and
//! transactions, plus the handle used to release them.

use crate::core::message::Destination;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// How messages received by a session are acknowledged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AcknowledgeMode {
    #[default]
    AutoAcknowledge,
    ClientAcknowledge,
    DupsOkAcknowledge,
    SessionTransacted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: u64,
    pub connection_id: String,
    pub ack_mode: AcknowledgeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub consumer_id: String,
    pub session_id: u64,
    pub connection_id: String,
    pub destination: Destination,
    pub selector: Option<String>,
    /// Suppresses delivery of messages published on the same connection.
    pub no_local: bool,
    /// The durable subscription name, if this consumer backs one.
    pub subscription_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: String,
    pub session_id: u64,
    pub connection_id: String,
    /// `None` for an anonymous producer that names the destination on every send.
    pub destination: Option<Destination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionInfo {
    pub transaction_id: u64,
    pub session_id: u64,
}

/// The identity under which a session tracks one of its closeable resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Consumer(String),
    Producer(String),
    TemporaryDestination(Destination),
}

/// A protocol-level resource the connector must be told to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorResource {
    Consumer(ConsumerInfo),
    Producer(ProducerInfo),
    TemporaryDestination(Destination),
}

impl ConnectorResource {
    pub fn id(&self) -> ResourceId {
        match self {
            ConnectorResource::Consumer(info) => ResourceId::Consumer(info.consumer_id.clone()),
            ConnectorResource::Producer(info) => ResourceId::Producer(info.producer_id.clone()),
            ConnectorResource::TemporaryDestination(dest) => {
                ResourceId::TemporaryDestination(dest.clone())
            }
        }
    }
}
