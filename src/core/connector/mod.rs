// src/core/connector/mod.rs

//! The seam between the session layer and a wire protocol.
//!
//! A `Connector` turns session-level intents (create a consumer, send a message,
//! acknowledge, settle a transaction) into protocol operations. Inbound
//! deliveries flow the other way through the `InboundDispatcher` the owning
//! connection registers.

mod info;
pub mod loopback;

pub use info::{
    AcknowledgeMode, ConnectorResource, ConsumerInfo, ProducerInfo, ResourceId, SessionInfo,
    TransactionInfo,
};
pub use loopback::LoopbackConnector;

use crate::core::errors::ConnectorError;
use crate::core::message::{Destination, Message, MessageBody};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Weak;

/// Receives messages the connector delivers for a consumer.
pub trait InboundDispatcher: Send + Sync {
    fn dispatch(&self, consumer_id: &str, message: Message);
}

pub trait Connector: Send + Sync {
    /// Registers where inbound messages are delivered.
    fn set_dispatcher(&self, dispatcher: Weak<dyn InboundDispatcher>);

    fn create_session(
        &self,
        connection_id: &str,
        ack_mode: AcknowledgeMode,
    ) -> Result<SessionInfo, ConnectorError>;

    /// Releases a connector-level session. Called when a session closes or
    /// fails to finish construction.
    fn destroy_session(&self, _session: &SessionInfo) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn create_consumer(
        &self,
        destination: &Destination,
        session: &SessionInfo,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<ConsumerInfo, ConnectorError>;

    /// Called once the session is ready to receive for `consumer`. Messages held
    /// for the consumer may be delivered from here on.
    fn start_consumer(&self, _consumer: &ConsumerInfo) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn create_durable_consumer(
        &self,
        topic: &Destination,
        session: &SessionInfo,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<ConsumerInfo, ConnectorError>;

    fn create_producer(
        &self,
        destination: Option<&Destination>,
        session: &SessionInfo,
    ) -> Result<ProducerInfo, ConnectorError>;

    fn create_queue(
        &self,
        name: &str,
        session: &SessionInfo,
    ) -> Result<Destination, ConnectorError>;

    fn create_topic(
        &self,
        name: &str,
        session: &SessionInfo,
    ) -> Result<Destination, ConnectorError>;

    fn create_temporary_queue(&self, session: &SessionInfo) -> Result<Destination, ConnectorError>;

    fn create_temporary_topic(&self, session: &SessionInfo) -> Result<Destination, ConnectorError>;

    /// Allocates an empty message, tied to `transaction` when the session is transacted.
    fn create_message(
        &self,
        session: &SessionInfo,
        transaction: Option<&TransactionInfo>,
    ) -> Result<Message, ConnectorError>;

    fn create_bytes_message(
        &self,
        session: &SessionInfo,
        transaction: Option<&TransactionInfo>,
    ) -> Result<Message, ConnectorError> {
        let mut message = self.create_message(session, transaction)?;
        message.body = MessageBody::Bytes(Bytes::new());
        Ok(message)
    }

    fn create_text_message(
        &self,
        session: &SessionInfo,
        transaction: Option<&TransactionInfo>,
    ) -> Result<Message, ConnectorError> {
        let mut message = self.create_message(session, transaction)?;
        message.body = MessageBody::Text(String::new());
        Ok(message)
    }

    fn create_map_message(
        &self,
        session: &SessionInfo,
        transaction: Option<&TransactionInfo>,
    ) -> Result<Message, ConnectorError> {
        let mut message = self.create_message(session, transaction)?;
        message.body = MessageBody::Map(BTreeMap::new());
        Ok(message)
    }

    fn send(&self, message: &Message, producer: &ProducerInfo) -> Result<(), ConnectorError>;

    fn acknowledge(
        &self,
        session: &SessionInfo,
        consumer: &ConsumerInfo,
        message: &Message,
    ) -> Result<(), ConnectorError>;

    /// Opens a new transaction for a transacted session.
    fn start_transaction(&self, session: &SessionInfo) -> Result<TransactionInfo, ConnectorError>;

    fn commit(
        &self,
        transaction: &TransactionInfo,
        session: &SessionInfo,
    ) -> Result<(), ConnectorError>;

    fn rollback(
        &self,
        transaction: &TransactionInfo,
        session: &SessionInfo,
    ) -> Result<(), ConnectorError>;

    fn destroy_resource(&self, resource: &ConnectorResource) -> Result<(), ConnectorError>;

    fn close(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
