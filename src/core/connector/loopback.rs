// src/core/connector/loopback.rs

//! An in-process connector that delivers messages between consumers and
//! producers of the connections attached to it.
//!
//! Queue sends go to one consumer of the queue, picked round-robin, and are held
//! until a consumer exists. Topic sends go to every consumer of the topic except
//! `no_local` consumers on the sending connection. Sends made inside a transaction
//! are buffered until the transaction commits and dropped on rollback.
//!
//! Message selectors are stored on the consumer but not evaluated: a consumer
//! with a selector receives every message routed to it.
//!
//! Every call is recorded so embedding code and tests can inspect what the
//! session layer asked for.

use super::{
    AcknowledgeMode, Connector, ConnectorResource, ConsumerInfo, InboundDispatcher, ProducerInfo,
    SessionInfo, TransactionInfo,
};
use crate::core::errors::ConnectorError;
use crate::core::message::{Destination, Message};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// A hook run at the start of every `send`, before the message is routed.
pub type SendHook = Arc<dyn Fn(&Message) -> Result<(), ConnectorError> + Send + Sync>;

/// An acknowledgement as seen by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub session_id: u64,
    pub consumer_id: String,
    pub message_id: Option<String>,
    pub transaction_id: Option<u64>,
}

#[derive(Default)]
pub struct LoopbackConnector {
    dispatchers: RwLock<Vec<Weak<dyn InboundDispatcher>>>,
    next_session_id: AtomicU64,
    next_transaction_id: AtomicU64,
    next_message_id: AtomicU64,
    round_robin: AtomicUsize,
    consumers: DashMap<String, ConsumerInfo>,
    backlog: DashMap<Destination, VecDeque<Message>>,
    transacted_sends: DashMap<u64, Vec<(Destination, Message)>>,
    sent: Mutex<Vec<Message>>,
    acknowledged: Mutex<Vec<AckRecord>>,
    commits: Mutex<Vec<TransactionInfo>>,
    rollbacks: Mutex<Vec<TransactionInfo>>,
    destroyed: Mutex<Vec<ConnectorResource>>,
    destroyed_sessions: Mutex<Vec<SessionInfo>>,
    failing_transaction_starts: AtomicUsize,
    send_hook: RwLock<Option<SendHook>>,
    closed: AtomicBool,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Default::default()
    }

    /// Installs (or clears) a hook that runs before every send. A hook error is
    /// returned from `send` without routing the message.
    pub fn set_send_hook(&self, hook: Option<SendHook>) {
        *self.send_hook.write() = hook;
    }

    /// Every message accepted by `send`, in call order.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn acknowledgements(&self) -> Vec<AckRecord> {
        self.acknowledged.lock().clone()
    }

    pub fn commits(&self) -> Vec<TransactionInfo> {
        self.commits.lock().clone()
    }

    pub fn rollbacks(&self) -> Vec<TransactionInfo> {
        self.rollbacks.lock().clone()
    }

    pub fn destroyed_resources(&self) -> Vec<ConnectorResource> {
        self.destroyed.lock().clone()
    }

    pub fn destroyed_sessions(&self) -> Vec<SessionInfo> {
        self.destroyed_sessions.lock().clone()
    }

    /// Makes the next `count` calls to `start_transaction` fail with `Unavailable`.
    pub fn fail_transaction_starts(&self, count: usize) {
        self.failing_transaction_starts.store(count, Ordering::SeqCst);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// The number of queued messages waiting for a consumer on `destination`.
    pub fn backlog_len(&self, destination: &Destination) -> usize {
        self.backlog.get(destination).map_or(0, |q| q.len())
    }

    fn ensure_open(&self) -> Result<(), ConnectorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::Closed);
        }
        Ok(())
    }

    fn deliver(&self, consumer_id: &str, message: Message) {
        let dispatchers: Vec<_> = self
            .dispatchers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for dispatcher in dispatchers {
            dispatcher.dispatch(consumer_id, message.clone());
        }
    }

    /// Routes a message to its consumers. Deliveries happen after every map guard
    /// has been released, since dispatch may re-enter the connector.
    fn route(&self, destination: &Destination, sender_connection: &str, message: Message) {
        let targets: Vec<String> = if destination.is_topic() {
            self.consumers
                .iter()
                .filter(|c| &c.destination == destination)
                .filter(|c| !(c.no_local && c.connection_id == sender_connection))
                .map(|c| c.consumer_id.clone())
                .collect()
        } else {
            let mut candidates: Vec<String> = self
                .consumers
                .iter()
                .filter(|c| &c.destination == destination)
                .map(|c| c.consumer_id.clone())
                .collect();
            if candidates.is_empty() {
                self.backlog
                    .entry(destination.clone())
                    .or_default()
                    .push_back(message);
                debug!("Held message for {} until a consumer arrives.", destination);
                return;
            }
            candidates.sort();
            let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
            vec![candidates.swap_remove(index)]
        };

        for consumer_id in targets {
            self.deliver(&consumer_id, message.clone());
        }
    }

    fn flush_backlog(&self, consumer: &ConsumerInfo) {
        if consumer.destination.is_topic() {
            return;
        }
        let pending = self
            .backlog
            .remove(&consumer.destination)
            .map(|(_, queue)| queue)
            .unwrap_or_default();
        for message in pending {
            self.deliver(&consumer.consumer_id, message);
        }
    }

    fn register_consumer(&self, info: ConsumerInfo) -> ConsumerInfo {
        if let Some(selector) = &info.selector {
            warn!(
                "Consumer {}: Selector '{}' is not evaluated by the loopback connector.",
                info.consumer_id, selector
            );
        }
        self.consumers.insert(info.consumer_id.clone(), info.clone());
        debug!(
            "Registered consumer {} on {}.",
            info.consumer_id, info.destination
        );
        info
    }
}

impl Connector for LoopbackConnector {
    fn set_dispatcher(&self, dispatcher: Weak<dyn InboundDispatcher>) {
        let mut dispatchers = self.dispatchers.write();
        dispatchers.retain(|d| d.strong_count() > 0);
        dispatchers.push(dispatcher);
    }

    fn create_session(
        &self,
        connection_id: &str,
        ack_mode: AcknowledgeMode,
    ) -> Result<SessionInfo, ConnectorError> {
        self.ensure_open()?;
        Ok(SessionInfo {
            session_id: self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1,
            connection_id: connection_id.to_string(),
            ack_mode,
        })
    }

    fn destroy_session(&self, session: &SessionInfo) -> Result<(), ConnectorError> {
        self.destroyed_sessions.lock().push(session.clone());
        debug!("Destroyed session {}.", session.session_id);
        Ok(())
    }

    fn create_consumer(
        &self,
        destination: &Destination,
        session: &SessionInfo,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<ConsumerInfo, ConnectorError> {
        self.ensure_open()?;
        let info = self.register_consumer(ConsumerInfo {
            consumer_id: format!("ID:consumer-{}", Uuid::new_v4()),
            session_id: session.session_id,
            connection_id: session.connection_id.clone(),
            destination: destination.clone(),
            selector: selector.map(str::to_string),
            no_local,
            subscription_name: None,
        });
        Ok(info)
    }

    fn start_consumer(&self, consumer: &ConsumerInfo) -> Result<(), ConnectorError> {
        self.ensure_open()?;
        self.flush_backlog(consumer);
        Ok(())
    }

    fn create_durable_consumer(
        &self,
        topic: &Destination,
        session: &SessionInfo,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<ConsumerInfo, ConnectorError> {
        self.ensure_open()?;
        if !topic.is_topic() {
            return Err(ConnectorError::Protocol(format!(
                "durable subscriptions require a topic, got {topic}"
            )));
        }
        let info = self.register_consumer(ConsumerInfo {
            consumer_id: format!("ID:durable-{}-{}", name, Uuid::new_v4()),
            session_id: session.session_id,
            connection_id: session.connection_id.clone(),
            destination: topic.clone(),
            selector: selector.map(str::to_string),
            no_local,
            subscription_name: Some(name.to_string()),
        });
        Ok(info)
    }

    fn create_producer(
        &self,
        destination: Option<&Destination>,
        session: &SessionInfo,
    ) -> Result<ProducerInfo, ConnectorError> {
        self.ensure_open()?;
        Ok(ProducerInfo {
            producer_id: format!("ID:producer-{}", Uuid::new_v4()),
            session_id: session.session_id,
            connection_id: session.connection_id.clone(),
            destination: destination.cloned(),
        })
    }

    fn create_queue(
        &self,
        name: &str,
        _session: &SessionInfo,
    ) -> Result<Destination, ConnectorError> {
        self.ensure_open()?;
        Ok(Destination::Queue(name.to_string()))
    }

    fn create_topic(
        &self,
        name: &str,
        _session: &SessionInfo,
    ) -> Result<Destination, ConnectorError> {
        self.ensure_open()?;
        Ok(Destination::Topic(name.to_string()))
    }

    fn create_temporary_queue(&self, session: &SessionInfo) -> Result<Destination, ConnectorError> {
        self.ensure_open()?;
        Ok(Destination::TemporaryQueue(format!(
            "{}:{}:{}",
            session.connection_id,
            session.session_id,
            Uuid::new_v4()
        )))
    }

    fn create_temporary_topic(&self, session: &SessionInfo) -> Result<Destination, ConnectorError> {
        self.ensure_open()?;
        Ok(Destination::TemporaryTopic(format!(
            "{}:{}:{}",
            session.connection_id,
            session.session_id,
            Uuid::new_v4()
        )))
    }

    fn create_message(
        &self,
        _session: &SessionInfo,
        transaction: Option<&TransactionInfo>,
    ) -> Result<Message, ConnectorError> {
        self.ensure_open()?;
        Ok(Message {
            transaction_id: transaction.map(|tx| tx.transaction_id),
            ..Default::default()
        })
    }

    fn send(&self, message: &Message, producer: &ProducerInfo) -> Result<(), ConnectorError> {
        self.ensure_open()?;
        let hook = self.send_hook.read().clone();
        if let Some(hook) = hook {
            hook(message)?;
        }

        let destination = message
            .destination
            .clone()
            .or_else(|| producer.destination.clone())
            .ok_or_else(|| ConnectorError::Protocol("message has no destination".to_string()))?;

        let mut outbound = message.clone();
        if outbound.message_id.is_none() {
            outbound.message_id = Some(format!(
                "ID:{}:{}",
                producer.producer_id,
                self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
            ));
        }
        self.sent.lock().push(outbound.clone());

        match outbound.transaction_id {
            Some(tx_id) => {
                self.transacted_sends
                    .entry(tx_id)
                    .or_default()
                    .push((destination, outbound));
            }
            None => self.route(&destination, &producer.connection_id, outbound),
        }
        Ok(())
    }

    fn acknowledge(
        &self,
        session: &SessionInfo,
        consumer: &ConsumerInfo,
        message: &Message,
    ) -> Result<(), ConnectorError> {
        self.ensure_open()?;
        self.acknowledged.lock().push(AckRecord {
            session_id: session.session_id,
            consumer_id: consumer.consumer_id.clone(),
            message_id: message.message_id.clone(),
            transaction_id: message.transaction_id,
        });
        Ok(())
    }

    fn start_transaction(&self, session: &SessionInfo) -> Result<TransactionInfo, ConnectorError> {
        self.ensure_open()?;
        if self
            .failing_transaction_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectorError::Unavailable(
                "transaction start refused".to_string(),
            ));
        }
        Ok(TransactionInfo {
            transaction_id: self.next_transaction_id.fetch_add(1, Ordering::SeqCst) + 1,
            session_id: session.session_id,
        })
    }

    fn commit(
        &self,
        transaction: &TransactionInfo,
        session: &SessionInfo,
    ) -> Result<(), ConnectorError> {
        self.ensure_open()?;
        let buffered = self
            .transacted_sends
            .remove(&transaction.transaction_id)
            .map(|(_, sends)| sends)
            .unwrap_or_default();
        self.commits.lock().push(*transaction);
        debug!(
            "Committed transaction {} with {} buffered sends.",
            transaction.transaction_id,
            buffered.len()
        );
        for (destination, mut message) in buffered {
            message.transaction_id = None;
            self.route(&destination, &session.connection_id, message);
        }
        Ok(())
    }

    fn rollback(
        &self,
        transaction: &TransactionInfo,
        _session: &SessionInfo,
    ) -> Result<(), ConnectorError> {
        self.ensure_open()?;
        let discarded = self
            .transacted_sends
            .remove(&transaction.transaction_id)
            .map_or(0, |(_, sends)| sends.len());
        self.rollbacks.lock().push(*transaction);
        debug!(
            "Rolled back transaction {}, discarding {} buffered sends.",
            transaction.transaction_id, discarded
        );
        Ok(())
    }

    fn destroy_resource(&self, resource: &ConnectorResource) -> Result<(), ConnectorError> {
        if let ConnectorResource::Consumer(info) = resource
            && self.consumers.remove(&info.consumer_id).is_none()
        {
            warn!(
                "Destroy requested for unknown consumer {}.",
                info.consumer_id
            );
        }
        if let ConnectorResource::TemporaryDestination(destination) = resource {
            self.backlog.remove(destination);
        }
        self.destroyed.lock().push(resource.clone());
        Ok(())
    }

    fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
