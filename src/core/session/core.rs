// src/core/session/core.rs

//! The `Session`: creates consumers, producers, destinations and messages,
//! routes acknowledgements and sends, and owns the close protocol.
//!
//! Teardown runs in a fixed order:
//!
//! 1. close every registered resource (from a snapshot, errors swallowed),
//! 2. tear down the transaction coordinator,
//! 3. unregister from the connection and release the connector session,
//! 4. mark the session closed,
//! 5. stop the async send worker,
//! 6. purge the messages it never forwarded.

use super::async_sender::AsyncSender;
use super::consumer::MessageConsumer;
use super::producer::MessageProducer;
use super::registry::ResourceRegistry;
use super::temporary::TemporaryDestination;
use super::transaction::Transaction;
use super::{Closeable, SessionStats};
use crate::config::{SessionConfig, TransactionConfig};
use crate::connection::Connection;
use crate::core::concurrent::{AtomicBoolean, ExecutorService};
use crate::core::connector::{
    AcknowledgeMode, Connector, ConnectorResource, ConsumerInfo, ProducerInfo, SessionInfo,
    TransactionInfo,
};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::listener::ExceptionListener;
use crate::core::message::{Destination, Message, MessageBody};
use crate::core::metrics;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct Session {
    info: SessionInfo,
    connection: Weak<Connection>,
    connector: Arc<dyn Connector>,
    self_ref: Weak<Session>,
    closed: Arc<AtomicBoolean>,
    /// Set as soon as `close` starts, before the resource snapshot is taken.
    closing: AtomicBoolean,
    close_lock: Mutex<()>,
    transaction: Mutex<Option<Transaction>>,
    resources: ResourceRegistry,
    async_sender: Option<AsyncSender>,
    stats: Arc<SessionStats>,
}

impl Session {
    /// Builds a session for the connector-issued `info`. Called by
    /// [`Connection::create_session`].
    ///
    /// # Errors
    ///
    /// `NullPointer` if the connection is already gone, a connector error if the
    /// first transaction cannot be started, `Generic` if the async send worker
    /// cannot be spawned.
    pub(crate) fn new(
        connection: Weak<Connection>,
        info: SessionInfo,
        config: &SessionConfig,
        transaction_config: &TransactionConfig,
    ) -> CmsResult<Arc<Self>> {
        let connector = connection
            .upgrade()
            .map(|c| c.connector())
            .ok_or_else(|| {
                CmsError::NullPointer("Session - owning connection is required".to_string())
            })?;

        let transaction = if info.ack_mode == AcknowledgeMode::SessionTransacted {
            match Transaction::new(connector.clone(), info.clone(), transaction_config) {
                Ok(transaction) => Some(transaction),
                Err(e) => {
                    if let Err(destroy_err) = connector.destroy_session(&info) {
                        debug!(
                            "Session {}: Release after failed construction: {}",
                            info.session_id, destroy_err
                        );
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };
        let async_sender = config
            .use_async_send
            .then(|| AsyncSender::new(info.session_id));

        let session = Arc::new_cyclic(|self_ref| Session {
            info,
            connection: connection.clone(),
            connector: connector.clone(),
            self_ref: self_ref.clone(),
            closed: Arc::new(AtomicBoolean::new(false)),
            closing: AtomicBoolean::new(false),
            close_lock: Mutex::new(()),
            transaction: Mutex::new(transaction),
            resources: ResourceRegistry::new(),
            async_sender,
            stats: Arc::new(SessionStats::default()),
        });
        metrics::OPEN_SESSIONS.inc();

        // On failure the session is dropped, and `Drop` runs the teardown.
        if let Some(sender) = &session.async_sender {
            sender.start(
                session.closed.clone(),
                connector,
                connection,
                session.stats.clone(),
            )?;
        }

        debug!(
            "Session {}: Created with {} (async send: {}).",
            session.info.session_id,
            session.info.ack_mode,
            session.async_sender.is_some()
        );
        Ok(session)
    }

    // --- Accessors ---

    pub fn session_info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn session_id(&self) -> u64 {
        self.info.session_id
    }

    pub fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.info.ack_mode
    }

    pub fn is_transacted(&self) -> bool {
        self.info.ack_mode == AcknowledgeMode::SessionTransacted
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn uses_async_send(&self) -> bool {
        self.async_sender.is_some()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The number of resources created by this session that are still open.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// The number of async sends waiting for the worker.
    pub fn pending_async_messages(&self) -> usize {
        self.async_sender.as_ref().map_or(0, AsyncSender::pending)
    }

    /// The number of acknowledged messages in the active transaction.
    pub fn transaction_participants(&self) -> usize {
        self.transaction
            .lock()
            .as_ref()
            .map_or(0, Transaction::participant_count)
    }

    /// The id of the active transaction, if this session is transacted.
    pub fn current_transaction_id(&self) -> Option<u64> {
        self.transaction
            .lock()
            .as_ref()
            .and_then(Transaction::info)
            .map(|tx| tx.transaction_id)
    }

    /// The transaction new messages and sends belong to, opening one if the
    /// previous start failed. `None` for a session that is not transacted.
    pub(crate) fn active_transaction(
        &self,
        at: &'static str,
    ) -> CmsResult<Option<TransactionInfo>> {
        if !self.is_transacted() {
            return Ok(None);
        }
        let mut transaction = self.transaction.lock();
        let info = transaction
            .as_mut()
            .ok_or_else(|| CmsError::closed(at))?
            .ensure_active(at)?;
        Ok(Some(info))
    }

    /// The exception listener registered on the owning connection.
    pub fn exception_listener(&self) -> Option<Arc<dyn ExceptionListener>> {
        self.connection
            .upgrade()
            .and_then(|connection| connection.exception_listener())
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    fn ensure_open(&self, at: &str) -> CmsResult<()> {
        if self.closed.get() {
            return Err(CmsError::closed(at));
        }
        Ok(())
    }

    fn ensure_transacted(&self, at: &str) -> CmsResult<()> {
        if !self.is_transacted() {
            return Err(CmsError::InvalidState(format!(
                "{at} - This Session is not Transacted"
            )));
        }
        Ok(())
    }

    fn require_connection(&self, at: &str) -> CmsResult<Arc<Connection>> {
        self.connection.upgrade().ok_or_else(|| {
            CmsError::NullPointer(format!("{at} - owning connection is gone"))
        })
    }

    /// Registers a freshly created resource. A resource that races with `close`
    /// past its snapshot is closed here instead.
    fn track(&self, resource: Arc<dyn Closeable>, at: &str) -> CmsResult<()> {
        self.resources.add(resource.clone());
        if self.closing.get() {
            if let Err(e) = resource.close() {
                debug!("{at}: Closing resource created during close failed: {e}");
            }
            self.resources.remove(&resource.resource_id());
            return Err(CmsError::closed(at));
        }
        Ok(())
    }

    // --- Consumers ---

    pub fn create_consumer(&self, destination: &Destination) -> CmsResult<Arc<MessageConsumer>> {
        self.create_consumer_with_selector(destination, None, false)
    }

    pub fn create_consumer_with_selector(
        &self,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
    ) -> CmsResult<Arc<MessageConsumer>> {
        const AT: &str = "Session::createConsumer";
        self.ensure_open(AT)?;
        let connection = self.require_connection(AT)?;
        let info = self
            .connector
            .create_consumer(destination, &self.info, selector, no_local)
            .map_err(CmsError::connector(AT))?;
        self.register_consumer(&connection, info, AT)
    }

    pub fn create_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> CmsResult<Arc<MessageConsumer>> {
        const AT: &str = "Session::createDurableConsumer";
        self.ensure_open(AT)?;
        let connection = self.require_connection(AT)?;
        let info = self
            .connector
            .create_durable_consumer(topic, &self.info, name, selector, no_local)
            .map_err(CmsError::connector(AT))?;
        self.register_consumer(&connection, info, AT)
    }

    fn register_consumer(
        &self,
        connection: &Connection,
        info: ConsumerInfo,
        at: &'static str,
    ) -> CmsResult<Arc<MessageConsumer>> {
        let consumer = MessageConsumer::new(info, self.self_ref.clone(), self.info.ack_mode);
        self.track(consumer.clone(), at)?;
        connection.add_message_listener(consumer.consumer_id(), consumer.clone());
        if let Err(e) = self.connector.start_consumer(consumer.info()) {
            if let Err(close_err) = consumer.close() {
                debug!("{at}: Cleanup after failed start: {close_err}");
            }
            return Err(CmsError::connector(at)(e));
        }
        debug!(
            "Session {}: Created consumer {} on {}.",
            self.info.session_id,
            consumer.consumer_id(),
            consumer.destination()
        );
        Ok(consumer)
    }

    // --- Producers ---

    /// Creates a producer bound to `destination`, or an anonymous one for `None`.
    pub fn create_producer(
        &self,
        destination: Option<&Destination>,
    ) -> CmsResult<Arc<MessageProducer>> {
        const AT: &str = "Session::createProducer";
        self.ensure_open(AT)?;
        let info = self
            .connector
            .create_producer(destination, &self.info)
            .map_err(CmsError::connector(AT))?;
        let producer = MessageProducer::new(info, self.self_ref.clone());
        self.track(producer.clone(), AT)?;
        Ok(producer)
    }

    // --- Destinations ---

    pub fn create_queue(&self, name: &str) -> CmsResult<Destination> {
        const AT: &str = "Session::createQueue";
        self.ensure_open(AT)?;
        self.connector
            .create_queue(name, &self.info)
            .map_err(CmsError::connector(AT))
    }

    pub fn create_topic(&self, name: &str) -> CmsResult<Destination> {
        const AT: &str = "Session::createTopic";
        self.ensure_open(AT)?;
        self.connector
            .create_topic(name, &self.info)
            .map_err(CmsError::connector(AT))
    }

    pub fn create_temporary_queue(&self) -> CmsResult<Arc<TemporaryDestination>> {
        const AT: &str = "Session::createTemporaryQueue";
        self.ensure_open(AT)?;
        let destination = self
            .connector
            .create_temporary_queue(&self.info)
            .map_err(CmsError::connector(AT))?;
        self.register_temporary(destination, AT)
    }

    pub fn create_temporary_topic(&self) -> CmsResult<Arc<TemporaryDestination>> {
        const AT: &str = "Session::createTemporaryTopic";
        self.ensure_open(AT)?;
        let destination = self
            .connector
            .create_temporary_topic(&self.info)
            .map_err(CmsError::connector(AT))?;
        self.register_temporary(destination, AT)
    }

    fn register_temporary(
        &self,
        destination: Destination,
        at: &str,
    ) -> CmsResult<Arc<TemporaryDestination>> {
        let temporary = TemporaryDestination::new(destination, self.self_ref.clone());
        self.track(temporary.clone(), at)?;
        Ok(temporary)
    }

    // --- Messages ---

    pub fn create_message(&self) -> CmsResult<Message> {
        const AT: &str = "Session::createMessage";
        self.ensure_open(AT)?;
        let transaction = self.active_transaction(AT)?;
        self.connector
            .create_message(&self.info, transaction.as_ref())
            .map_err(CmsError::connector(AT))
    }

    pub fn create_bytes_message(&self) -> CmsResult<Message> {
        const AT: &str = "Session::createBytesMessage";
        self.ensure_open(AT)?;
        let transaction = self.active_transaction(AT)?;
        self.connector
            .create_bytes_message(&self.info, transaction.as_ref())
            .map_err(CmsError::connector(AT))
    }

    pub fn create_bytes_message_with(&self, bytes: &[u8]) -> CmsResult<Message> {
        let mut message = self.create_bytes_message()?;
        message.body = MessageBody::Bytes(Bytes::copy_from_slice(bytes));
        Ok(message)
    }

    pub fn create_text_message(&self) -> CmsResult<Message> {
        const AT: &str = "Session::createTextMessage";
        self.ensure_open(AT)?;
        let transaction = self.active_transaction(AT)?;
        self.connector
            .create_text_message(&self.info, transaction.as_ref())
            .map_err(CmsError::connector(AT))
    }

    pub fn create_text_message_with(&self, text: impl Into<String>) -> CmsResult<Message> {
        let mut message = self.create_text_message()?;
        message.set_text(text);
        Ok(message)
    }

    pub fn create_map_message(&self) -> CmsResult<Message> {
        const AT: &str = "Session::createMapMessage";
        self.ensure_open(AT)?;
        let transaction = self.active_transaction(AT)?;
        self.connector
            .create_map_message(&self.info, transaction.as_ref())
            .map_err(CmsError::connector(AT))
    }

    // --- Acknowledge / send ---

    /// Acknowledges `message` for `consumer`. In a transacted session the pair
    /// is first recorded in the active transaction.
    pub fn acknowledge(&self, consumer: &MessageConsumer, message: &Message) -> CmsResult<()> {
        const AT: &str = "Session::acknowledge";
        self.ensure_open(AT)?;
        if self.is_transacted() {
            let mut transaction = self.transaction.lock();
            let transaction = transaction.as_mut().ok_or_else(|| CmsError::closed(AT))?;
            transaction.ensure_active(AT)?;
            transaction.add_to_transaction(
                message,
                consumer.consumer_id(),
                consumer.redelivery_target(),
            );
        }
        self.connector
            .acknowledge(&self.info, consumer.info(), message)
            .map_err(CmsError::connector(AT))?;
        metrics::ACKNOWLEDGEMENTS_TOTAL.inc();
        Ok(())
    }

    /// Sends `message` through `producer`, inline or via the async send worker.
    ///
    /// In async mode a snapshot of the message is queued, so the caller may reuse
    /// or drop its copy as soon as this returns.
    pub fn send(&self, message: &Message, producer: &Arc<ProducerInfo>) -> CmsResult<()> {
        const AT: &str = "Session::send";
        self.ensure_open(AT)?;
        match &self.async_sender {
            Some(sender) => sender.enqueue(message, producer.clone(), &self.closed)?,
            None => {
                self.connector
                    .send(message, producer)
                    .map_err(CmsError::connector(AT))?;
                self.stats.record_sync_send();
                metrics::MESSAGES_SENT_TOTAL
                    .with_label_values(&["sync"])
                    .inc();
            }
        }
        Ok(())
    }

    // --- Transactions ---

    /// Commits the active transaction. Pending async sends are forwarded first.
    pub fn commit(&self) -> CmsResult<()> {
        const AT: &str = "Session::commit";
        self.ensure_open(AT)?;
        self.ensure_transacted(AT)?;
        if let Some(sender) = &self.async_sender {
            sender.flush(&self.closed);
        }
        let mut transaction = self.transaction.lock();
        transaction
            .as_mut()
            .ok_or_else(|| CmsError::closed(AT))?
            .commit()
    }

    /// Rolls back the active transaction. The rolled-back messages are handed
    /// back to their consumers on the connection's dispatch executor.
    pub fn rollback(&self) -> CmsResult<()> {
        const AT: &str = "Session::rollback";
        self.ensure_open(AT)?;
        self.ensure_transacted(AT)?;
        if let Some(sender) = &self.async_sender {
            sender.flush(&self.closed);
        }
        let redeliveries = {
            let mut transaction = self.transaction.lock();
            transaction
                .as_mut()
                .ok_or_else(|| CmsError::closed(AT))?
                .rollback()?
        };
        if redeliveries.is_empty() {
            return Ok(());
        }

        let connection = self.require_connection(AT)?;
        let batch = redeliveries.len();
        let submitted = connection.dispatch_executor().submit(move || {
            for redelivery in redeliveries {
                if let Some(target) = redelivery.target.upgrade() {
                    target.redeliver(redelivery.message);
                    metrics::REDELIVERIES_TOTAL.inc();
                }
            }
        });
        if let Err(e) = submitted {
            warn!(
                "Session {}: Could not schedule {} redeliveries: {}",
                self.info.session_id, batch, e
            );
        }
        Ok(())
    }

    // --- Resource teardown ---

    /// Called by a consumer, producer or temporary destination that is closing.
    /// Releases its listener registration, its transaction entries, its registry
    /// entry and finally its connector-level state.
    pub fn on_destroy_session_resource(&self, resource: &ConnectorResource) -> CmsResult<()> {
        self.ensure_open("Session::onDestroySessionResource")?;
        self.release_resource(resource)
    }

    fn release_resource(&self, resource: &ConnectorResource) -> CmsResult<()> {
        if let ConnectorResource::Consumer(info) = resource {
            if let Some(connection) = self.connection.upgrade() {
                connection.remove_message_listener(&info.consumer_id);
            }
            if let Some(transaction) = self.transaction.lock().as_mut() {
                let removed = transaction.remove_from_transaction(&info.consumer_id);
                if removed > 0 {
                    debug!(
                        "Session {}: Dropped {} transaction entries of consumer {}.",
                        self.info.session_id, removed, info.consumer_id
                    );
                }
            }
        }
        self.resources.remove(&resource.id());
        self.connector
            .destroy_resource(resource)
            .map_err(CmsError::connector("Session::onDestroySessionResource"))
    }

    // --- Close ---

    /// Closes the session and everything it created. A second call is a no-op.
    ///
    /// Failures during teardown are logged rather than returned.
    pub fn close(&self) -> CmsResult<()> {
        let _guard = self.close_lock.lock();
        if self.closed.get() {
            return Ok(());
        }
        self.closing.set(true);

        for resource in self.resources.snapshot() {
            if let Err(e) = resource.close() {
                warn!(
                    "Session {}: Failed to close resource {:?}: {}",
                    self.info.session_id,
                    resource.resource_id(),
                    e
                );
            }
            // A resource whose session handle is already gone cannot release itself.
            if self.resources.contains(&resource.resource_id())
                && let Err(e) = self.release_resource(&resource.connector_resource())
            {
                warn!(
                    "Session {}: Failed to release resource {:?}: {}",
                    self.info.session_id,
                    resource.resource_id(),
                    e
                );
            }
        }

        if let Some(mut transaction) = self.transaction.lock().take() {
            transaction.close();
        }

        if let Some(connection) = self.connection.upgrade() {
            connection.remove_session(self.info.session_id);
        }
        if let Err(e) = self.connector.destroy_session(&self.info) {
            warn!(
                "Session {}: Failed to release connector session: {}",
                self.info.session_id, e
            );
        }

        self.closed.set(true);

        if let Some(sender) = &self.async_sender {
            sender.stop();
            let purged = sender.purge();
            if purged > 0 {
                self.stats.record_purged(purged);
                metrics::MESSAGES_PURGED_TOTAL.inc_by(purged as f64);
                debug!(
                    "Session {}: Purged {} unsent messages.",
                    self.info.session_id, purged
                );
            }
        }

        metrics::OPEN_SESSIONS.dec();
        info!("Session {}: Closed.", self.info.session_id);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(
                "Session {}: Error while closing on drop: {}",
                self.info.session_id, e
            );
        }
    }
}
