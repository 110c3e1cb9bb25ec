// src/connection/core.rs

//! Defines `Connection`, the owner of a set of sessions sharing one connector.

use crate::config::{ClientConfig, SessionConfig};
use crate::core::concurrent::{AtomicBoolean, ExecutorService, ThreadPoolExecutor, executors};
use crate::core::connector::{AcknowledgeMode, Connector, InboundDispatcher};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::listener::{ExceptionListener, MessageListener};
use crate::core::session::Session;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A client connection.
///
/// The connection holds the canonical list of its sessions. Sessions refer back
/// to it weakly, to reach the connector, register consumers for inbound
/// delivery and look up the exception listener.
pub struct Connection {
    connection_id: String,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    sessions: DashMap<u64, Arc<Session>>,
    /// Inbound delivery targets, keyed by consumer id.
    pub(super) listeners: DashMap<String, Arc<dyn MessageListener>>,
    exception_listener: RwLock<Option<Arc<dyn ExceptionListener>>>,
    pub(super) dispatch_executor: ThreadPoolExecutor,
    closed: AtomicBoolean,
    self_ref: Weak<Connection>,
}

impl Connection {
    /// Opens a connection over `connector` and registers it as the connector's
    /// inbound dispatcher.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an invalid configuration, `NullPointer` if
    /// [`crate::initialize`] has not been called.
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> CmsResult<Arc<Self>> {
        config
            .validate()
            .map_err(|e| CmsError::IllegalArgument(format!("{e:#}")))?;
        let dispatch_executor = executors::new_fixed_thread_pool(config.dispatch_threads as i32)?;
        let connection_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("ID:connection-{}", Uuid::new_v4()));

        let connection = Arc::new_cyclic(|self_ref: &Weak<Connection>| Connection {
            connection_id,
            config,
            connector: connector.clone(),
            sessions: DashMap::new(),
            listeners: DashMap::new(),
            exception_listener: RwLock::new(None),
            dispatch_executor,
            closed: AtomicBoolean::new(false),
            self_ref: self_ref.clone(),
        });
        let dispatcher: Weak<dyn InboundDispatcher> = connection.self_ref.clone();
        connector.set_dispatcher(dispatcher);

        info!(
            "Connection {} opened to {}.",
            connection.connection_id, connection.config.broker_url
        );
        Ok(connection)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// The executor that runs inbound deliveries and rollback redeliveries.
    pub fn dispatch_executor(&self) -> &ThreadPoolExecutor {
        &self.dispatch_executor
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Creates a session using the connection's configured session settings.
    pub fn create_session(&self, ack_mode: AcknowledgeMode) -> CmsResult<Arc<Session>> {
        let session_config = self.config.session.clone();
        self.create_session_with(ack_mode, &session_config)
    }

    pub fn create_session_with(
        &self,
        ack_mode: AcknowledgeMode,
        session_config: &SessionConfig,
    ) -> CmsResult<Arc<Session>> {
        const AT: &str = "Connection::createSession";
        if self.closed.get() {
            return Err(CmsError::InvalidState(format!(
                "{AT} - Connection Already Closed"
            )));
        }
        let info = self
            .connector
            .create_session(&self.connection_id, ack_mode)
            .map_err(CmsError::connector(AT))?;
        let session = Session::new(
            self.self_ref.clone(),
            info,
            session_config,
            &self.config.transaction,
        )?;
        self.sessions.insert(session.session_id(), session.clone());
        Ok(session)
    }

    /// Forgets a session. Called by the session while it closes.
    pub fn remove_session(&self, session_id: u64) {
        // Dropped outside the map guard; the last handle may run the session's teardown.
        let removed = self.sessions.remove(&session_id);
        if removed.is_some() {
            debug!(
                "Connection {}: Removed session {}.",
                self.connection_id, session_id
            );
        }
        drop(removed);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Routes inbound messages for `consumer_id` to `listener`.
    pub fn add_message_listener(&self, consumer_id: &str, listener: Arc<dyn MessageListener>) {
        self.listeners.insert(consumer_id.to_string(), listener);
    }

    pub fn remove_message_listener(&self, consumer_id: &str) {
        self.listeners.remove(consumer_id);
    }

    pub fn has_message_listener(&self, consumer_id: &str) -> bool {
        self.listeners.contains_key(consumer_id)
    }

    pub fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) {
        *self.exception_listener.write() = listener;
    }

    pub fn exception_listener(&self) -> Option<Arc<dyn ExceptionListener>> {
        self.exception_listener.read().clone()
    }

    /// Closes every session, then stops the dispatch executor. The connector is
    /// left open; it belongs to the caller and may be shared.
    pub fn close(&self) -> CmsResult<()> {
        if self.closed.get_and_set(true) {
            return Ok(());
        }
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            if let Err(e) = session.close() {
                warn!(
                    "Connection {}: Failed to close session {}: {}",
                    self.connection_id,
                    session.session_id(),
                    e
                );
            }
        }
        self.sessions.clear();
        self.listeners.clear();

        self.dispatch_executor.shutdown();
        self.dispatch_executor.await_termination();
        info!("Connection {} closed.", self.connection_id);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(
                "Connection {}: Error while closing on drop: {}",
                self.connection_id, e
            );
        }
    }
}
