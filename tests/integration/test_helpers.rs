// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use ferrocms::config::{ClientConfig, SessionConfig};
use ferrocms::core::connector::AcknowledgeMode;
use ferrocms::{CmsError, Connection, LoopbackConnector, Session};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// TestContext provides a connection over an in-process loopback connector.
pub struct TestContext {
    pub connector: Arc<LoopbackConnector>,
    pub connection: Arc<Connection>,
}

impl TestContext {
    /// Creates a new test context with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a new test context with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        ferrocms::logging::init_for_tests();
        ferrocms::initialize();

        let connector = Arc::new(LoopbackConnector::new());
        let connection =
            Connection::new(connector.clone(), config).expect("Failed to open connection");
        Self {
            connector,
            connection,
        }
    }

    /// Opens a session that sends synchronously.
    pub fn session(&self, ack_mode: AcknowledgeMode) -> Arc<Session> {
        self.connection
            .create_session_with(ack_mode, &SessionConfig::default())
            .expect("Failed to create session")
    }

    /// Opens a session that sends through its async worker.
    pub fn async_session(&self, ack_mode: AcknowledgeMode) -> Arc<Session> {
        self.connection
            .create_session_with(
                ack_mode,
                &SessionConfig {
                    use_async_send: true,
                },
            )
            .expect("Failed to create async session")
    }

    /// Installs an exception listener that records every reported error.
    pub fn capture_exceptions(&self) -> Arc<Mutex<Vec<CmsError>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        self.connection
            .set_exception_listener(Some(Arc::new(move |e: &CmsError| {
                sink.lock().push(e.clone())
            })));
        errors
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.connection.close();
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);
