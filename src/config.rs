// src/config.rs

//! Manages client configuration: loading from TOML, defaults and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// The session property that selects async send dispatch.
pub const USE_ASYNC_SEND_PROPERTY: &str = "useAsyncSend";

/// Settings fixed for the lifetime of each session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// If true, sends are queued and forwarded by a per-session worker thread.
    #[serde(default)]
    pub use_async_send: bool,
}

impl SessionConfig {
    /// Reads session settings from connection properties. Only the value
    /// `"true"` (in any case) enables async send.
    pub fn from_properties(properties: &HashMap<String, String>) -> Self {
        let use_async_send = properties
            .get(USE_ASYNC_SEND_PROPERTY)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
        Self { use_async_send }
    }
}

/// Settings for transacted sessions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// How often a rolled-back message is handed back to its consumer before it
    /// is discarded.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

fn default_max_redeliveries() -> u32 {
    5
}
fn default_broker_url() -> String {
    "vm://localhost".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_dispatch_threads() -> usize {
    1
}

/// The top-level client configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// A fixed connection id. A random one is generated when unset.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    /// Worker threads delivering inbound messages to consumers. Values above one
    /// give up per-consumer delivery order.
    #[serde(default = "default_dispatch_threads")]
    pub dispatch_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id: None,
            log_level: default_log_level(),
            session: SessionConfig::default(),
            transaction: TransactionConfig::default(),
            dispatch_threads: default_dispatch_threads(),
        }
    }
}

impl ClientConfig {
    /// Creates a new `ClientConfig` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(contents).context("Failed to parse client config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.broker_url.trim().is_empty() {
            return Err(anyhow!("broker_url cannot be empty"));
        }
        if self.dispatch_threads == 0 {
            return Err(anyhow!("dispatch_threads cannot be 0"));
        }
        if self.dispatch_threads > i32::MAX as usize {
            return Err(anyhow!("dispatch_threads is too large"));
        }
        if let Some(client_id) = &self.client_id
            && client_id.trim().is_empty()
        {
            return Err(anyhow!("client_id cannot be empty when set"));
        }
        if self.dispatch_threads > 1 {
            warn!(
                "dispatch_threads is {}; messages for one consumer may be delivered out of order.",
                self.dispatch_threads
            );
        }
        Ok(())
    }
}
