// src/core/metrics.rs

//! Defines and registers Prometheus metrics for client-side monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// The number of sessions currently open across all connections.
    pub static ref OPEN_SESSIONS: Gauge =
        register_gauge!("ferrocms_open_sessions", "Number of currently open sessions.").unwrap();

    // --- Counters ---
    /// Messages handed to the connector, labelled by dispatch mode (`sync` or `async`).
    pub static ref MESSAGES_SENT_TOTAL: CounterVec =
        register_counter_vec!("ferrocms_messages_sent_total", "Total number of messages forwarded to the connector.", &["mode"]).unwrap();
    /// Async messages discarded because their session closed before they were forwarded.
    pub static ref MESSAGES_PURGED_TOTAL: Counter =
        register_counter!("ferrocms_messages_purged_total", "Total number of unsent async messages purged on session close.").unwrap();
    /// Messages acknowledged through a session.
    pub static ref ACKNOWLEDGEMENTS_TOTAL: Counter =
        register_counter!("ferrocms_acknowledgements_total", "Total number of message acknowledgements.").unwrap();
    /// Completed transactions, labelled by outcome (`commit` or `rollback`).
    pub static ref TRANSACTIONS_TOTAL: CounterVec =
        register_counter_vec!("ferrocms_transactions_total", "Total number of completed transactions, labelled by outcome.", &["outcome"]).unwrap();
    /// Messages redelivered to a consumer after a rollback.
    pub static ref REDELIVERIES_TOTAL: Counter =
        register_counter!("ferrocms_redeliveries_total", "Total number of messages redelivered after rollback.").unwrap();
    /// Tasks run to completion by executor worker threads.
    pub static ref EXECUTOR_TASKS_TOTAL: Counter =
        register_counter!("ferrocms_executor_tasks_total", "Total number of tasks executed by thread pools.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Failed to encode metrics: {e}"))
}
