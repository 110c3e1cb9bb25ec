// src/core/session/async_sender.rs

//! The per-session outbound queue and the worker thread that drains it.
//!
//! The worker waits on the queue while it is empty and the session is open.
//! Once it observes the session's closed flag it exits without forwarding any
//! further entries; whatever is still queued is discarded by [`AsyncSender::purge`].

use super::SessionStats;
use crate::connection::Connection;
use crate::core::concurrent::{AtomicBoolean, BlockingQueue};
use crate::core::connector::{Connector, ProducerInfo};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::message::Message;
use crate::core::metrics;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A snapshot of a sent message and the producer it was sent through.
pub struct OutboundMessage {
    pub message: Message,
    pub producer: Arc<ProducerInfo>,
}

/// Counts entries that were enqueued but not yet forwarded or purged.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn release(&self, n: usize) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(n);
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

/// Everything the worker loop needs, moved onto its thread.
struct SendLoop {
    session_id: u64,
    queue: Arc<BlockingQueue<OutboundMessage>>,
    closed: Arc<AtomicBoolean>,
    connector: Arc<dyn Connector>,
    connection: Weak<Connection>,
    stats: Arc<SessionStats>,
    outstanding: Arc<Outstanding>,
}

pub struct AsyncSender {
    session_id: u64,
    queue: Arc<BlockingQueue<OutboundMessage>>,
    outstanding: Arc<Outstanding>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBoolean,
}

impl AsyncSender {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            queue: Arc::new(BlockingQueue::new()),
            outstanding: Arc::new(Outstanding::default()),
            worker: Mutex::new(None),
            started: AtomicBoolean::new(false),
        }
    }

    /// Spawns the worker thread. A sender is started at most once.
    pub fn start(
        &self,
        closed: Arc<AtomicBoolean>,
        connector: Arc<dyn Connector>,
        connection: Weak<Connection>,
        stats: Arc<SessionStats>,
    ) -> CmsResult<()> {
        if self.started.get_and_set(true) {
            return Err(CmsError::InvalidState(format!(
                "Session {}: async send worker was already started",
                self.session_id
            )));
        }
        let send_loop = SendLoop {
            session_id: self.session_id,
            queue: self.queue.clone(),
            closed,
            connector,
            connection,
            stats,
            outstanding: self.outstanding.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("session-{}-async-send", self.session_id))
            .spawn(move || run_send_loop(send_loop))
            .map_err(|e| CmsError::Generic(format!("failed to start async send worker: {e}")))?;
        *self.worker.lock() = Some(handle);
        debug!("Session {}: Async send worker started.", self.session_id);
        Ok(())
    }

    /// Queues a snapshot of `message` for the worker and wakes it.
    ///
    /// `closed` is checked under the queue lock. Once it is set, nothing can be
    /// queued behind the final [`purge`](Self::purge).
    pub fn enqueue(
        &self,
        message: &Message,
        producer: Arc<ProducerInfo>,
        closed: &AtomicBoolean,
    ) -> CmsResult<()> {
        self.outstanding.add();
        let entry = OutboundMessage {
            message: message.clone(),
            producer,
        };
        if self.queue.push_unless(entry, |_| closed.get()).is_err() {
            self.outstanding.release(1);
            return Err(CmsError::closed("Session::send"));
        }
        Ok(())
    }

    /// Blocks until every queued message has been forwarded or purged, or until
    /// `closed` becomes true.
    pub fn flush(&self, closed: &AtomicBoolean) {
        let mut count = self.outstanding.count.lock();
        while *count > 0 && !closed.get() {
            self.outstanding
                .drained
                .wait_for(&mut count, Duration::from_millis(50));
        }
    }

    /// Wakes the worker so it sees the closed flag, then waits for it to exit.
    /// The caller must set the closed flag first.
    pub fn stop(&self) {
        self.queue.wake_all();
        self.outstanding.drained.notify_all();
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!(
                "Session {}: Async send worker is stopping itself; not joining.",
                self.session_id
            );
            return;
        }
        if handle.join().is_err() {
            error!(
                "Session {}: Async send worker terminated abnormally.",
                self.session_id
            );
        }
    }

    /// Discards every queued message. Returns how many were dropped.
    pub fn purge(&self) -> usize {
        let discarded = self.queue.drain().len();
        self.outstanding.release(discarded);
        discarded
    }

    /// The number of messages waiting for the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// The worker body: forwards queued messages in FIFO order until the session closes.
///
/// A failed or panicking forward is reported to the connection's exception
/// listener and the loop moves on to the next entry.
fn run_send_loop(ctx: SendLoop) {
    let closed = ctx.closed.clone();
    while let Some(OutboundMessage { message, producer }) =
        ctx.queue.take_or_exit(|_| closed.get())
    {
        let result = catch_unwind(AssertUnwindSafe(|| {
            ctx.connector.send(&message, &producer)
        }));
        match result {
            Ok(Ok(())) => {
                ctx.stats.record_async_send();
                metrics::MESSAGES_SENT_TOTAL
                    .with_label_values(&["async"])
                    .inc();
            }
            Ok(Err(e)) => report(
                &ctx,
                CmsError::Generic(format!(
                    "Session {}: async send failed ({e}), recovering",
                    ctx.session_id
                )),
            ),
            Err(_) => report(
                &ctx,
                CmsError::Generic(format!(
                    "Session {}: async send panicked, recovering",
                    ctx.session_id
                )),
            ),
        }
        ctx.outstanding.release(1);
    }
    debug!("Session {}: Async send worker exiting.", ctx.session_id);
}

fn report(ctx: &SendLoop, error: CmsError) {
    warn!("{}", error);
    let listener = ctx
        .connection
        .upgrade()
        .and_then(|connection| connection.exception_listener());
    if let Some(listener) = listener
        && catch_unwind(AssertUnwindSafe(|| listener.on_exception(&error))).is_err()
    {
        error!(
            "Session {}: Exception listener panicked.",
            ctx.session_id
        );
    }
}
