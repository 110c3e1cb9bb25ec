// src/core/session/transaction.rs

//! Groups the acknowledgements of a transacted session so they settle as a unit.

use crate::config::TransactionConfig;
use crate::core::connector::{Connector, SessionInfo, TransactionInfo};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::message::Message;
use crate::core::metrics;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Something that can take back a message whose transaction was rolled back.
pub trait RedeliveryTarget: Send + Sync {
    fn redeliver(&self, message: Message);
}

/// A rolled-back message on its way back to the consumer that received it.
pub struct Redelivery {
    pub target: Weak<dyn RedeliveryTarget>,
    pub message: Message,
}

struct Participant {
    consumer_id: String,
    target: Weak<dyn RedeliveryTarget>,
    message: Message,
}

/// The transaction coordinator of a single transacted session.
///
/// Each connector-issued `TransactionInfo` backs one transaction instance. A
/// commit or rollback settles that instance and immediately opens the next one.
/// If the connector cannot open it, the outcome of the settle still stands and
/// the next instance is opened on first use.
/// The coordinator is only used from the owning session's calling thread and is
/// kept behind the session's mutex.
pub struct Transaction {
    connector: Arc<dyn Connector>,
    session: SessionInfo,
    info: Option<TransactionInfo>,
    participants: Vec<Participant>,
    max_redeliveries: u32,
    closed: bool,
}

impl Transaction {
    /// Opens the first transaction instance for `session`.
    pub fn new(
        connector: Arc<dyn Connector>,
        session: SessionInfo,
        config: &TransactionConfig,
    ) -> CmsResult<Self> {
        let info = connector
            .start_transaction(&session)
            .map_err(CmsError::connector("Transaction::new"))?;
        debug!(
            "Session {}: Started transaction {}.",
            session.session_id, info.transaction_id
        );
        Ok(Self {
            connector,
            session,
            info: Some(info),
            participants: Vec::new(),
            max_redeliveries: config.max_redeliveries,
            closed: false,
        })
    }

    /// The open transaction instance. `None` after `close`, or while the next
    /// instance could not be started yet.
    pub fn info(&self) -> Option<TransactionInfo> {
        self.info
    }

    /// Returns the open instance, starting one if the last attempt failed.
    ///
    /// # Errors
    ///
    /// `InvalidState` after `close`, or the connector error if it still cannot
    /// start a transaction.
    pub fn ensure_active(&mut self, at: &'static str) -> CmsResult<TransactionInfo> {
        if let Some(info) = self.info {
            return Ok(info);
        }
        if self.closed {
            return Err(CmsError::InvalidState(format!(
                "{at} - No transaction is active"
            )));
        }
        let info = self
            .connector
            .start_transaction(&self.session)
            .map_err(CmsError::connector(at))?;
        debug!(
            "Session {}: Started transaction {}.",
            self.session.session_id, info.transaction_id
        );
        self.info = Some(info);
        Ok(info)
    }

    /// Records that `message`, received by `consumer_id`, belongs to this transaction.
    pub fn add_to_transaction(
        &mut self,
        message: &Message,
        consumer_id: &str,
        target: Weak<dyn RedeliveryTarget>,
    ) {
        self.participants.push(Participant {
            consumer_id: consumer_id.to_string(),
            target,
            message: message.clone(),
        });
    }

    /// Drops every pending entry of a consumer that is being torn down.
    /// Returns the number of entries removed.
    pub fn remove_from_transaction(&mut self, consumer_id: &str) -> usize {
        let before = self.participants.len();
        self.participants.retain(|p| p.consumer_id != consumer_id);
        before - self.participants.len()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participants_for(&self, consumer_id: &str) -> usize {
        self.participants
            .iter()
            .filter(|p| p.consumer_id == consumer_id)
            .count()
    }

    pub fn max_redeliveries(&self) -> u32 {
        self.max_redeliveries
    }

    fn begin_next(&mut self) {
        self.info = None;
        match self.connector.start_transaction(&self.session) {
            Ok(next) => self.info = Some(next),
            Err(e) => warn!(
                "Session {}: Could not start the next transaction, retrying on next use: {}",
                self.session.session_id, e
            ),
        }
    }

    /// Settles every participant at the connector and opens the next instance.
    pub fn commit(&mut self) -> CmsResult<()> {
        let tx = self.ensure_active("Transaction::commit")?;
        self.connector
            .commit(&tx, &self.session)
            .map_err(CmsError::connector("Transaction::commit"))?;
        debug!(
            "Session {}: Committed transaction {} with {} participants.",
            self.session.session_id,
            tx.transaction_id,
            self.participants.len()
        );
        self.participants.clear();
        metrics::TRANSACTIONS_TOTAL
            .with_label_values(&["commit"])
            .inc();
        self.begin_next();
        Ok(())
    }

    /// Rolls the active instance back and opens the next one.
    ///
    /// Returns the rolled-back messages that should be handed back to their
    /// consumers, with their redelivery count already incremented. Messages that
    /// have used up their redeliveries are dropped here.
    pub fn rollback(&mut self) -> CmsResult<Vec<Redelivery>> {
        let tx = self.ensure_active("Transaction::rollback")?;
        self.connector
            .rollback(&tx, &self.session)
            .map_err(CmsError::connector("Transaction::rollback"))?;

        let participants = std::mem::take(&mut self.participants);
        debug!(
            "Session {}: Rolled back transaction {} with {} participants.",
            self.session.session_id,
            tx.transaction_id,
            participants.len()
        );
        metrics::TRANSACTIONS_TOTAL
            .with_label_values(&["rollback"])
            .inc();

        let mut redeliveries = Vec::with_capacity(participants.len());
        for Participant {
            consumer_id,
            target,
            mut message,
        } in participants
        {
            if message.redelivery_count >= self.max_redeliveries {
                warn!(
                    "Discarding message {:?} for consumer {} after {} redeliveries.",
                    message.message_id, consumer_id, message.redelivery_count
                );
                continue;
            }
            message.redelivery_count += 1;
            redeliveries.push(Redelivery { target, message });
        }

        self.begin_next();
        Ok(redeliveries)
    }

    /// Tears the coordinator down with its session: rolls back whatever is still
    /// open at the connector and forgets all participants.
    pub fn close(&mut self) {
        self.closed = true;
        if let Some(tx) = self.info.take()
            && let Err(e) = self.connector.rollback(&tx, &self.session)
        {
            warn!(
                "Session {}: Failed to roll back transaction {} on close: {}",
                self.session.session_id, tx.transaction_id, e
            );
        }
        self.participants.clear();
    }
}
