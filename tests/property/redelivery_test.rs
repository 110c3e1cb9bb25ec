// tests/property/redelivery_test.rs

//! Property-based tests for the transaction coordinator
//! Tests participant bookkeeping and the redelivery limit

use ferrocms::config::TransactionConfig;
use ferrocms::core::connector::{AcknowledgeMode, SessionInfo};
use ferrocms::core::session::{RedeliveryTarget, Transaction};
use ferrocms::{Connector, LoopbackConnector, Message};
use proptest::prelude::*;
use std::sync::{Arc, Weak};

struct Discard;

impl RedeliveryTarget for Discard {
    fn redeliver(&self, _message: Message) {}
}

fn open(max_redeliveries: u32) -> (Arc<LoopbackConnector>, Transaction) {
    let connector = Arc::new(LoopbackConnector::new());
    let session: SessionInfo = connector
        .create_session("ID:prop-connection", AcknowledgeMode::SessionTransacted)
        .unwrap();
    let tx = Transaction::new(
        connector.clone(),
        session,
        &TransactionConfig { max_redeliveries },
    )
    .unwrap();
    (connector, tx)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_remove_from_transaction_is_exact(
        owners in prop::collection::vec(0usize..4, 0..=40),
        removed in 0usize..4
    ) {
        let (_connector, mut tx) = open(5);
        let target: Arc<dyn RedeliveryTarget> = Arc::new(Discard);
        for (i, owner) in owners.iter().enumerate() {
            let message = Message {
                message_id: Some(format!("m{i}")),
                ..Default::default()
            };
            tx.add_to_transaction(&message, &format!("c{owner}"), Arc::downgrade(&target));
        }

        let expected_removed = owners.iter().filter(|o| **o == removed).count();
        let before: Vec<usize> = (0..4).map(|c| tx.participants_for(&format!("c{c}"))).collect();

        prop_assert_eq!(tx.remove_from_transaction(&format!("c{removed}")), expected_removed);
        prop_assert_eq!(tx.participant_count(), owners.len() - expected_removed);
        for (c, count) in before.iter().enumerate() {
            let now = tx.participants_for(&format!("c{c}"));
            if c == removed {
                prop_assert_eq!(now, 0);
            } else {
                prop_assert_eq!(now, *count);
            }
        }
    }

    #[test]
    fn test_message_survives_exactly_max_rollbacks(max_redeliveries in 0u32..6) {
        let (connector, mut tx) = open(max_redeliveries);
        let target: Arc<dyn RedeliveryTarget> = Arc::new(Discard);
        let weak: Weak<dyn RedeliveryTarget> = Arc::downgrade(&target);

        let mut message = Message::default();
        let mut rounds = 0;
        loop {
            tx.add_to_transaction(&message, "c0", weak.clone());
            let mut redeliveries = tx.rollback().unwrap();
            match redeliveries.pop() {
                Some(redelivery) => {
                    rounds += 1;
                    prop_assert_eq!(redelivery.message.redelivery_count, rounds);
                    message = redelivery.message;
                }
                None => break,
            }
        }
        prop_assert_eq!(rounds, max_redeliveries);
        prop_assert_eq!(connector.rollbacks().len() as u32, max_redeliveries + 1);
    }
}
