// tests/property/participation_test.rs

//! Property-based tests for transaction participation
//! Tests that acknowledged messages join the transaction once and leave with their consumer

use crate::test_helpers::{TestContext, WAIT};
use ferrocms::Closeable;
use ferrocms::core::connector::AcknowledgeMode;
use proptest::prelude::*;
use std::collections::HashMap;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 25, // Each case opens a connection with its own threads
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_every_received_message_participates_once(
        routing in prop::collection::vec(any::<bool>(), 1..=20)
    ) {
        let ctx = TestContext::new();
        let session = ctx.session(AcknowledgeMode::SessionTransacted);
        let publisher = ctx.session(AcknowledgeMode::AutoAcknowledge);
        let queue_a = session.create_queue("prop-a").unwrap();
        let queue_b = session.create_queue("prop-b").unwrap();
        let consumer_a = session.create_consumer(&queue_a).unwrap();
        let consumer_b = session.create_consumer(&queue_b).unwrap();
        let producer = publisher.create_producer(None).unwrap();

        for (i, to_a) in routing.iter().enumerate() {
            let queue = if *to_a { &queue_a } else { &queue_b };
            let mut message = publisher.create_text_message_with(format!("m{i}")).unwrap();
            producer.send_to(queue, &mut message).unwrap();
        }

        let count_a = routing.iter().filter(|to_a| **to_a).count();
        let count_b = routing.len() - count_a;
        for _ in 0..count_a {
            consumer_a.receive_timeout(WAIT).unwrap().unwrap();
        }
        for _ in 0..count_b {
            consumer_b.receive_timeout(WAIT).unwrap().unwrap();
        }
        prop_assert_eq!(session.transaction_participants(), routing.len());

        // The connector sees each received message acknowledged exactly once.
        let mut seen: HashMap<String, usize> = HashMap::new();
        for ack in ctx.connector.acknowledgements() {
            if ack.session_id == session.session_id() {
                *seen.entry(ack.message_id.unwrap_or_default()).or_default() += 1;
            }
        }
        prop_assert_eq!(seen.len(), routing.len());
        prop_assert!(seen.values().all(|n| *n == 1));

        // Closing one consumer removes all of its entries and nothing else.
        consumer_a.close().unwrap();
        prop_assert_eq!(session.transaction_participants(), count_b);

        session.rollback().unwrap();
        for _ in 0..count_b {
            let redelivered = consumer_b.receive_timeout(WAIT).unwrap().unwrap();
            prop_assert_eq!(redelivered.redelivery_count, 1);
        }
        prop_assert_eq!(session.transaction_participants(), count_b);
    }
}
