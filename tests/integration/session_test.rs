// tests/integration/session_test.rs

//! Integration tests for session lifecycle and resource management
//! Tests: create*, close, resource registry, connection registration

use super::test_helpers::{TestContext, WAIT, wait_until};
use ferrocms::config::ClientConfig;
use ferrocms::core::connector::{AcknowledgeMode, ConnectorResource};
use ferrocms::{CmsError, Closeable, Connection, Destination, ExecutorService, LoopbackConnector};
use std::sync::Arc;
use std::time::Duration;

fn assert_invalid_state<T: std::fmt::Debug>(result: Result<T, CmsError>) {
    match result {
        Err(CmsError::InvalidState(msg)) => assert!(msg.contains("Session Already Closed")),
        other => panic!("Expected InvalidState, got {other:?}"),
    }
}

// ===== Close Semantics =====

#[test]
fn test_operations_after_close_fail_with_invalid_state() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("orders").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();
    let message = session.create_text_message_with("late").unwrap();

    session.close().unwrap();

    assert_invalid_state(session.create_consumer(&queue).map(|_| ()));
    assert_invalid_state(session.create_durable_consumer(&queue, "sub", None, false).map(|_| ()));
    assert_invalid_state(session.create_producer(None).map(|_| ()));
    assert_invalid_state(session.create_queue("q"));
    assert_invalid_state(session.create_topic("t"));
    assert_invalid_state(session.create_temporary_queue().map(|_| ()));
    assert_invalid_state(session.create_temporary_topic().map(|_| ()));
    assert_invalid_state(session.create_message());
    assert_invalid_state(session.create_bytes_message());
    assert_invalid_state(session.create_text_message());
    assert_invalid_state(session.create_map_message());
    assert_invalid_state(session.send(&message, producer.info()));
}

#[test]
fn test_close_twice_is_noop() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);

    assert!(session.close().is_ok());
    assert!(session.is_closed());
    assert!(session.close().is_ok());
    assert!(session.is_closed());
}

#[test]
fn test_commit_and_rollback_on_non_transacted_session() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::ClientAcknowledge);

    match session.commit() {
        Err(CmsError::InvalidState(msg)) => assert!(msg.contains("not Transacted")),
        other => panic!("Expected InvalidState, got {other:?}"),
    }
    assert!(matches!(session.rollback(), Err(CmsError::InvalidState(_))));
}

#[test]
fn test_close_releases_every_resource() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("work").unwrap();

    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();
    let temp_queue = session.create_temporary_queue().unwrap();
    let temp_topic = session.create_temporary_topic().unwrap();
    assert_eq!(session.resource_count(), 4);
    assert!(ctx.connection.has_message_listener(consumer.consumer_id()));

    session.close().unwrap();

    assert_eq!(session.resource_count(), 0);
    assert!(consumer.is_closed());
    assert!(producer.is_closed());
    assert!(temp_queue.is_closed());
    assert!(temp_topic.is_closed());
    assert!(!ctx.connection.has_message_listener(consumer.consumer_id()));
    assert_eq!(ctx.connector.destroyed_resources().len(), 4);
    assert_eq!(ctx.connector.consumer_count(), 0);
}

#[test]
fn test_close_unregisters_from_connection() {
    let ctx = TestContext::new();
    let first = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let _second = ctx.session(AcknowledgeMode::AutoAcknowledge);
    assert_eq!(ctx.connection.session_count(), 2);

    first.close().unwrap();
    assert_eq!(ctx.connection.session_count(), 1);
}

#[test]
fn test_close_releases_the_connector_session() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let id = session.session_id();

    session.close().unwrap();
    session.close().unwrap();

    let destroyed = ctx.connector.destroyed_sessions();
    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].session_id, id);
}

#[test]
fn test_failed_transacted_session_releases_the_connector_session() {
    let ctx = TestContext::new();
    ctx.connector.fail_transaction_starts(1);

    match ctx.connection.create_session(AcknowledgeMode::SessionTransacted) {
        Err(err) => assert!(err.is_connector()),
        Ok(_) => panic!("session creation should fail when no transaction can start"),
    }
    assert_eq!(ctx.connector.destroyed_sessions().len(), 1);
    assert_eq!(ctx.connection.session_count(), 0);

    // The next attempt gets a working session.
    let session = ctx.session(AcknowledgeMode::SessionTransacted);
    assert!(session.current_transaction_id().is_some());
}

#[test]
fn test_plain_destinations_are_not_registered() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);

    let queue = session.create_queue("plain").unwrap();
    let topic = session.create_topic("news").unwrap();
    assert_eq!(queue, Destination::Queue("plain".to_string()));
    assert_eq!(topic, Destination::Topic("news".to_string()));
    assert_eq!(session.resource_count(), 0);
}

// ===== Resource Close =====

#[test]
fn test_closing_a_resource_removes_it_from_the_session() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("jobs").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    consumer.close().unwrap();
    assert_eq!(session.resource_count(), 1);
    assert!(!ctx.connection.has_message_listener(consumer.consumer_id()));

    // Closing again is a no-op and does not destroy twice.
    consumer.close().unwrap();
    producer.close().unwrap();
    assert_eq!(session.resource_count(), 0);

    let destroyed = ctx.connector.destroyed_resources();
    assert_eq!(destroyed.len(), 2);
    assert!(matches!(destroyed[0], ConnectorResource::Consumer(_)));
    assert!(matches!(destroyed[1], ConnectorResource::Producer(_)));
}

#[test]
fn test_closed_consumer_rejects_receive() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("closed").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();

    consumer.close().unwrap();
    assert!(matches!(
        consumer.receive_no_wait(),
        Err(CmsError::InvalidState(_))
    ));
}

#[test]
fn test_on_destroy_session_resource_after_close_fails() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let temp = session.create_temporary_queue().unwrap();
    let resource = temp.connector_resource();

    session.close().unwrap();
    assert!(matches!(
        session.on_destroy_session_resource(&resource),
        Err(CmsError::InvalidState(_))
    ));
}

// ===== Messages =====

#[test]
fn test_message_factories() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);

    let text = session.create_text_message_with("hello").unwrap();
    assert_eq!(text.text(), Some("hello"));

    let bytes = session.create_bytes_message_with(&[1, 2, 3]).unwrap();
    assert_eq!(bytes.body_length(), 3);

    let map = session.create_map_message().unwrap();
    assert_eq!(map.body_length(), 0);
    assert!(map.transaction_id.is_none());
}

#[test]
fn test_transacted_messages_carry_the_transaction_id() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::SessionTransacted);

    let before = session.create_message().unwrap();
    assert!(before.transaction_id.is_some());
    assert_eq!(before.transaction_id, session.current_transaction_id());

    session.commit().unwrap();
    let after = session.create_message().unwrap();
    assert_ne!(before.transaction_id, after.transaction_id);
}

// ===== Delivery =====

#[test]
fn test_sync_send_and_receive_on_queue() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("greetings").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut message = session.create_text_message_with("hi").unwrap();
    producer.send(&mut message).unwrap();
    assert_eq!(message.producer_id.as_deref(), Some(producer.producer_id()));
    assert!(message.timestamp > 0);

    let received = consumer
        .receive_timeout(WAIT)
        .unwrap()
        .expect("message should arrive");
    assert_eq!(received.text(), Some("hi"));
    assert_eq!(session.stats().sent_sync(), 1);

    // Auto-acknowledged on receipt.
    assert!(wait_until(WAIT, || ctx.connector.acknowledgements().len() == 1));
}

#[test]
fn test_loopback_stores_selector_without_filtering() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("colors").unwrap();
    let consumer = session
        .create_consumer_with_selector(&queue, Some("color = 'red'"), false)
        .unwrap();
    assert_eq!(consumer.message_selector(), Some("color = 'red'"));
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut message = session.create_text_message_with("sky").unwrap();
    message.set_property("color", "blue");
    producer.send(&mut message).unwrap();

    let received = consumer.receive_timeout(WAIT).unwrap().unwrap();
    assert_eq!(received.property("color"), Some("blue"));
}

#[test]
fn test_queue_messages_wait_for_a_consumer() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("backlog").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut message = session.create_text_message_with("early").unwrap();
    producer.send(&mut message).unwrap();
    assert_eq!(ctx.connector.backlog_len(&queue), 1);

    let consumer = session.create_consumer(&queue).unwrap();
    let received = consumer.receive_timeout(WAIT).unwrap().unwrap();
    assert_eq!(received.text(), Some("early"));
    assert_eq!(ctx.connector.backlog_len(&queue), 0);
}

#[test]
fn test_topic_no_local_consumer_skips_own_connection() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let topic = session.create_topic("events").unwrap();
    let local = session
        .create_consumer_with_selector(&topic, None, true)
        .unwrap();
    let regular = session.create_consumer(&topic).unwrap();
    let producer = session.create_producer(Some(&topic)).unwrap();

    let mut message = session.create_text_message_with("ping").unwrap();
    producer.send(&mut message).unwrap();

    assert!(regular.receive_timeout(WAIT).unwrap().is_some());
    assert!(
        local
            .receive_timeout(Duration::from_millis(100))
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_message_listener_receives_backlog_and_new_messages() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("listened").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut first = session.create_text_message_with("one").unwrap();
    producer.send(&mut first).unwrap();
    assert!(wait_until(WAIT, || consumer.pending_count() == 1));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    consumer
        .set_message_listener(Some(Arc::new(move |m: ferrocms::Message| {
            sink.lock().push(m.text().unwrap_or_default().to_string())
        })))
        .unwrap();

    let mut second = session.create_text_message_with("two").unwrap();
    producer.send(&mut second).unwrap();

    assert!(wait_until(WAIT, || seen.lock().len() == 2));
    assert_eq!(*seen.lock(), vec!["one".to_string(), "two".to_string()]);
}

#[test]
fn test_client_acknowledge_is_explicit() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::ClientAcknowledge);
    let queue = session.create_queue("manual").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut message = session.create_text_message_with("ack me").unwrap();
    producer.send(&mut message).unwrap();

    let received = consumer.receive_timeout(WAIT).unwrap().unwrap();
    assert!(ctx.connector.acknowledgements().is_empty());

    consumer.acknowledge(&received).unwrap();
    let acks = ctx.connector.acknowledgements();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].consumer_id, consumer.consumer_id());
}

#[test]
fn test_expired_messages_are_not_received() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("ttl").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();
    producer.set_time_to_live(1);

    let mut message = session.create_text_message_with("stale").unwrap();
    producer.send(&mut message).unwrap();
    assert!(wait_until(WAIT, || consumer.pending_count() == 1));
    std::thread::sleep(Duration::from_millis(10));

    assert!(consumer.receive_no_wait().unwrap().is_none());
}

#[test]
fn test_anonymous_producer_requires_destination() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let queue = session.create_queue("anon").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let producer = session.create_producer(None).unwrap();

    let mut message = session.create_text_message_with("where").unwrap();
    assert!(matches!(
        producer.send(&mut message),
        Err(CmsError::IllegalArgument(_))
    ));

    producer.send_to(&queue, &mut message).unwrap();
    assert!(consumer.receive_timeout(WAIT).unwrap().is_some());
}

// ===== Connection =====

#[test]
fn test_connection_close_closes_sessions() {
    let ctx = TestContext::new();
    let first = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let second = ctx.async_session(AcknowledgeMode::SessionTransacted);

    ctx.connection.close().unwrap();

    assert!(first.is_closed());
    assert!(second.is_closed());
    assert_eq!(ctx.connection.session_count(), 0);
    assert!(ctx.connection.dispatch_executor().is_terminated());
    assert!(matches!(
        ctx.connection.create_session(AcknowledgeMode::AutoAcknowledge),
        Err(CmsError::InvalidState(_))
    ));
}

#[test]
fn test_connection_rejects_invalid_config() {
    ferrocms::initialize();
    let config = ClientConfig {
        dispatch_threads: 0,
        ..ClientConfig::default()
    };
    let result = Connection::new(Arc::new(LoopbackConnector::new()), config);
    assert!(matches!(result, Err(CmsError::IllegalArgument(_))));
}

#[test]
fn test_connector_failure_is_annotated() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    ctx.connector.set_send_hook(Some(Arc::new(|_: &ferrocms::Message| {
        Err(ferrocms::ConnectorError::Unavailable("broker down".to_string()))
    })));
    let queue = session.create_queue("fail").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut message = session.create_message().unwrap();
    match producer.send(&mut message) {
        Err(CmsError::Connector { at, source }) => {
            assert_eq!(at, "Session::send");
            assert!(matches!(source, ferrocms::ConnectorError::Unavailable(_)));
        }
        other => panic!("Expected connector error, got {other:?}"),
    }
}

#[test]
fn test_durable_consumer_requires_topic() {
    let ctx = TestContext::new();
    let session = ctx.session(AcknowledgeMode::AutoAcknowledge);
    let topic = session.create_topic("audit").unwrap();
    let queue = session.create_queue("audit").unwrap();

    let durable = session
        .create_durable_consumer(&topic, "auditor", None, false)
        .unwrap();
    assert_eq!(durable.info().subscription_name.as_deref(), Some("auditor"));
    assert_eq!(session.resource_count(), 1);

    match session.create_durable_consumer(&queue, "auditor", None, false) {
        Err(CmsError::Connector { at, .. }) => assert_eq!(at, "Session::createDurableConsumer"),
        other => panic!("Expected connector error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(session.resource_count(), 1);
}
