//! Publisher behaviour against the in-memory broker
//!
//! Run with: cargo test --package users-rs --test notifier_test

use event_bus::{decode_user_created, Broker, InMemoryBroker, NatsBroker, Topology};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use users_rs::{NotifyError, UserCreatedNotifier, UserEventsPublisher};

fn publisher(broker: &InMemoryBroker, topology: Topology) -> UserEventsPublisher {
    UserEventsPublisher::new(Arc::new(broker.clone()), topology)
}

#[tokio::test]
async fn test_notify_stores_one_persistent_event() {
    let broker = InMemoryBroker::new();
    let topology = Topology::default();

    publisher(&broker, topology.clone())
        .notify_user_created(42, Some("a@b.com"))
        .await
        .expect("publish should succeed");

    // The publisher declared the queue itself, so the event is retained even
    // though no consumer exists yet
    assert_eq!(broker.pending(&topology), 1);

    let connection = broker.connect().await.unwrap();
    let mut deliveries = connection.consume(&topology, 1).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(1), deliveries.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("delivery error");

    let envelope = decode_user_created(&delivery.message.payload).unwrap();
    assert_eq!(envelope.data.id, 42);
    assert_eq!(envelope.data.email.as_deref(), Some("a@b.com"));
    assert!(envelope.event_id.is_some());
    assert_eq!(delivery.message.subject, "user.created");
}

#[tokio::test]
async fn test_notify_through_exchange_lands_in_queue() {
    let broker = InMemoryBroker::new();
    let topology = Topology::default().with_exchange("user.events");

    publisher(&broker, topology.clone())
        .notify_user_created(7, None)
        .await
        .unwrap();

    assert_eq!(broker.pending(&topology), 1);
}

#[tokio::test]
async fn test_notify_surfaces_broker_unavailable() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);

    let result = publisher(&broker, Topology::default())
        .notify_user_created(1, None)
        .await;

    assert!(matches!(result, Err(NotifyError::BrokerUnavailable(_))));
}

#[tokio::test]
async fn test_negative_user_id_is_rejected_before_connecting() {
    let broker = InMemoryBroker::new();

    let result = publisher(&broker, Topology::default())
        .notify_user_created(-5, None)
        .await;

    assert!(matches!(result, Err(NotifyError::InvalidUserId(-5))));
    assert_eq!(broker.connect_count(), 0);
}

#[tokio::test]
async fn test_each_notification_uses_its_own_connection() {
    let broker = InMemoryBroker::new();
    let publisher = publisher(&broker, Topology::default());

    publisher.notify_user_created(1, None).await.unwrap();
    publisher.notify_user_created(2, None).await.unwrap();

    assert_eq!(broker.connect_count(), 2);
    assert_eq!(broker.pending(publisher.topology()), 2);
}

#[tokio::test]
async fn test_unreachable_nats_is_broker_unavailable() {
    let publisher = UserEventsPublisher::new(
        Arc::new(NatsBroker::new("nats://127.0.0.1:1")),
        Topology::default(),
    );

    let result = publisher.notify_user_created(1, None).await;

    assert!(matches!(result, Err(NotifyError::BrokerUnavailable(_))));
}
