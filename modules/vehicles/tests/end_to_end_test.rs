//! Users publisher → broker → vehicles consumer, all in process
//!
//! Run with: cargo test --package vehicles-rs --test end_to_end_test

mod common;

use common::{eventually, fast_settings, start, wait_for_state, MemoryStore};
use event_bus::{InMemoryBroker, Topology};
use std::sync::Arc;
use users_rs::{NotifyError, UserCreatedNotifier, UserEventsPublisher};
use vehicles_rs::ConsumerState;

#[tokio::test]
async fn test_created_user_gets_exactly_one_placeholder() {
    let broker = InMemoryBroker::new();
    let topology = Topology::default();
    let store = Arc::new(MemoryStore::new());
    let publisher = UserEventsPublisher::new(Arc::new(broker.clone()), topology.clone());

    let handle = start(&broker, &store, &topology, fast_settings(4));

    publisher
        .notify_user_created(42, Some("a@b.com"))
        .await
        .expect("publish should succeed");

    eventually("placeholder created", || store.placeholder_count(42) == 1).await;

    // A retried notification for the same user changes nothing
    publisher.notify_user_created(42, Some("a@b.com")).await.unwrap();
    eventually("duplicate acked", || broker.acked(&topology) == 2).await;
    assert_eq!(store.placeholder_count(42), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_events_published_while_consumer_is_down_are_kept() {
    let broker = InMemoryBroker::new();
    let topology = Topology::default().with_exchange("user.events");
    let store = Arc::new(MemoryStore::new());
    let publisher = UserEventsPublisher::new(Arc::new(broker.clone()), topology.clone());

    for user_id in [1, 2, 3] {
        publisher.notify_user_created(user_id, None).await.unwrap();
    }
    assert_eq!(broker.pending(&topology), 3);

    let handle = start(&broker, &store, &topology, fast_settings(4));
    wait_for_state(&handle, ConsumerState::Consuming).await;

    eventually("backlog projected", || store.users_with_placeholder() == 3).await;
    eventually("backlog drained", || broker.is_drained(&topology)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_publisher_reports_outage_while_consumer_waits() {
    let broker = InMemoryBroker::new();
    let topology = Topology::default();
    let store = Arc::new(MemoryStore::new());
    let publisher = UserEventsPublisher::new(Arc::new(broker.clone()), topology.clone());

    broker.set_available(false);
    let handle = start(&broker, &store, &topology, fast_settings(4));

    let result = publisher.notify_user_created(8, None).await;
    assert!(matches!(result, Err(NotifyError::BrokerUnavailable(_))));

    broker.set_available(true);
    wait_for_state(&handle, ConsumerState::Consuming).await;
    publisher.notify_user_created(8, None).await.unwrap();

    eventually("placeholder created", || store.placeholder_count(8) == 1).await;

    handle.shutdown().await;
}
