mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tasklane_core::{MetadataOverrides, Priority, QueueName, TaskType};
use tasklane_queue::{
    BrokerClient, ConnectionPhase, Disposition, InMemoryBroker, ReconnectPolicy, Topology,
    handler_fn,
};

use common::{Harness, eventually};

async fn publish_email(h: &Harness) -> bool {
    h.publisher
        .publish(
            QueueName::EmailNotifications,
            TaskType::SendEmail,
            json!({"to": "a@example.com"}),
            MetadataOverrides::default(),
            Priority::default(),
        )
        .await
}

#[tokio::test]
async fn publish_after_severed_connection_reconnects() {
    let h = Harness::new();
    assert!(publish_email(&h).await);
    assert_eq!(h.broker.connections_opened(), 1);

    h.broker.sever_connections();
    assert!(publish_email(&h).await);

    assert_eq!(h.broker.connections_opened(), 2);
    assert_eq!(h.broker.depth(QueueName::EmailNotifications), 2);
    assert_eq!(h.client.phase(), ConnectionPhase::Ready);
}

#[tokio::test]
async fn monitor_reconnects_without_any_caller() {
    let h = Harness::new();
    h.client.channel().await.unwrap();

    h.broker.sever_connections();
    eventually("background reconnect", || h.broker.connections_opened() == 2).await;
    eventually("ready again", || h.client.phase() == ConnectionPhase::Ready).await;
}

#[tokio::test]
async fn unavailable_broker_is_retried_until_it_accepts() {
    let broker = InMemoryBroker::new();
    broker.set_accepting(false);
    let h = Harness::with_broker(broker);

    h.client.warm();
    eventually("several failed attempts", || h.client.attempts() >= 3).await;
    assert_ne!(h.client.phase(), ConnectionPhase::Ready);
    assert_eq!(h.broker.connections_opened(), 0);

    h.broker.set_accepting(true);
    let mut phase = h.client.subscribe_phase();
    tokio::time::timeout(
        std::time::Duration::from_secs(2),
        phase.wait_for(|p| *p == ConnectionPhase::Ready),
    )
    .await
    .expect("client never became ready")
    .unwrap();

    assert_eq!(h.client.consecutive_failures(), 0);
    assert!(publish_email(&h).await);
}

#[tokio::test]
async fn topology_is_declared_once_per_queue_across_reconnects() {
    let h = Harness::new();
    h.client.channel().await.unwrap();
    h.broker.sever_connections();
    h.client.channel().await.unwrap();

    let mut expected = QueueName::ALL.to_vec();
    expected.sort();
    assert_eq!(h.broker.queue_names(), expected);
    assert_eq!(h.broker.declare_calls(), 2 * QueueName::ALL.len());
}

#[tokio::test]
async fn subscription_survives_connection_loss() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    h.dispatcher.subscribe(
        QueueName::EmailNotifications,
        handler_fn(move |_msg, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Disposition::Ack
            }
        }),
    );
    eventually("attached", || h.dispatcher.active_subscriptions() == 1).await;

    h.broker.sever_connections();
    eventually("re-attached", || {
        h.broker.consumer_count(QueueName::EmailNotifications) == 1
            && h.dispatcher.active_subscriptions() == 1
    })
    .await;

    assert!(publish_email(&h).await);
    eventually("handled after reconnect", || calls.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn closed_client_stops_retrying() {
    let broker = InMemoryBroker::new();
    broker.set_accepting(false);
    let client = BrokerClient::new(
        broker.clone(),
        Topology::standard(),
        ReconnectPolicy::fixed(std::time::Duration::from_millis(10)),
    );

    client.warm();
    eventually("first attempt", || client.attempts() >= 1).await;
    client.close().await;
    let after_close = client.attempts();

    broker.set_accepting(true);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(client.attempts(), after_close);
    assert_eq!(broker.connections_opened(), 0);
}
