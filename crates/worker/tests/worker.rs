//! Worker end to end over the in-memory broker.

use std::time::Duration;

use serde_json::{Value, json};
use tasklane_core::{MetadataOverrides, Priority, QueueName, TaskType};
use tasklane_queue::dispatcher::{HEADER_DEAD_LETTER_REASON, HEADER_TASK_TYPE};
use tasklane_queue::{BrokerClient, InMemoryBroker, Publisher, ReconnectPolicy, Topology};
use tasklane_worker::handlers::SendEmail;
use tasklane_worker::{HandlerRegistry, Worker};

fn client(broker: &InMemoryBroker) -> BrokerClient<InMemoryBroker> {
    BrokerClient::new(
        broker.clone(),
        Topology::standard(),
        ReconnectPolicy::fixed(Duration::from_millis(10)),
    )
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn valid_payload(task_type: TaskType) -> Value {
    match task_type {
        TaskType::GenerateAiResponse => json!({"conversationId": "c-1", "messageId": "m-1"}),
        TaskType::SendEmail => json!({"to": "a@example.com", "subject": "Hi", "template": "welcome"}),
        TaskType::ExportConversationData => json!({"conversationIds": ["c-1", "c-2"], "format": "csv"}),
        TaskType::SyncPlatformData => json!({"platform": "shopify", "integrationId": "i-1"}),
        TaskType::GenerateAnalytics => json!({"reportType": "usage", "from": 1, "to": 2}),
    }
}

fn drained(broker: &InMemoryBroker) -> bool {
    broker.unacked_count() == 0 && QueueName::ALL.iter().all(|q| broker.depth(*q) == 0)
}

#[tokio::test]
async fn every_task_type_is_handled_and_acked() {
    let broker = InMemoryBroker::new();
    let client = client(&broker);
    let publisher = Publisher::new(client.clone());
    let worker = Worker::start(client, HandlerRegistry::standard());

    eventually("all subscriptions attached", || {
        worker.dispatcher().active_subscriptions() == QueueName::WORK.len()
    })
    .await;

    for task_type in TaskType::ALL {
        assert!(
            publisher
                .publish_to_default_queue(
                    task_type,
                    valid_payload(task_type),
                    MetadataOverrides::new().organization("org-1"),
                    Priority::default(),
                )
                .await,
            "{task_type}"
        );
    }

    eventually("all tasks acked", || drained(&broker)).await;
    assert_eq!(broker.depth(QueueName::DeadLetters), 0);

    let report = worker.stop(Duration::from_secs(1)).await;
    assert!(report.is_clean());
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn invalid_payload_is_dead_lettered() {
    let broker = InMemoryBroker::new();
    let client = client(&broker);
    let publisher = Publisher::new(client.clone());
    let worker = Worker::start(client, HandlerRegistry::standard());

    assert!(
        publisher
            .publish_to_default_queue(
                TaskType::SendEmail,
                json!({"to": "not-an-address", "subject": "Hi", "body": "x"}),
                MetadataOverrides::default(),
                Priority::default(),
            )
            .await
    );

    eventually("dead-lettered", || broker.depth(QueueName::DeadLetters) == 1).await;
    let dead = broker.peek(QueueName::DeadLetters);
    assert_eq!(dead[0].properties.header(HEADER_TASK_TYPE), Some("send-email"));
    assert!(
        dead[0]
            .properties
            .header(HEADER_DEAD_LETTER_REASON)
            .is_some_and(|r| r.contains("invalid recipient"))
    );
    assert_eq!(broker.depth(QueueName::EmailNotifications), 0);

    worker.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unregistered_task_type_is_dead_lettered() {
    let broker = InMemoryBroker::new();
    let client = client(&broker);
    let publisher = Publisher::new(client.clone());
    let registry = HandlerRegistry::new().with(SendEmail);
    let worker = Worker::start(client, registry);

    assert!(
        publisher
            .publish_to_default_queue(
                TaskType::GenerateAnalytics,
                valid_payload(TaskType::GenerateAnalytics),
                MetadataOverrides::default(),
                Priority::default(),
            )
            .await
    );
    assert!(
        publisher
            .publish_to_default_queue(
                TaskType::SendEmail,
                valid_payload(TaskType::SendEmail),
                MetadataOverrides::default(),
                Priority::default(),
            )
            .await
    );

    eventually("dead-lettered", || broker.depth(QueueName::DeadLetters) == 1).await;
    eventually("email acked", || {
        broker.depth(QueueName::EmailNotifications) == 0 && broker.unacked_count() == 0
    })
    .await;
    let dead = broker.peek(QueueName::DeadLetters);
    assert_eq!(dead[0].properties.header(HEADER_TASK_TYPE), Some("generate-analytics"));

    worker.stop(Duration::from_secs(1)).await;
}
