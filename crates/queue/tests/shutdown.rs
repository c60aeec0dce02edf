mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tasklane_core::{MetadataOverrides, Priority, QueueName, TaskType};
use tasklane_queue::{Disposition, handler_fn};

use common::{Harness, eventually};

async fn publish_export(h: &Harness) {
    assert!(
        h.publisher
            .publish_to_default_queue(
                TaskType::ExportConversationData,
                json!({"conversationId": "c-1"}),
                MetadataOverrides::default(),
                Priority::default(),
            )
            .await
    );
}

#[tokio::test]
async fn in_flight_handler_finishes_within_grace_and_is_acked() {
    let h = Harness::new();
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    h.dispatcher.subscribe(
        QueueName::DataExports,
        handler_fn(move |_msg, _cancel| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Disposition::Ack
            }
        }),
    );

    publish_export(&h).await;
    eventually("handler started", || h.dispatcher.in_flight() == 1).await;

    let report = h.dispatcher.shutdown(Duration::from_secs(2)).await;
    assert_eq!(report.in_flight_at_stop, 1);
    assert!(report.is_clean());
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(h.broker.unacked_count(), 0);
    assert_eq!(h.broker.depth(QueueName::DataExports), 0);
    assert_eq!(h.dispatcher.active_subscriptions(), 0);
}

#[tokio::test]
async fn hung_handler_is_cancelled_after_grace_and_requeued() {
    let h = Harness::new();

    h.dispatcher.subscribe(
        QueueName::DataExports,
        handler_fn(|_msg, cancel| async move {
            cancel.cancelled().await;
            Disposition::retry("cancelled by shutdown")
        }),
    );

    publish_export(&h).await;
    eventually("handler started", || h.dispatcher.in_flight() == 1).await;

    let report = h.dispatcher.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.in_flight_at_stop, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(h.dispatcher.in_flight(), 0);

    // Consumer is gone, so the requeued message waits for the next worker.
    assert_eq!(h.broker.unacked_count(), 0);
    assert_eq!(h.broker.depth(QueueName::DataExports), 1);
    assert!(h.broker.peek(QueueName::DataExports)[0].redelivered);
}

#[tokio::test]
async fn no_deliveries_after_shutdown() {
    let h = Harness::new();
    h.dispatcher.subscribe(
        QueueName::DataExports,
        handler_fn(|_msg, _cancel| async { Disposition::Ack }),
    );
    eventually("attached", || h.dispatcher.active_subscriptions() == 1).await;

    let report = h.dispatcher.shutdown(Duration::from_millis(100)).await;
    assert_eq!(report.in_flight_at_stop, 0);
    assert_eq!(h.broker.consumer_count(QueueName::DataExports), 0);

    publish_export(&h).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.broker.depth(QueueName::DataExports), 1);
}
