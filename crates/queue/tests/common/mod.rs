#![allow(dead_code)]

use std::time::Duration;

use tasklane_queue::{
    BrokerClient, ConsumerDispatcher, InMemoryBroker, Publisher, ReconnectPolicy, Topology,
};

pub struct Harness {
    pub broker: InMemoryBroker,
    pub client: BrokerClient<InMemoryBroker>,
    pub publisher: Publisher<InMemoryBroker>,
    pub dispatcher: ConsumerDispatcher<InMemoryBroker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_broker(InMemoryBroker::new())
    }

    pub fn with_broker(broker: InMemoryBroker) -> Self {
        let client = BrokerClient::new(
            broker.clone(),
            Topology::standard(),
            ReconnectPolicy::fixed(Duration::from_millis(10)),
        );
        Self {
            publisher: Publisher::new(client.clone()),
            dispatcher: ConsumerDispatcher::new(client.clone()),
            client,
            broker,
        }
    }
}

/// Poll `check` until it holds, for up to two seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
