#![allow(dead_code)]

use mail_producer::broker::InMemoryBroker;
use mail_producer::{BrokerConfig, Messaging, MessagingConfig, TopicSpec};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Get test configuration from environment variables
pub fn get_test_config() -> MessagingConfig {
    let brokers = env::var("TEST_KAFKA_BROKERS")
        .unwrap_or_else(|_| "localhost:9092".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    MessagingConfig {
        broker: BrokerConfig::new(format!("mail-producer-test-{}", std::process::id()), brokers),
        // Per-process topic so reruns start from an empty topic
        topic: TopicSpec::new(format!("send-mail-test-{}", std::process::id()), 1, 1),
        connect_timeout_secs: 5,
        send_timeout_ms: 2000,
    }
}

/// Configuration pointing at the in-memory broker's well-known topic.
pub fn memory_config() -> MessagingConfig {
    MessagingConfig {
        connect_timeout_secs: 1,
        send_timeout_ms: 500,
        ..MessagingConfig::with_broker(BrokerConfig::from_lookup(|_| None))
    }
}

pub fn memory_messaging(broker: &InMemoryBroker) -> Arc<Messaging> {
    Arc::new(Messaging::new(memory_config(), Arc::new(broker.clone())))
}

/// Polls until `topic` holds at least `count` messages or two seconds pass.
pub async fn wait_for_messages(broker: &InMemoryBroker, topic: &str, count: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let messages = broker.messages(topic);
        if messages.len() >= count || tokio::time::Instant::now() >= deadline {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
