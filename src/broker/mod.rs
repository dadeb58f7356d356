//! Transport seam between the producer lifecycle and a concrete broker.
//!
//! [`kafka::KafkaConnector`] talks to a real cluster through librdkafka.
//! [`memory::InMemoryBroker`] keeps everything in process and is what the
//! tests run against.

pub mod kafka;
pub mod memory;

use crate::config::BrokerConfig;
use crate::topic::TopicSpec;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use kafka::KafkaConnector;
pub use memory::{Fault, InMemoryBroker};

/// Opens admin and producer connections to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect_admin(&self, config: &BrokerConfig) -> Result<Box<dyn AdminSession>>;

    async fn connect_producer(&self, config: &BrokerConfig) -> Result<Arc<dyn ProducerSession>>;
}

/// An open connection in the admin role.
#[async_trait]
pub trait AdminSession: Send {
    async fn list_topics(&mut self) -> Result<Vec<String>>;

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<()>;

    /// Releases the connection. Consumes the session so it cannot be reused.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// An open connection in the producer role.
#[async_trait]
pub trait ProducerSession: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// A single message bound for one topic, already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

impl OutboundMessage {
    /// Encodes `message` as compact JSON.
    pub fn json<T>(topic: impl Into<String>, message: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_string(message)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_json_payload_is_compact() {
        let message = OutboundMessage::json("send-mail", &json!({"to": "a@x.com"})).unwrap();

        assert_eq!(message.topic, "send-mail");
        assert_eq!(message.payload, r#"{"to":"a@x.com"}"#);
    }

    #[test]
    fn test_json_payload_decodes_to_input() {
        let input = json!({
            "to": "new.user@example.com",
            "subject": "Welcome",
            "tags": ["signup", 1, null, true]
        });
        let message = OutboundMessage::json("send-mail", &input).unwrap();

        let decoded: Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_unserializable_payload_is_error() {
        use std::collections::HashMap;

        // JSON object keys must be strings
        let mut map = HashMap::new();
        map.insert(vec![1u8], "value");

        let result = OutboundMessage::json("send-mail", &map);
        assert!(matches!(result, Err(crate::Error::Serialization(_))));
    }
}
