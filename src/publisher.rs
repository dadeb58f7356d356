//! Fire-and-forget publishing for request handlers.
//!
//! Nothing here returns an error to the caller. A publish that cannot be
//! delivered is logged and dropped; the HTTP response that triggered it is
//! never affected.

use crate::broker::{OutboundMessage, ProducerSession};
use crate::producer::ProducerHandle;
use crate::topic::SEND_MAIL_TOPIC;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Notification the auth service emits on `send-mail`, e.g. a signup
/// confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Handle to the shared producer, cloned into each request handler.
#[derive(Clone)]
pub struct Publisher {
    producer: Arc<ProducerHandle>,
}

impl Publisher {
    pub fn new(producer: Arc<ProducerHandle>) -> Self {
        Self { producer }
    }

    pub fn is_ready(&self) -> bool {
        self.producer.is_connected()
    }

    /// Sends `message` as JSON to `topic` and waits for the broker's answer.
    ///
    /// At most once, no retries. Failures are logged only.
    pub async fn publish<T>(&self, topic: &str, message: &T)
    where
        T: Serialize + ?Sized,
    {
        match self.try_publish(topic, message).await {
            Ok(()) => debug!(topic, "Message published"),
            Err(e) => log_failure(topic, &e),
        }
    }

    /// Like [`publish`](Self::publish) but returns straight away; the send
    /// runs on a spawned task.
    pub fn publish_detached<T>(&self, topic: &str, message: &T)
    where
        T: Serialize + ?Sized,
    {
        let (session, outbound) = match self.prepare(topic, message) {
            Ok(prepared) => prepared,
            Err(e) => return log_failure(topic, &e),
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(topic, "No async runtime to publish on, message dropped: {}", e);
                return;
            }
        };

        runtime.spawn(async move {
            match session.send(&outbound).await {
                Ok(()) => debug!(topic = %outbound.topic, "Message published"),
                Err(e) => log_failure(&outbound.topic, &e),
            }
        });
    }

    pub async fn send_mail(&self, mail: &MailMessage) {
        self.publish(SEND_MAIL_TOPIC, mail).await
    }

    pub(crate) async fn try_publish<T>(&self, topic: &str, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (session, outbound) = self.prepare(topic, message)?;
        session.send(&outbound).await
    }

    /// Readiness is checked before encoding so an unconnected producer
    /// costs nothing.
    fn prepare<T>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<(Arc<dyn ProducerSession>, OutboundMessage)>
    where
        T: Serialize + ?Sized,
    {
        let session = self.producer.session().ok_or(Error::NotReady)?;
        let outbound = OutboundMessage::json(topic, message)?;
        Ok((session, outbound))
    }
}

fn log_failure(topic: &str, error: &Error) {
    match error {
        Error::NotReady => warn!(topic, "Kafka producer not initialized, message dropped"),
        e => error!(topic, "Failed to publish message to kafka: {}", e),
    }
}
