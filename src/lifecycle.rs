//! Startup and teardown of the messaging side of a service.
//!
//! Messaging is auxiliary: the host starts serving whether or not the broker
//! is reachable. [`Messaging::start`] runs provisioning and the producer
//! connect on a detached task and [`Messaging::is_ready`] reports the result.
//!
//! # Example
//!
//! ```rust,no_run
//! use mail_producer::{MailMessage, Messaging, MessagingConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let messaging = Arc::new(Messaging::kafka(MessagingConfig::from_env()));
//!     messaging.start();
//!
//!     // Hand clones of this to request handlers
//!     let publisher = messaging.publisher();
//!     publisher
//!         .send_mail(&MailMessage {
//!             to: "new.user@example.com".to_string(),
//!             subject: "Welcome".to_string(),
//!             body: "Thanks for signing up".to_string(),
//!         })
//!         .await;
//!
//!     messaging.shutdown().await;
//! }
//! ```

use crate::broker::{BrokerConnector, KafkaConnector};
use crate::config::MessagingConfig;
use crate::producer::{ProducerHandle, ProducerState};
use crate::publisher::Publisher;
use crate::topic::TopicProvisioner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct Messaging {
    config: MessagingConfig,
    connector: Arc<dyn BrokerConnector>,
    provisioner: TopicProvisioner,
    producer: Arc<ProducerHandle>,
    started: AtomicBool,
}

impl Messaging {
    pub fn new(config: MessagingConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let provisioner = TopicProvisioner::new(config.connect_timeout());
        Self {
            config,
            connector,
            provisioner,
            producer: Arc::new(ProducerHandle::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Messaging backed by a real Kafka cluster.
    pub fn kafka(config: MessagingConfig) -> Self {
        let connector = Arc::new(KafkaConnector::from_config(&config));
        Self::new(config, connector)
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Provisions the topic and connects the producer, in that order.
    ///
    /// Runs once; later calls return the current state without touching the
    /// broker. Failures are logged and leave the producer not ready.
    pub async fn initialize(&self) -> ProducerState {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Messaging startup already ran");
            return self.state();
        }
        self.run_startup().await
    }

    /// Runs [`initialize`](Self::initialize) on a detached task.
    ///
    /// Returns `None` if startup already ran or is running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<ProducerState>> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Messaging startup already ran");
            return None;
        }
        let messaging = Arc::clone(self);
        Some(tokio::spawn(async move { messaging.run_startup().await }))
    }

    async fn run_startup(&self) -> ProducerState {
        let broker = &self.config.broker;
        let topic = &self.config.topic;
        info!(
            kafka_brokers = ?broker.brokers,
            client_id = %broker.client_id,
            "Connecting to kafka"
        );

        match self
            .provisioner
            .ensure_topic(self.connector.as_ref(), broker, topic)
            .await
        {
            Ok(outcome) => debug!(?outcome, "Topic '{}' ready", topic.name),
            Err(e) => error!("Failed to provision topic '{}': {}", topic.name, e),
        }

        if let Err(e) = self
            .producer
            .connect(self.connector.as_ref(), broker, self.config.connect_timeout())
            .await
        {
            error!("Failed to connect kafka producer: {}", e);
        }

        let state = self.state();
        info!(?state, "Messaging startup finished");
        state
    }

    pub fn state(&self) -> ProducerState {
        self.producer.state()
    }

    pub fn is_ready(&self) -> bool {
        self.producer.is_connected()
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.producer))
    }

    /// Releases the producer connection. Idempotent.
    pub async fn shutdown(&self) {
        self.producer.disconnect().await
    }
}
