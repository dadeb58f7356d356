use super::{AdminSession, BrokerConnector, OutboundMessage, ProducerSession};
use crate::config::{BrokerConfig, MessagingConfig};
use crate::topic::TopicSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{Client, ClientContext, DefaultClientContext};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Connects to a Kafka cluster through librdkafka.
///
/// librdkafka opens sockets lazily, so both connect calls do a metadata
/// round-trip before returning. A connector that returns `Ok` has talked to
/// at least one broker.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl KafkaConnector {
    pub fn new(connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            send_timeout,
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(config.connect_timeout(), config.send_timeout())
    }

    fn client_config(config: &BrokerConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", &config.client_id);
        client_config
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    #[instrument(skip_all, fields(brokers = %config.bootstrap_servers(), client_id = %config.client_id))]
    async fn connect_admin(&self, config: &BrokerConfig) -> Result<Box<dyn AdminSession>> {
        let client: AdminClient<DefaultClientContext> = Self::client_config(config).create()?;
        let client = Arc::new(client);

        let probe = Arc::clone(&client);
        let timeout = self.connect_timeout;
        run_blocking(move || topic_names(probe.inner(), timeout))
            .await
            .map_err(|e| Error::Connect(format!("admin connection failed: {}", e)))?;

        debug!("Admin connection established");
        Ok(Box::new(KafkaAdminSession {
            client,
            timeout: self.connect_timeout,
        }))
    }

    #[instrument(skip_all, fields(brokers = %config.bootstrap_servers(), client_id = %config.client_id))]
    async fn connect_producer(&self, config: &BrokerConfig) -> Result<Arc<dyn ProducerSession>> {
        let producer: FutureProducer = Self::client_config(config)
            .set("message.timeout.ms", self.send_timeout.as_millis().to_string())
            .create()?;

        let probe = producer.clone();
        let timeout = self.connect_timeout;
        run_blocking(move || topic_names(probe.client(), timeout))
            .await
            .map_err(|e| Error::Connect(format!("producer connection failed: {}", e)))?;

        debug!("Producer connection established");
        Ok(Arc::new(KafkaProducerSession {
            producer,
            send_timeout: self.send_timeout,
            flush_timeout: self.connect_timeout,
        }))
    }
}

struct KafkaAdminSession {
    client: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

#[async_trait]
impl AdminSession for KafkaAdminSession {
    async fn list_topics(&mut self) -> Result<Vec<String>> {
        let client = Arc::clone(&self.client);
        let timeout = self.timeout;
        run_blocking(move || topic_names(client.inner(), timeout))
            .await
            .map_err(|e| Error::Provision(format!("failed to list topics: {}", e)))
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<()> {
        let new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| Error::Provision(format!("create topic request failed: {}", e)))?;

        for result in results {
            match result {
                Ok(topic) => debug!("Broker acknowledged topic: {}", topic),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!("Topic '{}' was created concurrently by another client", topic);
                }
                Err((topic, code)) => {
                    return Err(Error::Provision(format!(
                        "failed to create topic '{}': {}",
                        topic, code
                    )));
                }
            }
        }

        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the client joins its polling thread.
        let client = self.client;
        run_blocking(move || {
            drop(client);
            Ok(())
        })
        .await
        .map_err(|e| Error::Connect(format!("admin close failed: {}", e)))
    }
}

struct KafkaProducerSession {
    producer: FutureProducer,
    send_timeout: Duration,
    flush_timeout: Duration,
}

#[async_trait]
impl ProducerSession for KafkaProducerSession {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let record = FutureRecord::<(), str>::to(&message.topic).payload(message.payload.as_str());

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| Error::Send(e.to_string()))?;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;

        run_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::Send(format!("flush failed: {}", e)))
    }
}

fn topic_names<C: ClientContext>(
    client: &Client<C>,
    timeout: Duration,
) -> std::result::Result<Vec<String>, KafkaError> {
    let metadata = client.fetch_metadata(None, timeout)?;
    Ok(metadata
        .topics()
        .iter()
        .map(|topic| topic.name().to_string())
        .collect())
}

/// Runs a blocking librdkafka call off the async executor.
async fn run_blocking<T, F>(f: F) -> std::result::Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, KafkaError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("blocking task failed: {}", e)),
    }
}
