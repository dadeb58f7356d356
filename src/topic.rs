use crate::broker::{AdminSession, BrokerConnector};
use crate::config::BrokerConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Topic the auth service publishes mail notifications to.
pub const SEND_MAIL_TOPIC: &str = "send-mail";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }

    /// `send-mail` with a single partition and no replication.
    pub fn send_mail() -> Self {
        Self::new(SEND_MAIL_TOPIC, 1, 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("topic name must not be empty".to_string()));
        }
        if self.partitions < 1 {
            return Err(Error::Config(format!(
                "topic '{}' needs at least one partition",
                self.name
            )));
        }
        if self.replication_factor < 1 {
            return Err(Error::Config(format!(
                "topic '{}' needs a replication factor of at least one",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    /// The topic was missing and a create request succeeded.
    Created,
    /// The broker already listed the topic.
    AlreadyExists,
    /// An earlier call in this process already provisioned the topic.
    AlreadyProvisioned,
}

/// Makes sure required topics exist before producing to them.
///
/// Topics provisioned once are remembered, and calls are serialized, so a
/// topic is created at most once per provisioner however often
/// [`ensure_topic`](Self::ensure_topic) runs.
pub struct TopicProvisioner {
    timeout: Duration,
    provisioned: Mutex<HashSet<String>>,
}

impl TopicProvisioner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            provisioned: Mutex::new(HashSet::new()),
        }
    }

    #[instrument(skip_all, fields(topic = %spec.name))]
    pub async fn ensure_topic(
        &self,
        connector: &dyn BrokerConnector,
        config: &BrokerConfig,
        spec: &TopicSpec,
    ) -> Result<TopicOutcome> {
        spec.validate()?;

        let mut provisioned = self.provisioned.lock().await;
        if provisioned.contains(&spec.name) {
            debug!("Topic '{}' already provisioned", spec.name);
            return Ok(TopicOutcome::AlreadyProvisioned);
        }

        let mut admin = bounded(
            self.timeout,
            "admin connection",
            connector.connect_admin(config),
        )
        .await?;

        let outcome = bounded(
            self.timeout,
            "topic provisioning",
            provision(admin.as_mut(), spec),
        )
        .await;

        if let Err(e) = admin.close().await {
            warn!("Failed to close admin connection: {}", e);
        }

        let outcome = outcome?;
        provisioned.insert(spec.name.clone());
        Ok(outcome)
    }

    pub async fn is_provisioned(&self, topic_name: &str) -> bool {
        self.provisioned.lock().await.contains(topic_name)
    }
}

async fn provision(admin: &mut dyn AdminSession, spec: &TopicSpec) -> Result<TopicOutcome> {
    let topics = admin.list_topics().await?;

    if topics.iter().any(|name| name == &spec.name) {
        info!("Topic '{}' already exists", spec.name);
        return Ok(TopicOutcome::AlreadyExists);
    }

    admin.create_topic(spec).await?;
    info!(
        partitions = spec.partitions,
        replication_factor = spec.replication_factor,
        "Topic '{}' created",
        spec.name
    );
    Ok(TopicOutcome::Created)
}

/// Applies `limit` to a broker round-trip, turning expiry into [`Error::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            message: format!("{} did not complete within {:?}", what, limit),
        }),
    }
}
