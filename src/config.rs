use crate::topic::TopicSpec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the broker address list.
pub const BROKER_ENV: &str = "KAFKA_BROKER";
/// Environment variable overriding the client identity.
pub const CLIENT_ID_ENV: &str = "KAFKA_CLIENT_ID";

pub const DEFAULT_BROKER: &str = "localhost:9092";
pub const DEFAULT_CLIENT_ID: &str = "auth-service";

/// Connection settings shared by the admin and producer clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
}

impl BrokerConfig {
    pub fn new(client_id: impl Into<String>, brokers: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            brokers,
        }
    }

    /// Builds the config from an arbitrary key lookup.
    ///
    /// The broker variable may hold a comma-separated list; order is kept and
    /// blank entries are dropped. Missing or blank values fall back to the
    /// defaults, so this never fails.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let brokers: Vec<String> = lookup(BROKER_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let client_id = lookup(CLIENT_ID_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_client_id);

        Self {
            client_id,
            brokers: if brokers.is_empty() {
                default_brokers()
            } else {
                brokers
            },
        }
    }

    /// Value for librdkafka's `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Reads the broker settings from the process environment.
pub fn build_config() -> BrokerConfig {
    BrokerConfig::from_lookup(|key| std::env::var(key).ok())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagingConfig {
    #[serde(default = "build_config")]
    pub broker: BrokerConfig,
    #[serde(default = "TopicSpec::send_mail")]
    pub topic: TopicSpec,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl MessagingConfig {
    /// Defaults for everything except the broker settings, which come from
    /// the environment.
    pub fn from_env() -> Self {
        Self::with_broker(build_config())
    }

    pub fn with_broker(broker: BrokerConfig) -> Self {
        Self {
            broker,
            topic: TopicSpec::send_mail(),
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MAIL_PRODUCER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("broker.brokers"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        if self.broker.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::Config(
                "at least one broker address is required".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(Error::Config(
                "send_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.topic.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_brokers() -> Vec<String> {
    vec![DEFAULT_BROKER.to_string()]
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_send_timeout_ms() -> u64 {
    5000
}
