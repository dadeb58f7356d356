pub mod broker;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod producer;
pub mod publisher;
pub mod topic;

pub use config::{build_config, BrokerConfig, MessagingConfig};
pub use error::{Error, Result};
pub use lifecycle::Messaging;
pub use producer::{ProducerHandle, ProducerState};
pub use publisher::{MailMessage, Publisher};
pub use topic::{TopicOutcome, TopicProvisioner, TopicSpec, SEND_MAIL_TOPIC};
