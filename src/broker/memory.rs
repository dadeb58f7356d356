//! In-process broker used by tests.
//!
//! `InMemoryBroker` is cheap to clone and every clone shares state, so a
//! test can hand one clone to [`Messaging`](crate::Messaging) and keep
//! another to inspect what reached the "broker".

use super::{AdminSession, BrokerConnector, OutboundMessage, ProducerSession};
use crate::config::BrokerConfig;
use crate::topic::TopicSpec;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Failures that can be switched on for the next broker interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Admin and producer connects are refused.
    Unreachable,
    /// Admin and producer connects never complete.
    Stall,
    ListTopics,
    CreateTopic,
    /// Sends on an open producer are rejected.
    RejectSend,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub partitions: i32,
    pub replication_factor: i32,
    pub messages: Vec<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, TopicRecord>,
    faults: HashSet<Fault>,
    create_requests: Vec<TopicSpec>,
    admin_connects: usize,
    open_admin_sessions: usize,
    producer_connects: usize,
    send_requests: usize,
    disconnects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that refuses every connection.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.inject(Fault::Unreachable);
        broker
    }

    /// Adds a topic as if some other client had created it earlier.
    pub fn with_topic(self, spec: &TopicSpec) -> Self {
        self.state().topics.insert(
            spec.name.clone(),
            TopicRecord {
                partitions: spec.partitions,
                replication_factor: spec.replication_factor,
                messages: Vec::new(),
            },
        );
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.insert(fault);
    }

    pub fn clear(&self, fault: Fault) {
        self.state().faults.remove(&fault);
    }

    pub fn topic(&self, name: &str) -> Option<TopicRecord> {
        self.state().topics.get(name).cloned()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    /// Payloads delivered to `topic`, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<String> {
        self.topic(topic).map(|t| t.messages).unwrap_or_default()
    }

    pub fn create_requests(&self) -> Vec<TopicSpec> {
        self.state().create_requests.clone()
    }

    pub fn admin_connects(&self) -> usize {
        self.state().admin_connects
    }

    pub fn open_admin_sessions(&self) -> usize {
        self.state().open_admin_sessions
    }

    pub fn producer_connects(&self) -> usize {
        self.state().producer_connects
    }

    /// Send requests that reached an open producer, accepted or not.
    pub fn send_requests(&self) -> usize {
        self.state().send_requests
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.state().faults.contains(&fault)
    }

    async fn check_reachable(&self, config: &BrokerConfig) -> Result<()> {
        if self.has_fault(Fault::Stall) {
            std::future::pending::<()>().await;
        }
        if self.has_fault(Fault::Unreachable) {
            return Err(Error::Connect(format!(
                "no broker reachable at {}",
                config.bootstrap_servers()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect_admin(&self, config: &BrokerConfig) -> Result<Box<dyn AdminSession>> {
        self.check_reachable(config).await?;

        let mut state = self.state();
        state.admin_connects += 1;
        state.open_admin_sessions += 1;
        drop(state);

        Ok(Box::new(MemoryAdminSession {
            broker: self.clone(),
        }))
    }

    async fn connect_producer(&self, config: &BrokerConfig) -> Result<Arc<dyn ProducerSession>> {
        self.check_reachable(config).await?;
        self.state().producer_connects += 1;

        Ok(Arc::new(MemoryProducerSession {
            broker: self.clone(),
        }))
    }
}

struct MemoryAdminSession {
    broker: InMemoryBroker,
}

#[async_trait]
impl AdminSession for MemoryAdminSession {
    async fn list_topics(&mut self) -> Result<Vec<String>> {
        if self.broker.has_fault(Fault::ListTopics) {
            return Err(Error::Provision("metadata request rejected".to_string()));
        }
        Ok(self.broker.topic_names())
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<()> {
        let mut state = self.broker.state();
        state.create_requests.push(spec.clone());

        if state.faults.contains(&Fault::CreateTopic) {
            return Err(Error::Provision(format!(
                "failed to create topic '{}': policy violation",
                spec.name
            )));
        }

        state.topics.entry(spec.name.clone()).or_insert_with(|| TopicRecord {
            partitions: spec.partitions,
            replication_factor: spec.replication_factor,
            messages: Vec::new(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.broker.state();
        state.open_admin_sessions = state.open_admin_sessions.saturating_sub(1);
        Ok(())
    }
}

struct MemoryProducerSession {
    broker: InMemoryBroker,
}

#[async_trait]
impl ProducerSession for MemoryProducerSession {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut state = self.broker.state();
        state.send_requests += 1;

        if state.faults.contains(&Fault::RejectSend) {
            return Err(Error::Send("broker closed the connection".to_string()));
        }

        // Kafka auto-creates unknown topics on first produce.
        state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicRecord {
                partitions: 1,
                replication_factor: 1,
                messages: Vec::new(),
            })
            .messages
            .push(message.payload.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.broker.state();
        state.disconnects += 1;

        if state.faults.contains(&Fault::Disconnect) {
            return Err(Error::Send("disconnect timed out".to_string()));
        }
        Ok(())
    }
}
