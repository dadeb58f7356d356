use crate::broker::{BrokerConnector, ProducerSession};
use crate::config::BrokerConfig;
use crate::topic::bounded;
use crate::{Error, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Observable lifecycle of the shared producer connection.
///
/// Only `Connected` accepts publishes. There is no path back to
/// `Uninitialized`: a failed or torn-down handle stays that way until the
/// process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Uninitialized,
    Connecting,
    Connected,
    Failed,
    Disconnected,
}

enum Slot {
    Uninitialized,
    Connecting,
    Connected(Arc<dyn ProducerSession>),
    Failed,
    Disconnected,
}

impl Slot {
    fn state(&self) -> ProducerState {
        match self {
            Slot::Uninitialized => ProducerState::Uninitialized,
            Slot::Connecting => ProducerState::Connecting,
            Slot::Connected(_) => ProducerState::Connected,
            Slot::Failed => ProducerState::Failed,
            Slot::Disconnected => ProducerState::Disconnected,
        }
    }
}

/// Process-wide producer connection, written once at startup and read by
/// every publish.
///
/// The session is cloned out of the lock before any broker I/O, so the lock
/// is never held across an await.
pub struct ProducerHandle {
    slot: RwLock<Slot>,
}

impl Default for ProducerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerHandle {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Uninitialized),
        }
    }

    pub fn state(&self) -> ProducerState {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ProducerState::Connected
    }

    /// The live session, if the handle is connected.
    pub(crate) fn session(&self) -> Option<Arc<dyn ProducerSession>> {
        match &*self.slot.read().unwrap_or_else(PoisonError::into_inner) {
            Slot::Connected(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Opens the producer connection.
    ///
    /// Only an `Uninitialized` handle will connect; every later call is
    /// refused without touching the broker. On failure the handle moves to
    /// `Failed` and is never retried.
    #[instrument(skip_all, fields(brokers = %config.bootstrap_servers(), client_id = %config.client_id))]
    pub async fn connect(
        &self,
        connector: &dyn BrokerConnector,
        config: &BrokerConfig,
        timeout: Duration,
    ) -> Result<()> {
        {
            let mut slot = self.write();
            if !matches!(*slot, Slot::Uninitialized) {
                return Err(Error::Connect(format!(
                    "producer cannot connect from state {:?}",
                    slot.state()
                )));
            }
            *slot = Slot::Connecting;
        }

        let connecting = connector.connect_producer(config);
        let session = match bounded(timeout, "producer connection", connecting).await {
            Ok(session) => session,
            Err(e) => {
                let mut slot = self.write();
                if matches!(*slot, Slot::Connecting) {
                    *slot = Slot::Failed;
                }
                return Err(e);
            }
        };

        let installed = {
            let mut slot = self.write();
            if matches!(*slot, Slot::Connecting) {
                *slot = Slot::Connected(Arc::clone(&session));
                true
            } else {
                false
            }
        };

        if installed {
            info!("Connected to kafka producer");
            return Ok(());
        }

        warn!("Producer was shut down while connecting, releasing new connection");
        if let Err(e) = session.disconnect().await {
            warn!("Failed to release producer connection: {}", e);
        }
        Err(Error::Connect(
            "producer was shut down while connecting".to_string(),
        ))
    }

    /// Releases the connection if there is one. Safe to call any number of
    /// times; disconnect errors are logged and dropped.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.write(), Slot::Disconnected);

        match previous {
            Slot::Connected(session) => {
                info!("Disconnecting kafka producer");
                match session.disconnect().await {
                    Ok(()) => info!("Kafka producer disconnected"),
                    Err(e) => warn!("Error while disconnecting kafka producer: {}", e),
                }
            }
            Slot::Disconnected => debug!("Kafka producer already disconnected"),
            other => debug!("Kafka producer was never connected ({:?})", other.state()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AdminSession, Fault, InMemoryBroker};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn config() -> BrokerConfig {
        BrokerConfig::from_lookup(|_| None)
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    /// Holds producer connects until released.
    struct GatedConnector {
        broker: InMemoryBroker,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl BrokerConnector for GatedConnector {
        async fn connect_admin(&self, config: &BrokerConfig) -> Result<Box<dyn AdminSession>> {
            self.broker.connect_admin(config).await
        }

        async fn connect_producer(&self, config: &BrokerConfig) -> Result<Arc<dyn ProducerSession>> {
            self.gate.notified().await;
            self.broker.connect_producer(config).await
        }
    }

    #[tokio::test]
    async fn test_new_handle_is_uninitialized() {
        let handle = ProducerHandle::new();
        assert_eq!(handle.state(), ProducerState::Uninitialized);
        assert!(handle.session().is_none());
    }

    #[tokio::test]
    async fn test_connect_success() {
        let broker = InMemoryBroker::new();
        let handle = ProducerHandle::new();

        handle.connect(&broker, &config(), TIMEOUT).await.unwrap();

        assert!(handle.is_connected());
        assert!(handle.session().is_some());
        assert_eq!(broker.producer_connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_never_retried() {
        let broker = InMemoryBroker::unreachable();
        let handle = ProducerHandle::new();

        let result = handle.connect(&broker, &config(), TIMEOUT).await;
        assert!(matches!(result, Err(Error::Connect(_))));
        assert_eq!(handle.state(), ProducerState::Failed);

        // The broker comes back, but the handle stays failed
        broker.clear(Fault::Unreachable);
        let result = handle.connect(&broker, &config(), TIMEOUT).await;
        assert!(result.is_err());
        assert_eq!(handle.state(), ProducerState::Failed);
        assert_eq!(broker.producer_connects(), 0);
    }

    #[tokio::test]
    async fn test_second_connect_is_refused() {
        let broker = InMemoryBroker::new();
        let handle = ProducerHandle::new();

        handle.connect(&broker, &config(), TIMEOUT).await.unwrap();
        assert!(handle.connect(&broker, &config(), TIMEOUT).await.is_err());

        assert!(handle.is_connected());
        assert_eq!(broker.producer_connects(), 1);
    }

    #[tokio::test]
    async fn test_stalled_connect_times_out() {
        let broker = InMemoryBroker::new();
        broker.inject(Fault::Stall);
        let handle = ProducerHandle::new();

        let result = handle
            .connect(&broker, &config(), Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(handle.state(), ProducerState::Failed);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let broker = InMemoryBroker::new();
        let handle = ProducerHandle::new();
        handle.connect(&broker, &config(), TIMEOUT).await.unwrap();

        handle.disconnect().await;
        handle.disconnect().await;

        assert_eq!(handle.state(), ProducerState::Disconnected);
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let handle = ProducerHandle::new();

        handle.disconnect().await;

        assert_eq!(handle.state(), ProducerState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_error_is_swallowed() {
        let broker = InMemoryBroker::new();
        let handle = ProducerHandle::new();
        handle.connect(&broker, &config(), TIMEOUT).await.unwrap();
        broker.inject(Fault::Disconnect);

        handle.disconnect().await;

        assert_eq!(handle.state(), ProducerState::Disconnected);
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_no_connect_after_disconnect() {
        let broker = InMemoryBroker::new();
        let handle = ProducerHandle::new();

        handle.disconnect().await;
        assert!(handle.connect(&broker, &config(), TIMEOUT).await.is_err());

        assert_eq!(broker.producer_connects(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_during_connect_releases_session() {
        let broker = InMemoryBroker::new();
        let gate = Arc::new(Notify::new());
        let connector = GatedConnector {
            broker: broker.clone(),
            gate: Arc::clone(&gate),
        };
        let handle = Arc::new(ProducerHandle::new());

        let connecting = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.connect(&connector, &config(), TIMEOUT).await })
        };

        while handle.state() != ProducerState::Connecting {
            tokio::task::yield_now().await;
        }
        handle.disconnect().await;
        gate.notify_one();

        let result = connecting.await.unwrap();
        assert!(result.is_err());
        assert_eq!(handle.state(), ProducerState::Disconnected);
        assert_eq!(broker.producer_connects(), 1);
        assert_eq!(broker.disconnects(), 1);
    }
}
