//! Chat Relay
//!
//! Transport seam for encrypted chat. The relay only ever sees opaque
//! ciphertext plus routing addresses.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

/// Default wait in [`MemoryRelayClient::receive_encrypted`].
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(50);

/// One delivered payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Relay client that sent it.
    pub from: String,
    /// Address it was sent to (e.g. `squad:<id>`).
    pub to: String,
    /// Encrypted payload.
    pub payload: Vec<u8>,
}

/// Relay failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Client is no longer attached to the relay.
    #[error("relay client {0} disconnected")]
    Disconnected(String),

    /// Client ID already attached.
    #[error("relay client {0} already connected")]
    DuplicateClient(String),
}

/// Client side of a message relay.
pub trait RelayClient: Send + Sync {
    /// This client's address on the relay.
    fn client_id(&self) -> &str;

    /// Send ciphertext to an address.
    fn send_encrypted(&self, to: &str, ciphertext: Vec<u8>) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Next pending message, or `None` when nothing arrives in time.
    fn receive_encrypted(&self) -> impl Future<Output = Option<RelayMessage>> + Send;
}

/// In-process relay. Every message fans out to all other attached clients.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    peers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<RelayMessage>>>>,
}

impl MemoryRelay {
    /// Empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client under `client_id`.
    pub async fn connect(&self, client_id: &str) -> Result<MemoryRelayClient, RelayError> {
        self.connect_with_timeout(client_id, DEFAULT_RECEIVE_TIMEOUT).await
    }

    /// Attach a client with a custom receive timeout.
    pub async fn connect_with_timeout(
        &self,
        client_id: &str,
        receive_timeout: Duration,
    ) -> Result<MemoryRelayClient, RelayError> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(client_id) {
            return Err(RelayError::DuplicateClient(client_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(client_id.to_string(), tx);
        debug!("Relay client {} connected", client_id);

        Ok(MemoryRelayClient {
            client_id: client_id.to_string(),
            relay: self.clone(),
            inbox: Mutex::new(rx),
            receive_timeout,
        })
    }

    /// Detach a client; its pending messages are dropped.
    pub async fn disconnect(&self, client_id: &str) {
        if self.peers.write().await.remove(client_id).is_some() {
            debug!("Relay client {} disconnected", client_id);
        }
    }

    /// Number of attached clients.
    pub async fn client_count(&self) -> usize {
        self.peers.read().await.len()
    }

    async fn deliver(&self, message: RelayMessage) -> Result<(), RelayError> {
        let peers = self.peers.read().await;
        if !peers.contains_key(&message.from) {
            return Err(RelayError::Disconnected(message.from));
        }

        for (id, tx) in peers.iter() {
            if *id == message.from {
                continue;
            }
            // A closed inbox means the client was dropped without disconnecting.
            let _ = tx.send(message.clone());
        }
        Ok(())
    }
}

/// Client attached to a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryRelayClient {
    client_id: String,
    relay: MemoryRelay,
    inbox: Mutex<mpsc::UnboundedReceiver<RelayMessage>>,
    receive_timeout: Duration,
}

impl RelayClient for MemoryRelayClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send_encrypted(&self, to: &str, ciphertext: Vec<u8>) -> Result<(), RelayError> {
        self.relay
            .deliver(RelayMessage {
                from: self.client_id.clone(),
                to: to.to_string(),
                payload: ciphertext,
            })
            .await
    }

    async fn receive_encrypted(&self) -> Option<RelayMessage> {
        let mut inbox = self.inbox.lock().await;
        tokio::time::timeout(self.receive_timeout, inbox.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_skips_sender() {
        let relay = MemoryRelay::new();
        let alice = relay.connect("alice").await.unwrap();
        let bob = relay.connect("bob").await.unwrap();
        let carol = relay.connect("carol").await.unwrap();

        alice.send_encrypted("squad:1", vec![1, 2, 3]).await.unwrap();

        for client in [&bob, &carol] {
            let msg = client.receive_encrypted().await.unwrap();
            assert_eq!(msg.from, "alice");
            assert_eq!(msg.to, "squad:1");
            assert_eq!(msg.payload, vec![1, 2, 3]);
        }
        assert!(alice.receive_encrypted().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let relay = MemoryRelay::new();
        let alice = relay
            .connect_with_timeout("alice", Duration::from_millis(10))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        assert!(alice.receive_encrypted().await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_duplicate_and_disconnected_clients() {
        let relay = MemoryRelay::new();
        let alice = relay.connect("alice").await.unwrap();
        assert_eq!(
            relay.connect("alice").await.unwrap_err(),
            RelayError::DuplicateClient("alice".into())
        );

        relay.disconnect("alice").await;
        assert_eq!(relay.client_count().await, 0);
        assert_eq!(
            alice.send_encrypted("squad:1", vec![]).await,
            Err(RelayError::Disconnected("alice".into()))
        );
    }
}
