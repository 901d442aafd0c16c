//! Squad Chat Channel
//!
//! One squad's end-to-end encrypted message stream over a relay.
//!
//! Channels opened by the same manager share one relay client. Whichever
//! channel drains the client parks frames addressed to its siblings in a
//! shared [`ChannelInbox`]; the sibling picks them up on its next receive.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use super::cipher::{ChaChaCipher, ChatCipher, SquadKey};
use super::relay::{RelayClient, RelayMessage};
use super::ChatError;

/// Callback invoked with each payload that could not be read.
pub type DecryptFailureHook = Arc<dyn Fn(&RelayMessage) + Send + Sync>;

/// Plaintext chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Squad the message belongs to.
    pub squad_id: String,
    /// Sender.
    pub from: String,
    /// Body.
    pub text: String,
    /// When it was sent.
    pub sent_at: DateTime<Utc>,
}

/// Relay address of a squad's chat.
pub fn squad_address(squad_id: &str) -> String {
    format!("squad:{}", squad_id)
}

/// Identity of one player's end of a squad chat.
pub fn channel_identity(squad_id: &str, player_id: &str) -> String {
    format!("squad:{}/{}", squad_id, player_id)
}

/// Frames waiting for a channel, keyed by relay address. Only registered
/// addresses buffer anything.
#[derive(Debug, Default)]
pub struct ChannelInbox {
    pending: Mutex<HashMap<String, VecDeque<RelayMessage>>>,
}

impl ChannelInbox {
    /// Empty inbox with no registered address.
    pub fn new() -> Self {
        Self::default()
    }

    fn for_address(address: &str) -> Self {
        let mut pending = HashMap::new();
        pending.insert(address.to_string(), VecDeque::new());
        Self { pending: Mutex::new(pending) }
    }

    /// Start buffering frames for `address`.
    pub async fn register(&self, address: &str) {
        self.pending.lock().await.entry(address.to_string()).or_default();
    }

    /// Stop buffering for `address` and drop anything parked there.
    pub async fn unregister(&self, address: &str) {
        self.pending.lock().await.remove(address);
    }

    async fn take(&self, address: &str) -> Vec<RelayMessage> {
        self.pending
            .lock()
            .await
            .get_mut(address)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    async fn route(&self, item: RelayMessage) {
        match self.pending.lock().await.get_mut(&item.to) {
            Some(queue) => queue.push_back(item),
            None => trace!("Dropped frame for {} (no channel)", item.to),
        }
    }
}

/// Encrypted chat for one squad.
pub struct SquadChatChannel<R, C = ChaChaCipher> {
    squad_id: String,
    local_player: String,
    address: String,
    key: SquadKey,
    cipher: C,
    relay: Arc<R>,
    inbox: Arc<ChannelInbox>,
    messages: RwLock<Vec<ChatMessage>>,
    decrypt_failures: AtomicU64,
    failure_hook: RwLock<Option<DecryptFailureHook>>,
}

impl<R: RelayClient> SquadChatChannel<R> {
    /// Channel using ChaCha20-Poly1305.
    pub fn new(squad_id: &str, local_player: &str, key: SquadKey, relay: Arc<R>) -> Self {
        Self::with_cipher(squad_id, local_player, key, relay, ChaChaCipher)
    }
}

impl<R: RelayClient, C: ChatCipher> SquadChatChannel<R, C> {
    /// Channel using a custom cipher, with a relay client of its own.
    pub fn with_cipher(squad_id: &str, local_player: &str, key: SquadKey, relay: Arc<R>, cipher: C) -> Self {
        let inbox = Arc::new(ChannelInbox::for_address(&squad_address(squad_id)));
        Self::with_inbox(squad_id, local_player, key, relay, cipher, inbox)
    }

    /// Channel sharing `relay` with siblings through `inbox`. The caller
    /// registers the channel's address with the inbox.
    pub fn with_inbox(
        squad_id: &str,
        local_player: &str,
        key: SquadKey,
        relay: Arc<R>,
        cipher: C,
        inbox: Arc<ChannelInbox>,
    ) -> Self {
        Self {
            squad_id: squad_id.to_string(),
            local_player: local_player.to_string(),
            address: squad_address(squad_id),
            key,
            cipher,
            relay,
            inbox,
            messages: RwLock::new(Vec::new()),
            decrypt_failures: AtomicU64::new(0),
            failure_hook: RwLock::new(None),
        }
    }

    /// Squad this channel belongs to.
    pub fn squad_id(&self) -> &str {
        &self.squad_id
    }

    /// Player this end of the channel speaks for.
    pub fn local_player(&self) -> &str {
        &self.local_player
    }

    /// `squad:<squad_id>/<player_id>`.
    pub fn identity(&self) -> String {
        channel_identity(&self.squad_id, &self.local_player)
    }

    /// Copy of the channel key, for sharing with new members.
    pub fn encryption_key(&self) -> SquadKey {
        self.key.clone()
    }

    /// Encrypt and send a message, then append it to the local log. `from`
    /// must be the channel's local player.
    pub async fn send_message(&self, from: &str, text: &str) -> Result<ChatMessage, ChatError> {
        if from != self.local_player {
            return Err(ChatError::SenderMismatch {
                expected: self.local_player.clone(),
                got: from.to_string(),
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message = ChatMessage {
            squad_id: self.squad_id.clone(),
            from: self.local_player.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        let plaintext = serde_json::to_vec(&message).map_err(|e| ChatError::Serialization(e.to_string()))?;
        let payload = self.cipher.encrypt(&self.key, &plaintext)?;

        self.relay.send_encrypted(&self.address, payload).await?;
        self.messages.write().await.push(message.clone());

        trace!("Chat {} sent", self.identity());
        Ok(message)
    }

    /// Drain the relay and return newly received messages, oldest first.
    ///
    /// Frames for sibling channels are parked in the shared inbox; frames
    /// for addresses with no channel are dropped. Payloads that fail to
    /// decrypt or parse are counted and reported to the failure hook, never
    /// returned as errors.
    pub async fn receive_messages(&self) -> Vec<ChatMessage> {
        let mut items = self.inbox.take(&self.address).await;

        while let Some(item) = self.relay.receive_encrypted().await {
            if item.from == self.relay.client_id() {
                continue;
            }
            if item.to == self.address {
                items.push(item);
            } else {
                self.inbox.route(item).await;
            }
        }

        let mut received = Vec::new();
        for item in items {
            match self.open(&item) {
                Some(message) if message.from == self.local_player => {}
                Some(message) => received.push(message),
                None => self.record_failure(&item).await,
            }
        }

        if !received.is_empty() {
            debug!("Chat {} received {} messages", self.identity(), received.len());
            self.messages.write().await.extend(received.iter().cloned());
        }
        received
    }

    /// Everything sent or received on this channel so far.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    /// Payloads discarded because they could not be read.
    pub fn decrypt_failures(&self) -> u64 {
        self.decrypt_failures.load(Ordering::Relaxed)
    }

    /// Install a hook called for every discarded payload.
    pub async fn on_decrypt_failure<F>(&self, hook: F)
    where
        F: Fn(&RelayMessage) + Send + Sync + 'static,
    {
        *self.failure_hook.write().await = Some(Arc::new(hook));
    }

    fn open(&self, item: &RelayMessage) -> Option<ChatMessage> {
        let plaintext = self.cipher.decrypt(&self.key, &item.payload).ok()?;
        let message: ChatMessage = serde_json::from_slice(&plaintext).ok()?;
        (message.squad_id == self.squad_id).then_some(message)
    }

    async fn record_failure(&self, item: &RelayMessage) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Chat {} discarded unreadable payload from {} ({} bytes)",
            self.address,
            item.from,
            item.payload.len()
        );

        let hook = self.failure_hook.read().await.clone();
        if let Some(hook) = hook {
            hook(item);
        }
    }
}
