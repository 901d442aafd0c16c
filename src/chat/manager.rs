//! Squad Chat Manager
//!
//! At most one chat channel per squad for the local player. All channels
//! share one relay client and one [`ChannelInbox`], so a frame drained by
//! any channel reaches the channel it is addressed to.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::channel::{squad_address, ChannelInbox, ChatMessage, SquadChatChannel};
use super::cipher::{ChaChaCipher, SquadKey};
use super::relay::RelayClient;
use super::ChatError;
use crate::squad::Squad;

/// Chat channels of the local player.
pub struct SquadChatManager<R> {
    local_player: String,
    relay: Arc<R>,
    inbox: Arc<ChannelInbox>,
    channels: RwLock<BTreeMap<String, Arc<SquadChatChannel<R>>>>,
}

impl<R: RelayClient> SquadChatManager<R> {
    /// Manager for `local_player` on `relay`.
    pub fn new(local_player: &str, relay: R) -> Self {
        Self {
            local_player: local_player.to_string(),
            relay: Arc::new(relay),
            inbox: Arc::new(ChannelInbox::new()),
            channels: RwLock::new(BTreeMap::new()),
        }
    }

    /// Player this manager acts for.
    pub fn local_player(&self) -> &str {
        &self.local_player
    }

    /// Open a channel with a fresh key. The local player must belong to the
    /// squad.
    pub async fn create_channel(&self, squad: &Squad) -> Result<Arc<SquadChatChannel<R>>, ChatError> {
        if !squad.is_member(&self.local_player) {
            return Err(ChatError::NotInSquad {
                player_id: self.local_player.clone(),
                squad_id: squad.id.clone(),
            });
        }
        self.insert(&squad.id, SquadKey::generate()).await
    }

    /// Open a channel with a key shared by another member.
    pub async fn join_channel(&self, squad_id: &str, key: SquadKey) -> Result<Arc<SquadChatChannel<R>>, ChatError> {
        self.insert(squad_id, key).await
    }

    /// Channel for a squad.
    pub async fn channel(&self, squad_id: &str) -> Option<Arc<SquadChatChannel<R>>> {
        self.channels.read().await.get(squad_id).cloned()
    }

    /// Drop a squad's channel. Returns whether it existed.
    pub async fn close_channel(&self, squad_id: &str) -> bool {
        let removed = self.channels.write().await.remove(squad_id).is_some();
        if removed {
            self.inbox.unregister(&squad_address(squad_id)).await;
            info!("Chat channel for squad {} closed", squad_id);
        }
        removed
    }

    /// Number of open channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Receive on every channel. Squads with nothing new are left out.
    pub async fn receive_all(&self) -> BTreeMap<String, Vec<ChatMessage>> {
        let channels: Vec<_> = self.channels.read().await.values().cloned().collect();

        let mut out = BTreeMap::new();
        for channel in channels {
            let received = channel.receive_messages().await;
            if !received.is_empty() {
                out.insert(channel.squad_id().to_string(), received);
            }
        }
        out
    }

    async fn insert(&self, squad_id: &str, key: SquadKey) -> Result<Arc<SquadChatChannel<R>>, ChatError> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(squad_id) {
            return Err(ChatError::ChannelExists(squad_id.to_string()));
        }

        let fingerprint = key.fingerprint();
        self.inbox.register(&squad_address(squad_id)).await;
        let channel = Arc::new(SquadChatChannel::with_inbox(
            squad_id,
            &self.local_player,
            key,
            self.relay.clone(),
            ChaChaCipher,
            self.inbox.clone(),
        ));
        channels.insert(squad_id.to_string(), channel.clone());

        info!("Chat channel {} opened (key {})", channel.identity(), fingerprint);
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::relay::MemoryRelay;

    fn squad_with(members: &[&str]) -> Squad {
        let mut squad = Squad::new("Night Owls", "OWL", members[0], "Founder").unwrap();
        for id in &members[1..] {
            squad.invite(id).unwrap();
            squad.accept(id, *id).unwrap();
        }
        squad
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let relay = MemoryRelay::new();
        let squad = squad_with(&["alice", "bob"]);

        let alice = SquadChatManager::new("alice", relay.connect("alice").await.unwrap());
        let bob = SquadChatManager::new("bob", relay.connect("bob").await.unwrap());

        let a = alice.create_channel(&squad).await.unwrap();
        let b = bob.join_channel(&squad.id, a.encryption_key()).await.unwrap();
        assert_eq!(b.identity(), format!("squad:{}/bob", squad.id));

        b.send_message("bob", "gg").await.unwrap();
        let got = a.receive_messages().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "gg");
        assert_eq!(got[0].from, "bob");
    }

    #[tokio::test]
    async fn test_one_channel_per_squad() {
        let relay = MemoryRelay::new();
        let squad = squad_with(&["alice"]);
        let manager = SquadChatManager::new("alice", relay.connect("alice").await.unwrap());

        manager.create_channel(&squad).await.unwrap();
        let err = manager.join_channel(&squad.id, SquadKey::generate()).await.err();
        assert_eq!(err, Some(ChatError::ChannelExists(squad.id.clone())));
        assert_eq!(manager.channel_count().await, 1);

        assert!(manager.close_channel(&squad.id).await);
        assert!(manager.channel(&squad.id).await.is_none());
        manager.create_channel(&squad).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_requires_membership() {
        let relay = MemoryRelay::new();
        let squad = squad_with(&["alice"]);
        let manager = SquadChatManager::new("eve", relay.connect("eve").await.unwrap());

        let err = manager.create_channel(&squad).await.err();
        assert_eq!(
            err,
            Some(ChatError::NotInSquad { player_id: "eve".into(), squad_id: squad.id.clone() })
        );
        assert_eq!(manager.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_sibling_poll_keeps_messages() {
        let relay = MemoryRelay::new();
        let first = squad_with(&["alice", "bob"]);
        let second = squad_with(&["alice", "bob"]);

        let alice = SquadChatManager::new("alice", relay.connect("alice").await.unwrap());
        let bob = SquadChatManager::new("bob", relay.connect("bob").await.unwrap());

        let a1 = alice.create_channel(&first).await.unwrap();
        let a2 = alice.create_channel(&second).await.unwrap();
        let b1 = bob.join_channel(&first.id, a1.encryption_key()).await.unwrap();
        let b2 = bob.join_channel(&second.id, a2.encryption_key()).await.unwrap();

        b1.send_message("bob", "first").await.unwrap();
        b2.send_message("bob", "second").await.unwrap();

        let got2 = a2.receive_messages().await;
        assert_eq!(got2.len(), 1);
        assert_eq!(got2[0].text, "second");

        let got1 = a1.receive_messages().await;
        assert_eq!(got1.len(), 1);
        assert_eq!(got1[0].text, "first");
        assert_eq!(a1.decrypt_failures() + a2.decrypt_failures(), 0);
    }

    #[tokio::test]
    async fn test_receive_all_routes_by_squad() {
        let relay = MemoryRelay::new();
        let first = squad_with(&["alice", "bob"]);
        let second = squad_with(&["alice", "bob"]);

        let alice = SquadChatManager::new("alice", relay.connect("alice").await.unwrap());
        let bob = SquadChatManager::new("bob", relay.connect("bob").await.unwrap());

        let a1 = alice.create_channel(&first).await.unwrap();
        let a2 = alice.create_channel(&second).await.unwrap();
        let b1 = bob.join_channel(&first.id, a1.encryption_key()).await.unwrap();
        let b2 = bob.join_channel(&second.id, a2.encryption_key()).await.unwrap();

        b2.send_message("bob", "two").await.unwrap();
        b1.send_message("bob", "one").await.unwrap();

        let all = alice.receive_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[&first.id][0].text, "one");
        assert_eq!(all[&second.id][0].text, "two");
    }

    #[tokio::test]
    async fn test_closed_channel_frames_dropped() {
        let relay = MemoryRelay::new();
        let first = squad_with(&["alice", "bob"]);
        let second = squad_with(&["alice", "bob"]);

        let alice = SquadChatManager::new("alice", relay.connect("alice").await.unwrap());
        let bob = SquadChatManager::new("bob", relay.connect("bob").await.unwrap());

        let a1 = alice.create_channel(&first).await.unwrap();
        alice.create_channel(&second).await.unwrap();
        let b1 = bob.join_channel(&first.id, a1.encryption_key()).await.unwrap();

        assert!(alice.close_channel(&first.id).await);
        b1.send_message("bob", "anyone?").await.unwrap();

        let a2 = alice.channel(&second.id).await.unwrap();
        assert!(a2.receive_messages().await.is_empty());
        assert_eq!(a2.decrypt_failures(), 0);
    }
}
