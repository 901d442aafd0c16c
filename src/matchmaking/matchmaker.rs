//! Matchmaker
//!
//! Groups queued players into matches on servers from the hub.
//!
//! Two independent loops share the queue lock:
//! - the match tick forms groups and asks the hub for a server,
//! - the expiry sweep drops entries older than `queue_timeout`.
//!
//! A tick never holds the queue lock while calling into the hub: it
//! snapshots candidates, releases the lock, queries the hub, then re-locks
//! to commit. Commit checks that every candidate is still queued, so a
//! concurrent dequeue or expiry simply voids that match attempt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{MatchmakerConfig, ModeRules};
use crate::hub::registry::{Hub, Region};
use crate::matchmaking::queue::{MatchResult, MatchmakingError, QueueEntry, QueueState};
use crate::shutdown::Shutdown;

/// The matchmaking engine.
pub struct Matchmaker {
    config: MatchmakerConfig,
    hub: Arc<Hub>,
    state: RwLock<QueueState>,
    results_tx: broadcast::Sender<MatchResult>,
    shutdown: Shutdown,
}

impl Matchmaker {
    /// Create a matchmaker reading servers from `hub`.
    pub fn new(config: MatchmakerConfig, hub: Arc<Hub>) -> Self {
        let (results_tx, _) = broadcast::channel(256);
        Self {
            config,
            hub,
            state: RwLock::new(QueueState::default()),
            results_tx,
            shutdown: Shutdown::new(),
        }
    }

    /// Rules applied to `mode`.
    pub fn rules_for(&self, mode: &str) -> ModeRules {
        self.config.rules_for(mode)
    }

    /// Receive every match formed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchResult> {
        self.results_tx.subscribe()
    }

    /// Queue a player.
    pub async fn enqueue(&self, player_id: &str, mode: &str, genre: &str, region: Region) -> Result<(), MatchmakingError> {
        self.enqueue_at(player_id, mode, genre, region, Utc::now()).await
    }

    /// [`Matchmaker::enqueue`] with an explicit enqueue time.
    pub async fn enqueue_at(
        &self,
        player_id: &str,
        mode: &str,
        genre: &str,
        region: Region,
        now: DateTime<Utc>,
    ) -> Result<(), MatchmakingError> {
        let mut state = self.state.write().await;
        state.insert(player_id, mode, genre, region, now)?;
        debug!("Queued {} for {} ({}/{})", player_id, mode, genre, region);
        Ok(())
    }

    /// Remove a player from whichever queue holds them.
    pub async fn dequeue(&self, player_id: &str) -> bool {
        let removed = self.state.write().await.remove(player_id);
        if let Some(entry) = &removed {
            debug!("Dequeued {} from {}", entry.player_id, entry.mode);
        }
        removed.is_some()
    }

    /// Whether a player is queued in any mode.
    pub async fn is_queued(&self, player_id: &str) -> bool {
        self.state.read().await.contains(player_id)
    }

    /// The player's queue entry, if any.
    pub async fn entry(&self, player_id: &str) -> Option<QueueEntry> {
        self.state.read().await.get(player_id).cloned()
    }

    /// Players waiting for `mode`.
    pub async fn queue_len(&self, mode: &str) -> usize {
        self.state.read().await.queue_len(mode)
    }

    /// Players waiting across all modes.
    pub async fn total_queued(&self) -> usize {
        self.state.read().await.total()
    }

    /// Queue sizes per mode with at least one waiting player.
    pub async fn queue_sizes(&self) -> BTreeMap<String, usize> {
        let state = self.state.read().await;
        state.modes().map(|m| (m.to_string(), state.queue_len(m))).collect()
    }

    /// Run one match attempt over all queues.
    pub async fn tick(&self) -> Vec<MatchResult> {
        self.tick_at(Utc::now()).await
    }

    /// [`Matchmaker::tick`] evaluated at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<MatchResult> {
        let candidates = {
            let state = self.state.read().await;
            state.candidates(|mode| self.config.rules_for(mode))
        };

        let mut results = Vec::new();
        // Slots handed out earlier in this tick, by server name.
        let mut reserved: BTreeMap<String, u32> = BTreeMap::new();

        for candidate in candidates {
            let needed = candidate.entries.len();
            let Some(server) = self
                .hub
                .find_server_reserved_at(&candidate.genre, candidate.region, needed, &reserved, now)
                .await
            else {
                debug!(
                    "No server for {} x{} ({}/{}), retrying next tick",
                    candidate.mode, needed, candidate.genre, candidate.region
                );
                continue;
            };

            if !self.state.write().await.take_candidate(&candidate) {
                debug!("Candidate group for {} changed before commit", candidate.mode);
                continue;
            }
            *reserved.entry(server.name.clone()).or_default() += needed as u32;

            let result = MatchResult {
                match_id: Uuid::new_v4(),
                mode: candidate.mode,
                genre: candidate.genre,
                region: candidate.region,
                player_ids: candidate.entries.into_iter().map(|e| e.player_id).collect(),
                server,
                created_at: now,
            };

            info!(
                "Match {} ({}) on {}: {} player(s)",
                result.match_id,
                result.mode,
                result.server.name,
                result.player_ids.len()
            );
            let _ = self.results_tx.send(result.clone());
            results.push(result);
        }

        results
    }

    /// Drop entries older than the queue timeout. Returns their player IDs.
    pub async fn expire(&self) -> Vec<String> {
        self.expire_at(Utc::now()).await
    }

    /// [`Matchmaker::expire`] evaluated at `now`.
    pub async fn expire_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.config.queue_timeout).unwrap_or(chrono::Duration::MAX);
        let expired = self.state.write().await.expire(now, timeout);

        for entry in &expired {
            info!("Queue entry for {} ({}) expired", entry.player_id, entry.mode);
        }
        expired.into_iter().map(|e| e.player_id).collect()
    }

    /// Spawn the match tick and the expiry sweep.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let matcher = self.clone();
        let mut match_shutdown = self.shutdown.listener();
        let match_loop = tokio::spawn(async move {
            let mut ticker = interval(matcher.config.match_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        matcher.tick().await;
                    }
                    _ = match_shutdown.wait() => break,
                }
            }
            debug!("Match loop stopped");
        });

        let sweeper = self.clone();
        let mut sweep_shutdown = self.shutdown.listener();
        let expiry_loop = tokio::spawn(async move {
            let mut ticker = interval(sweeper.config.expiry_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweeper.expire().await;
                    }
                    _ = sweep_shutdown.wait() => break,
                }
            }
            debug!("Expiry loop stopped");
        });

        info!(
            "Matchmaker running (tick {:?}, expiry {:?}, timeout {:?})",
            self.config.match_interval, self.config.expiry_interval, self.config.queue_timeout
        );
        vec![match_loop, expiry_loop]
    }

    /// Signal both loops to exit after their current pass.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}
