//! Matchmaking Queues
//!
//! Per-mode FIFO queues plus the player -> mode index that keeps a player
//! in at most one queue at a time. Pure data; locking lives in the
//! matchmaker.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ModeRules;
use crate::hub::registry::{Region, ServerRecord};

/// A waiting player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Player identifier.
    pub player_id: String,
    /// Requested game mode.
    pub mode: String,
    /// Requested genre.
    pub genre: String,
    /// Requested region.
    pub region: Region,
    /// When the player joined the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Insertion counter, breaks `enqueued_at` ties.
    #[serde(skip)]
    pub(crate) seq: u64,
}

/// A formed match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Match identifier.
    pub match_id: Uuid,
    /// Game mode.
    pub mode: String,
    /// Genre of the group.
    pub genre: String,
    /// Region of the group.
    pub region: Region,
    /// Matched players, earliest-queued first.
    pub player_ids: Vec<String>,
    /// Server chosen for the match (snapshot at match time).
    pub server: ServerRecord,
    /// When the match was formed.
    pub created_at: DateTime<Utc>,
}

/// Enqueue validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    /// Player ID is empty.
    #[error("player id must not be empty")]
    EmptyPlayerId,

    /// Mode is empty.
    #[error("mode must not be empty")]
    EmptyMode,

    /// Player already waits in some queue.
    #[error("player {player_id} already in queue for {mode}")]
    AlreadyQueued {
        /// Player identifier.
        player_id: String,
        /// Mode the player is queued for.
        mode: String,
    },
}

/// Group of entries selected for a match attempt.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub mode: String,
    pub genre: String,
    pub region: Region,
    pub entries: Vec<QueueEntry>,
}

/// All queues.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// mode -> entries in insertion order
    queues: BTreeMap<String, Vec<QueueEntry>>,
    /// player_id -> mode
    queued: HashMap<String, String>,
    next_seq: u64,
}

impl QueueState {
    pub fn insert(
        &mut self,
        player_id: &str,
        mode: &str,
        genre: &str,
        region: Region,
        now: DateTime<Utc>,
    ) -> Result<(), MatchmakingError> {
        if player_id.is_empty() {
            return Err(MatchmakingError::EmptyPlayerId);
        }
        if mode.is_empty() {
            return Err(MatchmakingError::EmptyMode);
        }
        if let Some(existing) = self.queued.get(player_id) {
            return Err(MatchmakingError::AlreadyQueued {
                player_id: player_id.to_string(),
                mode: existing.clone(),
            });
        }

        let entry = QueueEntry {
            player_id: player_id.to_string(),
            mode: mode.to_string(),
            genre: genre.to_string(),
            region,
            enqueued_at: now,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        self.queued.insert(entry.player_id.clone(), entry.mode.clone());
        self.queues.entry(entry.mode.clone()).or_default().push(entry);
        Ok(())
    }

    pub fn remove(&mut self, player_id: &str) -> Option<QueueEntry> {
        let mode = self.queued.remove(player_id)?;
        let queue = self.queues.get_mut(&mode)?;
        let idx = queue.iter().position(|e| e.player_id == player_id)?;
        let entry = queue.remove(idx);
        if queue.is_empty() {
            self.queues.remove(&mode);
        }
        Some(entry)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.queued.contains_key(player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&QueueEntry> {
        let mode = self.queued.get(player_id)?;
        self.queues.get(mode)?.iter().find(|e| e.player_id == player_id)
    }

    pub fn queue_len(&self, mode: &str) -> usize {
        self.queues.get(mode).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.queued.len()
    }

    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// One candidate group per (mode, genre, region) partition that has
    /// reached the mode minimum, capped at the mode maximum, earliest first.
    pub fn candidates<F>(&self, rules_for: F) -> Vec<Candidate>
    where
        F: Fn(&str) -> ModeRules,
    {
        let mut out = Vec::new();

        for (mode, queue) in &self.queues {
            let rules = rules_for(mode);

            let mut partitions: BTreeMap<(&str, Region), Vec<&QueueEntry>> = BTreeMap::new();
            for entry in queue {
                partitions.entry((entry.genre.as_str(), entry.region)).or_default().push(entry);
            }

            for ((genre, region), mut entries) in partitions {
                if entries.len() < rules.min_players {
                    continue;
                }
                entries.sort_by_key(|e| (e.enqueued_at, e.seq));
                entries.truncate(rules.max_players);

                out.push(Candidate {
                    mode: mode.clone(),
                    genre: genre.to_string(),
                    region,
                    entries: entries.into_iter().cloned().collect(),
                });
            }
        }

        out
    }

    /// Remove every entry of the candidate, or none if any has left the
    /// queue (or been re-queued) since the candidate was taken.
    pub fn take_candidate(&mut self, candidate: &Candidate) -> bool {
        let intact = candidate
            .entries
            .iter()
            .all(|c| self.get(&c.player_id).is_some_and(|e| e.seq == c.seq));
        if !intact {
            return false;
        }

        for entry in &candidate.entries {
            self.remove(&entry.player_id);
        }
        true
    }

    /// Remove entries queued for longer than `timeout`.
    pub fn expire(&mut self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<QueueEntry> {
        let expired: Vec<String> = self
            .queues
            .values()
            .flatten()
            .filter(|e| now - e.enqueued_at > timeout)
            .map(|e| e.player_id.clone())
            .collect();

        expired.iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffa() -> ModeRules {
        ModeRules { min_players: 2, max_players: 3 }
    }

    #[test]
    fn test_unique_across_modes() {
        let mut state = QueueState::default();
        let now = Utc::now();
        state.insert("p1", "FFA", "scifi", Region::UsEast, now).unwrap();

        let err = state.insert("p1", "TDM", "scifi", Region::UsEast, now).unwrap_err();
        assert_eq!(
            err,
            MatchmakingError::AlreadyQueued { player_id: "p1".into(), mode: "FFA".into() }
        );
        assert_eq!(state.total(), 1);
    }

    #[test]
    fn test_validation() {
        let mut state = QueueState::default();
        let now = Utc::now();
        assert_eq!(state.insert("", "FFA", "g", Region::UsEast, now), Err(MatchmakingError::EmptyPlayerId));
        assert_eq!(state.insert("p1", "", "g", Region::UsEast, now), Err(MatchmakingError::EmptyMode));
    }

    #[test]
    fn test_candidates_partition_and_cap() {
        let mut state = QueueState::default();
        let t0 = Utc::now();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            state
                .insert(id, "FFA", "scifi", Region::UsEast, t0 + chrono::Duration::seconds(i as i64))
                .unwrap();
        }
        // Lone player in another region never reaches the minimum.
        state.insert("e", "FFA", "scifi", Region::EuWest, t0).unwrap();

        let candidates = state.candidates(|_| ffa());
        assert_eq!(candidates.len(), 1);
        let ids: Vec<_> = candidates[0].entries.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_candidates_earliest_first() {
        let mut state = QueueState::default();
        let t0 = Utc::now();
        state.insert("late", "FFA", "scifi", Region::UsEast, t0 + chrono::Duration::seconds(10)).unwrap();
        state.insert("early", "FFA", "scifi", Region::UsEast, t0).unwrap();
        state.insert("tie-1", "FFA", "scifi", Region::UsEast, t0 + chrono::Duration::seconds(5)).unwrap();
        state.insert("tie-2", "FFA", "scifi", Region::UsEast, t0 + chrono::Duration::seconds(5)).unwrap();

        let candidates = state.candidates(|_| ffa());
        let ids: Vec<_> = candidates[0].entries.iter().map(|e| e.player_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "tie-1", "tie-2"]);
    }

    #[test]
    fn test_take_candidate_rejects_changed_queue() {
        let mut state = QueueState::default();
        let now = Utc::now();
        state.insert("a", "FFA", "scifi", Region::UsEast, now).unwrap();
        state.insert("b", "FFA", "scifi", Region::UsEast, now).unwrap();

        let candidate = state.candidates(|_| ffa()).remove(0);

        // b leaves and rejoins between snapshot and commit
        state.remove("b");
        state.insert("b", "FFA", "scifi", Region::UsEast, now).unwrap();

        assert!(!state.take_candidate(&candidate));
        assert_eq!(state.total(), 2);
    }

    #[test]
    fn test_expire() {
        let mut state = QueueState::default();
        let t0 = Utc::now();
        state.insert("old", "FFA", "scifi", Region::UsEast, t0).unwrap();
        state.insert("new", "TDM", "scifi", Region::UsEast, t0 + chrono::Duration::seconds(100)).unwrap();

        let expired = state.expire(t0 + chrono::Duration::seconds(121), chrono::Duration::seconds(120));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].player_id, "old");
        assert!(!state.contains("old"));
        assert!(state.contains("new"));
        assert_eq!(state.queue_len("FFA"), 0);
    }
}
