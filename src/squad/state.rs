//! Squad State
//!
//! One squad: members, pending invites and per-member stats.
//!
//! Per (squad, player) the relation moves
//! `NoRelation -> Invited -> Member(Leader | NonLeader) -> NoRelation`.
//!
//! Invariants kept by every mutation:
//! - at most [`MAX_SQUAD_SIZE`] members,
//! - exactly one leader whenever the squad is non-empty,
//! - nobody is both invited and a member,
//! - stats exist exactly for current members.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum members per squad.
pub const MAX_SQUAD_SIZE: usize = 8;

/// Maximum tag length in characters.
pub const MAX_TAG_LEN: usize = 4;

/// Squad member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquadMember {
    /// Display name.
    pub name: String,
    /// When the player joined.
    pub joined_at: DateTime<Utc>,
    /// Whether this member leads the squad.
    pub is_leader: bool,
}

/// Pending invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquadInvite {
    /// When the invite was sent.
    pub sent_at: DateTime<Utc>,
}

/// Per-member counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStats {
    /// Kills.
    pub kills: u64,
    /// Deaths.
    pub deaths: u64,
    /// Wins.
    pub wins: u64,
    /// Time played, in seconds.
    pub playtime_secs: u64,
}

impl MemberStats {
    /// Add `delta` to every counter.
    pub fn add(&mut self, delta: &MemberStats) {
        self.kills = self.kills.saturating_add(delta.kills);
        self.deaths = self.deaths.saturating_add(delta.deaths);
        self.wins = self.wins.saturating_add(delta.wins);
        self.playtime_secs = self.playtime_secs.saturating_add(delta.playtime_secs);
    }
}

/// Aggregate stats over current members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SquadStats {
    /// Members counted.
    pub member_count: usize,
    /// Sum of kills.
    pub total_kills: u64,
    /// Sum of deaths.
    pub total_deaths: u64,
    /// Sum of wins.
    pub total_wins: u64,
    /// Sum of playtime.
    pub total_playtime_secs: u64,
    /// Kills per member.
    pub avg_kills: f64,
    /// Deaths per member.
    pub avg_deaths: f64,
    /// Wins per member.
    pub avg_wins: f64,
    /// Playtime per member.
    pub avg_playtime_secs: f64,
}

/// Squad errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SquadError {
    /// Player is already a member.
    #[error("player {0} is already in the squad")]
    AlreadyInSquad(String),

    /// Squad has no free slot.
    #[error("squad is full")]
    SquadFull,

    /// No pending invite for the player.
    #[error("no pending invite for {0}")]
    NoInvite(String),

    /// Player is not a member.
    #[error("player {0} is not in the squad")]
    NotInSquad(String),

    /// Player ID is empty.
    #[error("player id must not be empty")]
    EmptyPlayerId,

    /// No squad with this ID.
    #[error("squad {0} not found")]
    SquadNotFound(String),
}

/// Broken squad invariant, found when checking state from outside (e.g. a
/// loaded file).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SquadInvariant {
    /// More than [`MAX_SQUAD_SIZE`] members.
    #[error("{0} members exceeds the limit of {}", MAX_SQUAD_SIZE)]
    TooManyMembers(usize),

    /// Non-empty squad without exactly one leader.
    #[error("expected exactly one leader, found {0}")]
    LeaderCount(usize),

    /// Player is both invited and a member.
    #[error("player {0} is both invited and a member")]
    InvitedMember(String),

    /// Stats entries do not match the member set.
    #[error("stats do not match members")]
    StatsMismatch,

    /// Tag longer than [`MAX_TAG_LEN`] characters.
    #[error("tag {0:?} is longer than {} characters", MAX_TAG_LEN)]
    TagTooLong(String),
}

/// A player group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Squad {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short tag, at most [`MAX_TAG_LEN`] characters.
    pub tag: String,
    /// When the squad was founded.
    pub created_at: DateTime<Utc>,
    members: BTreeMap<String, SquadMember>,
    #[serde(default)]
    invites: BTreeMap<String, SquadInvite>,
    #[serde(default)]
    stats: BTreeMap<String, MemberStats>,
}

/// Truncate to [`MAX_TAG_LEN`] characters.
pub fn normalize_tag(tag: &str) -> String {
    tag.chars().take(MAX_TAG_LEN).collect()
}

impl Squad {
    /// Found a squad. The founder becomes its leader.
    pub fn new(name: impl Into<String>, tag: &str, founder_id: &str, founder_name: impl Into<String>) -> Result<Self, SquadError> {
        if founder_id.is_empty() {
            return Err(SquadError::EmptyPlayerId);
        }

        let now = Utc::now();
        let mut squad = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tag: normalize_tag(tag),
            created_at: now,
            members: BTreeMap::new(),
            invites: BTreeMap::new(),
            stats: BTreeMap::new(),
        };
        squad.members.insert(
            founder_id.to_string(),
            SquadMember {
                name: founder_name.into(),
                joined_at: now,
                is_leader: true,
            },
        );
        squad.stats.insert(founder_id.to_string(), MemberStats::default());

        Ok(squad)
    }

    /// Check every membership invariant.
    pub fn validate(&self) -> Result<(), SquadInvariant> {
        if self.members.len() > MAX_SQUAD_SIZE {
            return Err(SquadInvariant::TooManyMembers(self.members.len()));
        }
        let leaders = self.members.values().filter(|m| m.is_leader).count();
        let expected = usize::from(!self.members.is_empty());
        if leaders != expected {
            return Err(SquadInvariant::LeaderCount(leaders));
        }
        if let Some(id) = self.invites.keys().find(|id| self.members.contains_key(*id)) {
            return Err(SquadInvariant::InvitedMember(id.clone()));
        }
        if !self.stats.keys().eq(self.members.keys()) {
            return Err(SquadInvariant::StatsMismatch);
        }
        if self.tag.chars().count() > MAX_TAG_LEN {
            return Err(SquadInvariant::TagTooLong(self.tag.clone()));
        }
        Ok(())
    }

    /// Change the tag (truncated).
    pub fn set_tag(&mut self, tag: &str) {
        self.tag = normalize_tag(tag);
    }

    /// Invite a player, replacing any earlier pending invite for them.
    pub fn invite(&mut self, player_id: &str) -> Result<(), SquadError> {
        self.invite_at(player_id, Utc::now())
    }

    /// [`Squad::invite`] with an explicit send time.
    pub fn invite_at(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<(), SquadError> {
        if player_id.is_empty() {
            return Err(SquadError::EmptyPlayerId);
        }
        if self.members.contains_key(player_id) {
            return Err(SquadError::AlreadyInSquad(player_id.to_string()));
        }
        if self.is_full() {
            return Err(SquadError::SquadFull);
        }

        self.invites.insert(player_id.to_string(), SquadInvite { sent_at: now });
        Ok(())
    }

    /// Accept a pending invite.
    pub fn accept(&mut self, player_id: &str, name: impl Into<String>) -> Result<(), SquadError> {
        self.accept_at(player_id, name, Utc::now())
    }

    /// [`Squad::accept`] with an explicit join time.
    pub fn accept_at(&mut self, player_id: &str, name: impl Into<String>, now: DateTime<Utc>) -> Result<(), SquadError> {
        if self.invites.remove(player_id).is_none() {
            return Err(SquadError::NoInvite(player_id.to_string()));
        }
        // From here on the invite is consumed whatever the outcome.
        if self.members.contains_key(player_id) {
            return Err(SquadError::AlreadyInSquad(player_id.to_string()));
        }
        if self.is_full() {
            return Err(SquadError::SquadFull);
        }

        self.members.insert(
            player_id.to_string(),
            SquadMember {
                name: name.into(),
                joined_at: now,
                is_leader: false,
            },
        );
        self.stats.insert(player_id.to_string(), MemberStats::default());
        Ok(())
    }

    /// Drop a pending invite.
    pub fn decline(&mut self, player_id: &str) -> Result<(), SquadError> {
        self.invites
            .remove(player_id)
            .map(|_| ())
            .ok_or_else(|| SquadError::NoInvite(player_id.to_string()))
    }

    /// Remove a member. A departing leader hands over to the longest-standing
    /// remaining member (ties by player ID).
    pub fn leave(&mut self, player_id: &str) -> Result<(), SquadError> {
        let member = self
            .members
            .remove(player_id)
            .ok_or_else(|| SquadError::NotInSquad(player_id.to_string()))?;
        self.stats.remove(player_id);

        if member.is_leader {
            let successor = self
                .members
                .iter()
                .min_by(|(a_id, a), (b_id, b)| a.joined_at.cmp(&b.joined_at).then_with(|| a_id.cmp(b_id)))
                .map(|(id, _)| id.clone());
            if let Some(successor) = successor {
                if let Some(next) = self.members.get_mut(&successor) {
                    next.is_leader = true;
                }
            }
        }

        Ok(())
    }

    /// Hand leadership to another member.
    pub fn promote(&mut self, player_id: &str) -> Result<(), SquadError> {
        if !self.members.contains_key(player_id) {
            return Err(SquadError::NotInSquad(player_id.to_string()));
        }
        for (id, member) in self.members.iter_mut() {
            member.is_leader = id == player_id;
        }
        Ok(())
    }

    /// Replace a member's counters.
    pub fn set_member_stats(&mut self, player_id: &str, stats: MemberStats) -> Result<(), SquadError> {
        let slot = self
            .stats
            .get_mut(player_id)
            .ok_or_else(|| SquadError::NotInSquad(player_id.to_string()))?;
        *slot = stats;
        Ok(())
    }

    /// Add deltas to a member's counters.
    pub fn update_member_stats(&mut self, player_id: &str, delta: &MemberStats) -> Result<(), SquadError> {
        let slot = self
            .stats
            .get_mut(player_id)
            .ok_or_else(|| SquadError::NotInSquad(player_id.to_string()))?;
        slot.add(delta);
        Ok(())
    }

    /// One member's counters.
    pub fn member_stats(&self, player_id: &str) -> Option<MemberStats> {
        self.stats.get(player_id).copied()
    }

    /// Totals and per-member averages over current members.
    pub fn stats(&self) -> SquadStats {
        let mut out = SquadStats {
            member_count: self.members.len(),
            ..Default::default()
        };

        for (id, s) in &self.stats {
            if !self.members.contains_key(id) {
                continue;
            }
            out.total_kills += s.kills;
            out.total_deaths += s.deaths;
            out.total_wins += s.wins;
            out.total_playtime_secs += s.playtime_secs;
        }

        if out.member_count > 0 {
            let n = out.member_count as f64;
            out.avg_kills = out.total_kills as f64 / n;
            out.avg_deaths = out.total_deaths as f64 / n;
            out.avg_wins = out.total_wins as f64 / n;
            out.avg_playtime_secs = out.total_playtime_secs as f64 / n;
        }

        out
    }

    /// Current leader.
    pub fn leader(&self) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, m)| m.is_leader)
            .map(|(id, _)| id.as_str())
    }

    /// Member record.
    pub fn member(&self, player_id: &str) -> Option<&SquadMember> {
        self.members.get(player_id)
    }

    /// All members, ordered by player ID.
    pub fn members(&self) -> impl Iterator<Item = (&str, &SquadMember)> {
        self.members.iter().map(|(id, m)| (id.as_str(), m))
    }

    /// Player IDs with a pending invite.
    pub fn pending_invites(&self) -> impl Iterator<Item = &str> {
        self.invites.keys().map(String::as_str)
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the player is a member.
    pub fn is_member(&self, player_id: &str) -> bool {
        self.members.contains_key(player_id)
    }

    /// Whether the player has a pending invite.
    pub fn has_invite(&self, player_id: &str) -> bool {
        self.invites.contains_key(player_id)
    }

    /// Whether no slot is free.
    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_SQUAD_SIZE
    }

    /// Whether everyone has left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
