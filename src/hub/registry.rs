//! Server Registry
//!
//! Time-windowed directory of game-server announcements.
//!
//! A record lives as long as its server keeps announcing: once
//! `now - last_announced > stale_timeout` it is invisible to queries and
//! lookups, and the next sweep removes it together with its player index
//! entries.
//!
//! Both maps sit behind a single `RwLock`. Announce and sweep are writers,
//! query and lookup are readers. Two announces for the same name are
//! last-write-wins.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::shutdown::Shutdown;

// =============================================================================
// REGION
// =============================================================================

/// Hosting region of a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[derive(Default)]
pub enum Region {
    /// US East.
    UsEast,
    /// US West.
    UsWest,
    /// Western Europe.
    EuWest,
    /// Central Europe.
    EuCentral,
    /// Asia-Pacific.
    AsiaPacific,
    /// South America.
    SouthAmerica,
    /// Anything not recognised.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Region {
    /// Wire name of the region.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::UsEast => "us-east",
            Region::UsWest => "us-west",
            Region::EuWest => "eu-west",
            Region::EuCentral => "eu-central",
            Region::AsiaPacific => "asia-pacific",
            Region::SouthAmerica => "south-america",
            Region::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognised names map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "us-east" => Region::UsEast,
            "us-west" => Region::UsWest,
            "eu-west" => Region::EuWest,
            "eu-central" => Region::EuCentral,
            "asia-pacific" => Region::AsiaPacific,
            "south-america" => Region::SouthAmerica,
            _ => Region::Unknown,
        })
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// One game server's announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Unique server name.
    pub name: String,
    /// Address clients connect to.
    pub address: String,
    /// Hosting region.
    #[serde(default)]
    pub region: Region,
    /// Game genre served.
    pub genre: String,
    /// Players currently connected.
    pub current_players: u32,
    /// Player capacity.
    pub max_players: u32,
    /// IDs of connected players, if the server reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<BTreeSet<String>>,
    /// Stamped by the hub when the announcement is received.
    #[serde(default = "Utc::now")]
    pub last_announced: DateTime<Utc>,
}

impl ServerRecord {
    /// Create a record with no player list.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        region: Region,
        genre: impl Into<String>,
        current_players: u32,
        max_players: u32,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            region,
            genre: genre.into(),
            current_players,
            max_players,
            players: None,
            last_announced: Utc::now(),
        }
    }

    /// Attach a player list; also sets `current_players` to its size.
    pub fn with_players<I, S>(mut self, players: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let players: BTreeSet<String> = players.into_iter().map(Into::into).collect();
        self.current_players = players.len() as u32;
        self.players = Some(players);
        self
    }

    /// Remaining capacity.
    pub fn free_slots(&self) -> u32 {
        self.max_players.saturating_sub(self.current_players)
    }

    fn is_fresh(&self, now: DateTime<Utc>, stale_timeout: chrono::Duration) -> bool {
        now - self.last_announced <= stale_timeout
    }
}

/// Query predicates, all optional and ANDed together.
///
/// `min_players` and `max_players` both compare against the server's
/// *current* player count. In particular `max_players` filters on
/// occupancy, not on remaining capacity; use [`ServerRecord::free_slots`]
/// for capacity checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFilter {
    /// Required region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    /// Required genre.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Minimum current players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_players: Option<u32>,
    /// Maximum current players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
}

impl ServerFilter {
    /// Filter by region and genre only.
    pub fn region_genre(region: Region, genre: impl Into<String>) -> Self {
        Self {
            region: Some(region),
            genre: Some(genre.into()),
            ..Default::default()
        }
    }

    /// Whether a record satisfies every present predicate.
    pub fn matches(&self, record: &ServerRecord) -> bool {
        if let Some(region) = self.region {
            if record.region != region {
                return false;
            }
        }
        if let Some(genre) = &self.genre {
            if &record.genre != genre {
                return false;
            }
        }
        if let Some(min) = self.min_players {
            if record.current_players < min {
                return false;
            }
        }
        if let Some(max) = self.max_players {
            if record.current_players > max {
                return false;
            }
        }
        true
    }
}

/// Result of a player lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLookup {
    /// Whether the player is on a fresh server.
    pub online: bool,
    /// Server name, when online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Server address, when online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_address: Option<String>,
}

impl PlayerLookup {
    fn offline() -> Self {
        Self::default()
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Announced record has no name.
    #[error("server name must not be empty")]
    EmptyName,

    /// Lookup with an empty player ID.
    #[error("player id must not be empty")]
    EmptyPlayerId,
}

// =============================================================================
// HUB
// =============================================================================

#[derive(Default)]
struct HubState {
    servers: BTreeMap<String, ServerRecord>,
    /// player_id -> server name
    player_index: HashMap<String, String>,
}

impl HubState {
    fn unindex(&mut self, server: &ServerRecord) {
        if let Some(players) = &server.players {
            for player_id in players {
                // Only drop entries that still point at this server.
                if self.player_index.get(player_id) == Some(&server.name) {
                    self.player_index.remove(player_id);
                }
            }
        }
    }

    fn index(&mut self, server: &ServerRecord) {
        if let Some(players) = &server.players {
            for player_id in players {
                self.player_index.insert(player_id.clone(), server.name.clone());
            }
        }
    }
}

/// The server directory.
pub struct Hub {
    config: HubConfig,
    state: RwLock<HubState>,
    shutdown: Shutdown,
}

impl Hub {
    /// Create an empty hub. Call [`Hub::start`] to run the eviction sweep.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HubState::default()),
            shutdown: Shutdown::new(),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.stale_timeout).unwrap_or(chrono::Duration::MAX)
    }

    /// Upsert a record, stamping it with the current time.
    pub async fn announce(&self, record: ServerRecord) -> Result<(), HubError> {
        self.announce_at(record, Utc::now()).await
    }

    /// Upsert a record as if received at `now`.
    pub async fn announce_at(&self, mut record: ServerRecord, now: DateTime<Utc>) -> Result<(), HubError> {
        if record.name.is_empty() {
            return Err(HubError::EmptyName);
        }
        record.last_announced = now;

        let mut state = self.state.write().await;
        if let Some(previous) = state.servers.remove(&record.name) {
            state.unindex(&previous);
        }
        state.index(&record);
        debug!(
            "Announce {} ({}/{}, {}/{})",
            record.name, record.region, record.genre, record.current_players, record.max_players
        );
        state.servers.insert(record.name.clone(), record);

        Ok(())
    }

    /// Fresh records matching the filter. Order is unspecified.
    pub async fn query(&self, filter: &ServerFilter) -> Vec<ServerRecord> {
        self.query_at(filter, Utc::now()).await
    }

    /// [`Hub::query`] evaluated at `now`.
    pub async fn query_at(&self, filter: &ServerFilter, now: DateTime<Utc>) -> Vec<ServerRecord> {
        let stale_timeout = self.stale_timeout();
        let state = self.state.read().await;
        state
            .servers
            .values()
            .filter(|r| r.is_fresh(now, stale_timeout) && filter.matches(r))
            .cloned()
            .collect()
    }

    /// Where a player is playing, if anywhere.
    pub async fn lookup_player(&self, player_id: &str) -> Result<PlayerLookup, HubError> {
        self.lookup_player_at(player_id, Utc::now()).await
    }

    /// [`Hub::lookup_player`] evaluated at `now`.
    pub async fn lookup_player_at(&self, player_id: &str, now: DateTime<Utc>) -> Result<PlayerLookup, HubError> {
        if player_id.is_empty() {
            return Err(HubError::EmptyPlayerId);
        }

        let stale_timeout = self.stale_timeout();
        let state = self.state.read().await;
        let lookup = state
            .player_index
            .get(player_id)
            .and_then(|name| state.servers.get(name))
            .filter(|server| server.is_fresh(now, stale_timeout))
            .map(|server| PlayerLookup {
                online: true,
                server_name: Some(server.name.clone()),
                server_address: Some(server.address.clone()),
            })
            .unwrap_or_else(PlayerLookup::offline);

        Ok(lookup)
    }

    /// Best fresh server for a group: most free slots, ties by name.
    pub async fn find_server(&self, genre: &str, region: Region, needed: usize) -> Option<ServerRecord> {
        self.find_server_at(genre, region, needed, Utc::now()).await
    }

    /// [`Hub::find_server`] evaluated at `now`.
    pub async fn find_server_at(
        &self,
        genre: &str,
        region: Region,
        needed: usize,
        now: DateTime<Utc>,
    ) -> Option<ServerRecord> {
        self.find_server_reserved_at(genre, region, needed, &BTreeMap::new(), now)
            .await
    }

    /// [`Hub::find_server_at`] with `reserved` slots (by server name) already
    /// promised to other groups and not yet reflected in announcements.
    pub async fn find_server_reserved_at(
        &self,
        genre: &str,
        region: Region,
        needed: usize,
        reserved: &BTreeMap<String, u32>,
        now: DateTime<Utc>,
    ) -> Option<ServerRecord> {
        let free = |r: &ServerRecord| {
            r.free_slots()
                .saturating_sub(reserved.get(&r.name).copied().unwrap_or(0))
        };

        let filter = ServerFilter::region_genre(region, genre);
        self.query_at(&filter, now)
            .await
            .into_iter()
            .filter(|r| free(r) as usize >= needed)
            .min_by(|a, b| free(b).cmp(&free(a)).then_with(|| a.name.cmp(&b.name)))
    }

    /// Number of fresh records.
    pub async fn server_count(&self) -> usize {
        self.server_count_at(Utc::now()).await
    }

    /// [`Hub::server_count`] evaluated at `now`.
    pub async fn server_count_at(&self, now: DateTime<Utc>) -> usize {
        let stale_timeout = self.stale_timeout();
        let state = self.state.read().await;
        state.servers.values().filter(|r| r.is_fresh(now, stale_timeout)).count()
    }

    /// Evict stale records. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// [`Hub::sweep`] evaluated at `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let stale_timeout = self.stale_timeout();
        let mut state = self.state.write().await;

        let stale: Vec<String> = state
            .servers
            .values()
            .filter(|r| !r.is_fresh(now, stale_timeout))
            .map(|r| r.name.clone())
            .collect();

        for name in &stale {
            if let Some(record) = state.servers.remove(name) {
                state.unindex(&record);
                warn!("Evicted stale server {} (last seen {})", name, record.last_announced);
            }
        }

        stale.len()
    }

    /// Spawn the periodic eviction sweep.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        let mut shutdown = self.shutdown.listener();

        tokio::spawn(async move {
            let mut ticker = interval(hub.config.cleanup_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Hub sweep running every {:?}", hub.config.cleanup_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = hub.sweep().await;
                        if evicted > 0 {
                            info!("Sweep evicted {} server(s)", evicted);
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }

            debug!("Hub sweep stopped");
        })
    }

    /// Signal background loops to exit after their current sweep.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}
