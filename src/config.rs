//! Runtime Configuration
//!
//! Tunables for the hub, the wire server, the matchmaker and announcers.
//! Every config has a `Default` and a `from_env()` that overrides fields
//! from `SKIRMISH_*` environment variables (durations in whole seconds).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable present but not parseable.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Environment variable name.
        var: &'static str,
        /// Raw value found.
        value: String,
    },

    /// Mode rule with min > max or min == 0.
    #[error("invalid rule for mode {mode}: min {min}, max {max}")]
    InvalidModeRule {
        /// Mode name.
        mode: String,
        /// Minimum players.
        min: usize,
        /// Maximum players.
        max: usize,
    },
}

fn env_secs(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// HUB
// =============================================================================

/// Registry timing.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// A record not re-announced within this window is stale.
    pub stale_timeout: Duration,
    /// How often the eviction sweep runs.
    pub cleanup_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl HubConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            stale_timeout: env_secs("SKIRMISH_STALE_TIMEOUT", defaults.stale_timeout)?,
            cleanup_interval: env_secs("SKIRMISH_CLEANUP_INTERVAL", defaults.cleanup_interval)?,
        })
    }
}

/// Wire server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7420)),
            max_connections: 1000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("SKIRMISH_BIND_ADDR") {
            config.bind_addr = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var: "SKIRMISH_BIND_ADDR", value })?;
        }
        if let Ok(value) = std::env::var("SKIRMISH_MAX_CONNECTIONS") {
            config.max_connections = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var: "SKIRMISH_MAX_CONNECTIONS", value })?;
        }
        Ok(config)
    }
}

// =============================================================================
// MATCHMAKING
// =============================================================================

/// Group size bounds for one game mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRules {
    /// Smallest group that can start a match.
    pub min_players: usize,
    /// Largest group taken in one match.
    pub max_players: usize,
}

impl ModeRules {
    /// Create rules, rejecting empty or inverted ranges.
    pub fn new(mode: &str, min_players: usize, max_players: usize) -> Result<Self, ConfigError> {
        if min_players == 0 || min_players > max_players {
            return Err(ConfigError::InvalidModeRule {
                mode: mode.to_string(),
                min: min_players,
                max: max_players,
            });
        }
        Ok(Self { min_players, max_players })
    }
}

impl Default for ModeRules {
    fn default() -> Self {
        Self { min_players: 2, max_players: 8 }
    }
}

/// Matchmaker timing and per-mode rules.
#[derive(Debug, Clone)]
pub struct MatchmakerConfig {
    /// Period of the match-attempt tick.
    pub match_interval: Duration,
    /// Period of the expiry sweep.
    pub expiry_interval: Duration,
    /// Entries older than this are dropped.
    pub queue_timeout: Duration,
    /// Rules per mode name.
    pub modes: BTreeMap<String, ModeRules>,
    /// Rules for modes not listed in `modes`.
    pub default_rules: ModeRules,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        let mut modes = BTreeMap::new();
        modes.insert("FFA".to_string(), ModeRules { min_players: 2, max_players: 8 });
        modes.insert("TDM".to_string(), ModeRules { min_players: 4, max_players: 12 });
        modes.insert("DUEL".to_string(), ModeRules { min_players: 2, max_players: 2 });

        Self {
            match_interval: Duration::from_secs(2),
            expiry_interval: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(120),
            modes,
            default_rules: ModeRules::default(),
        }
    }
}

impl MatchmakerConfig {
    /// Create config from environment variables.
    ///
    /// `SKIRMISH_MODES` takes `NAME:MIN-MAX` pairs separated by commas, e.g.
    /// `FFA:2-8,DUEL:2-2`, and replaces the default mode table.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let modes = match std::env::var("SKIRMISH_MODES") {
            Ok(value) => parse_modes(&value)
                .ok_or_else(|| ConfigError::InvalidValue { var: "SKIRMISH_MODES", value: value.clone() })??,
            Err(_) => defaults.modes,
        };

        Ok(Self {
            match_interval: env_secs("SKIRMISH_MATCH_INTERVAL", defaults.match_interval)?,
            expiry_interval: env_secs("SKIRMISH_EXPIRY_INTERVAL", defaults.expiry_interval)?,
            queue_timeout: env_secs("SKIRMISH_QUEUE_TIMEOUT", defaults.queue_timeout)?,
            modes,
            default_rules: defaults.default_rules,
        })
    }

    /// Rules for a mode, falling back to `default_rules`.
    pub fn rules_for(&self, mode: &str) -> ModeRules {
        self.modes.get(mode).copied().unwrap_or(self.default_rules)
    }
}

/// Outer `None` means the text is malformed; inner error means a bad range.
fn parse_modes(value: &str) -> Option<Result<BTreeMap<String, ModeRules>, ConfigError>> {
    let mut modes = BTreeMap::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, range) = item.split_once(':')?;
        let (min, max) = range.split_once('-')?;
        let min: usize = min.trim().parse().ok()?;
        let max: usize = max.trim().parse().ok()?;
        let name = name.trim();
        match ModeRules::new(name, min, max) {
            Ok(rules) => {
                modes.insert(name.to_string(), rules);
            }
            Err(e) => return Some(Err(e)),
        }
    }
    Some(Ok(modes))
}

// =============================================================================
// ANNOUNCER
// =============================================================================

/// Client-side announcer configuration.
#[derive(Debug, Clone)]
pub struct AnnouncerConfig {
    /// Hub WebSocket URL.
    pub hub_url: String,
    /// Time between announcements.
    pub interval: Duration,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:7420".to_string(),
            interval: Duration::from_secs(5),
        }
    }
}

impl AnnouncerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            hub_url: std::env::var("SKIRMISH_HUB_URL").unwrap_or(defaults.hub_url),
            interval: env_secs("SKIRMISH_ANNOUNCE_INTERVAL", defaults.interval)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modes() {
        let config = MatchmakerConfig::default();
        assert_eq!(config.rules_for("FFA"), ModeRules { min_players: 2, max_players: 8 });
        assert_eq!(config.rules_for("DUEL").max_players, 2);
        assert_eq!(config.rules_for("capture"), ModeRules::default());
    }

    #[test]
    fn test_parse_modes() {
        let modes = parse_modes("FFA:2-6, DUEL:2-2").unwrap().unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes["FFA"].max_players, 6);

        assert!(parse_modes("FFA=2-6").is_none());
        assert!(matches!(
            parse_modes("FFA:5-2"),
            Some(Err(ConfigError::InvalidModeRule { .. }))
        ));
    }

    #[test]
    fn test_mode_rules_reject_zero() {
        assert!(ModeRules::new("x", 0, 4).is_err());
        assert!(ModeRules::new("x", 3, 3).is_ok());
    }

    #[test]
    fn test_hub_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.stale_timeout, Duration::from_secs(30));
        assert!(config.cleanup_interval < config.stale_timeout);
    }
}
