//! # Skirmish Core
//!
//! Server directory, matchmaking and squad coordination for Skirmish.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SKIRMISH CORE                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  hub/            - Server directory                          │
//! │  ├── registry.rs - Records, filters, player index, sweeper   │
//! │  ├── protocol.rs - JSON wire messages                        │
//! │  ├── server.rs   - WebSocket front end                       │
//! │  └── announcer.rs- Periodic announcements from game servers  │
//! │                                                              │
//! │  matchmaking/    - Queues and match formation                │
//! │  ├── queue.rs    - Per-mode FIFO queues                      │
//! │  └── matchmaker.rs - Match and expiry loops                  │
//! │                                                              │
//! │  squad/          - Persistent player groups                  │
//! │  ├── state.rs    - Membership, leadership, stats             │
//! │  └── manager.rs  - Squad set and JSON persistence            │
//! │                                                              │
//! │  chat/           - Encrypted squad chat                      │
//! │  ├── cipher.rs   - Squad keys, ChaCha20-Poly1305             │
//! │  ├── relay.rs    - Relay transport                           │
//! │  ├── channel.rs  - Per-squad message stream                  │
//! │  └── manager.rs  - Local player's channels                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every component is an owned object guarding its state with a tokio
//! `RwLock`. Background loops (hub sweeper, match and expiry ticks) run on
//! `tokio::time::interval` and stop through `stop()`, letting an in-flight
//! tick finish. No component holds its lock while calling into another.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod chat;
pub mod config;
pub mod hub;
pub mod matchmaking;
pub mod shutdown;
pub mod squad;

// Re-export commonly used types
pub use chat::{ChatError, SquadChatChannel, SquadChatManager, SquadKey};
pub use config::{AnnouncerConfig, ConfigError, HubConfig, MatchmakerConfig, ServerConfig};
pub use hub::{Announcer, Hub, HubError, HubServer, Region, ServerFilter, ServerRecord};
pub use matchmaking::{MatchResult, Matchmaker, MatchmakingError};
pub use shutdown::Shutdown;
pub use squad::{Squad, SquadError, SquadManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
