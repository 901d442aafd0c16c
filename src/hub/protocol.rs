//! Hub Wire Protocol
//!
//! JSON frames exchanged over the hub's WebSocket endpoint.
//! Announcements are fire-and-forget; queries and lookups get exactly one
//! response frame each.

use serde::{Deserialize, Serialize};

use crate::hub::registry::{PlayerLookup, ServerFilter, ServerRecord};

// =============================================================================
// CLIENT -> HUB
// =============================================================================

/// Frames sent to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubRequest {
    /// Game server state push. No response.
    Announce {
        /// The server's current record.
        record: ServerRecord,
    },

    /// List fresh servers.
    Query {
        /// Optional predicates.
        #[serde(default)]
        filter: Option<ServerFilter>,
    },

    /// Find the server a player is on.
    LookupPlayer {
        /// Player to look up.
        player_id: String,
    },

    /// Latency check.
    Ping {
        /// Client timestamp echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// HUB -> CLIENT
// =============================================================================

/// Frames sent by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubResponse {
    /// Query result.
    Servers {
        /// Matching fresh records.
        servers: Vec<ServerRecord>,
    },

    /// Lookup result.
    Player(PlayerLookup),

    /// Pong response.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Hub wall clock (ms since epoch).
        server_time: u64,
    },

    /// Request rejected.
    Error(HubErrorFrame),
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubErrorFrame {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Well-formed request with invalid arguments (HTTP 400 equivalent).
    BadRequest,
    /// Frame could not be parsed.
    InvalidInput,
    /// Connection limit reached.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl HubResponse {
    /// Build an error frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        HubResponse::Error(HubErrorFrame {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl HubRequest {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl HubResponse {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::registry::Region;

    #[test]
    fn test_announce_from_game_server_json() {
        // Game servers don't send a timestamp; the hub stamps one.
        let json = r#"{
            "type": "announce",
            "record": {
                "name": "s1",
                "address": "10.0.0.5:7777",
                "region": "us-east",
                "genre": "scifi",
                "current_players": 1,
                "max_players": 8,
                "players": ["p1"]
            }
        }"#;

        match HubRequest::from_json(json).unwrap() {
            HubRequest::Announce { record } => {
                assert_eq!(record.region, Region::UsEast);
                assert_eq!(record.players.unwrap().len(), 1);
            }
            other => panic!("Wrong request type: {:?}", other),
        }
    }

    #[test]
    fn test_query_without_filter() {
        let parsed = HubRequest::from_json(r#"{"type":"query"}"#).unwrap();
        assert!(matches!(parsed, HubRequest::Query { filter: None }));
    }

    #[test]
    fn test_lookup_response_shape() {
        let msg = HubResponse::Player(PlayerLookup {
            online: true,
            server_name: Some("s1".into()),
            server_address: Some("10.0.0.5:7777".into()),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"player\""));
        assert!(json.contains("\"online\":true"));
    }

    #[test]
    fn test_error_codes() {
        let json = HubResponse::error(ErrorCode::BadRequest, "player_id required").to_json().unwrap();
        assert!(json.contains("bad_request"));
    }
}
