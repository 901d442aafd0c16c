//! Squad Chat
//!
//! End-to-end encrypted squad messaging:
//! - `cipher`: squad keys and the payload AEAD
//! - `relay`: transport seam plus an in-process relay
//! - `channel`: one squad's message stream
//! - `manager`: the local player's channels

pub mod channel;
pub mod cipher;
pub mod manager;
pub mod relay;

pub use channel::{channel_identity, squad_address, ChannelInbox, ChatMessage, DecryptFailureHook, SquadChatChannel};
pub use cipher::{ChaChaCipher, ChatCipher, SquadKey};
pub use manager::SquadChatManager;
pub use relay::{MemoryRelay, MemoryRelayClient, RelayClient, RelayError, RelayMessage};

/// Chat errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Key material is not 32 bytes.
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Payload could not be authenticated or decrypted.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Message body is empty.
    #[error("message must not be empty")]
    EmptyMessage,

    /// Message could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Squad already has a channel.
    #[error("chat channel for squad {0} already exists")]
    ChannelExists(String),

    /// Local player does not belong to the squad.
    #[error("player {player_id} is not in squad {squad_id}")]
    NotInSquad {
        /// Player identifier.
        player_id: String,
        /// Squad identifier.
        squad_id: String,
    },

    /// Message signed as someone other than the channel's local player.
    #[error("channel speaks for {expected}, not {got}")]
    SenderMismatch {
        /// Local player of the channel.
        expected: String,
        /// Sender that was passed in.
        got: String,
    },

    /// Relay failure.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}
