//! Chat Encryption
//!
//! Symmetric squad keys and the AEAD used for chat payloads. Wire layout of
//! an encrypted payload: `nonce (12) || ciphertext || tag (16)`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::ChatError;

/// Key size for ChaCha20-Poly1305
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Tag size for ChaCha20-Poly1305
pub const TAG_SIZE: usize = 16;

/// Shared secret of one squad channel.
#[derive(Clone, PartialEq, Eq)]
pub struct SquadKey([u8; KEY_SIZE]);

impl SquadKey {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Key from raw bytes. Anything but 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChatError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| ChatError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short hex digest for logs; never reveals the key itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for SquadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SquadKey({})", self.fingerprint())
    }
}

/// Symmetric cipher for chat payloads.
pub trait ChatCipher: Send + Sync {
    /// Encrypt `plaintext` under `key`.
    fn encrypt(&self, key: &SquadKey, plaintext: &[u8]) -> Result<Vec<u8>, ChatError>;

    /// Decrypt a payload produced by [`ChatCipher::encrypt`].
    fn decrypt(&self, key: &SquadKey, payload: &[u8]) -> Result<Vec<u8>, ChatError>;
}

/// ChaCha20-Poly1305 with a random nonce per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaCipher;

impl ChatCipher for ChaChaCipher {
    fn encrypt(&self, key: &SquadKey, plaintext: &[u8]) -> Result<Vec<u8>, ChatError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| ChatError::EncryptionFailed)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ChatError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &SquadKey, payload: &[u8]) -> Result<Vec<u8>, ChatError> {
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChatError::DecryptionFailed);
        }
        let (nonce, sealed) = payload.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| ChatError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| ChatError::DecryptionFailed)
    }
}
