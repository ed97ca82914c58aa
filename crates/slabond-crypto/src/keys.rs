//! Time-authority keys.
//!
//! A time authority attests proof hashes with an Ed25519 key. Nodes persist
//! only the 32-byte seed, hex-encoded in their configuration, so a restart
//! keeps the same authority identity.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Length of an authority seed and of its public key.
pub const KEY_LEN: usize = 32;

/// Signing key of a time authority. The seed is wiped on drop.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Fresh authority key from OS entropy.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut seed: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: bytes.len(),
                })?;
        let keypair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(keypair)
    }

    /// Parse a configured seed, with or without a `0x` prefix.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(seed_hex.trim().trim_start_matches("0x"))
            .map_err(|e| CryptoError::InvalidInput(format!("authority seed is not hex: {}", e)))?;
        let keypair = Self::from_bytes(&bytes);
        bytes.zeroize();
        keypair
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("authority", &self.public_key().fingerprint())
            .finish_non_exhaustive()
    }
}

/// Public half of an authority key, as configured on verifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        let verifying_key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid authority key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key_hex.trim_start_matches("0x"))
            .map_err(|e| CryptoError::InvalidInput(format!("authority key is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.verifying_key.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Short label for logs: the first 8 bytes of the key's BLAKE3 hash.
    pub fn fingerprint(&self) -> String {
        hex::encode(&crate::hash(self.as_bytes())[..8])
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
