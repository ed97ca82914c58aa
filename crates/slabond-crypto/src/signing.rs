//! Context-bound Ed25519 signatures.
//!
//! Messages are never signed raw. Each signature covers
//! `hash_fields([context, message])`, so an attestation over a proof hash
//! cannot be presented as a signature for any other purpose.

use ed25519_dalek::{Signer, Verifier};

use crate::error::CryptoError;
use crate::hashing::{hash_fields, Hash};
use crate::keys::{KeyPair, PublicKey};

/// Context under which time authorities attest proof hashes.
pub const ATTESTATION_CONTEXT: &[u8] = b"slabond/time-proof/attestation/v1";

/// Length of an encoded signature.
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.inner.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&raw),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

fn bind(context: &[u8], message: &[u8]) -> Hash {
    hash_fields(&[context, message])
}

/// Sign `message` under `context`.
pub fn sign(context: &[u8], message: &[u8], keypair: &KeyPair) -> Signature {
    Signature {
        inner: keypair.signing_key().sign(&bind(context, message)),
    }
}

/// Check a signature made by [`sign`] with the same context.
pub fn verify(
    context: &[u8],
    message: &[u8],
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), CryptoError> {
    pubkey
        .verifying_key()
        .verify(&bind(context, message), &signature.inner)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
