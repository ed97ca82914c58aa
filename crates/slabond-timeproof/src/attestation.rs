use slabond_core::Digest;
use slabond_crypto::{KeyPair, PublicKey, Signature, ATTESTATION_CONTEXT};

use crate::error::TimeProofError;

/// Produces the time authority's attestation over a proof hash.
pub trait Attestor: Send + Sync {
    fn attest(&self, proof_hash: &Digest) -> Result<Vec<u8>, TimeProofError>;
}

/// Checks an attestation produced by an [`Attestor`].
pub trait AttestationVerifier: Send + Sync {
    fn verify(&self, proof_hash: &Digest, attestation: &[u8]) -> Result<(), TimeProofError>;
}

/// Ed25519 signature over the proof hash, bound to [`ATTESTATION_CONTEXT`].
pub struct Ed25519Attestor {
    keypair: KeyPair,
}

impl Ed25519Attestor {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }
}

impl Attestor for Ed25519Attestor {
    fn attest(&self, proof_hash: &Digest) -> Result<Vec<u8>, TimeProofError> {
        Ok(slabond_crypto::sign(ATTESTATION_CONTEXT, proof_hash, &self.keypair)
            .to_bytes()
            .to_vec())
    }
}

/// Verifies Ed25519 attestations against the configured authority key.
pub struct Ed25519AttestationVerifier {
    authority: PublicKey,
}

impl Ed25519AttestationVerifier {
    pub fn new(authority: PublicKey) -> Self {
        Self { authority }
    }
}

impl AttestationVerifier for Ed25519AttestationVerifier {
    fn verify(&self, proof_hash: &Digest, attestation: &[u8]) -> Result<(), TimeProofError> {
        let signature = Signature::from_bytes(attestation)?;
        slabond_crypto::verify(ATTESTATION_CONTEXT, proof_hash, &signature, &self.authority)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_attestation() {
        let attestor = Ed25519Attestor::new(KeyPair::from_seed(&[3u8; 32]));
        let verifier = Ed25519AttestationVerifier::new(attestor.public_key());
        let hash = slabond_crypto::hash(b"proof");

        let attestation = attestor.attest(&hash).unwrap();
        assert_eq!(attestation.len(), 64);
        assert!(verifier.verify(&hash, &attestation).is_ok());
        assert!(verifier
            .verify(&slabond_crypto::hash(b"other"), &attestation)
            .is_err());
        assert!(matches!(
            verifier.verify(&hash, &[]),
            Err(TimeProofError::Attestation(_))
        ));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let attestor = Ed25519Attestor::new(KeyPair::generate());
        let verifier = Ed25519AttestationVerifier::new(KeyPair::generate().public_key());
        let hash = slabond_crypto::hash(b"proof");
        assert!(verifier.verify(&hash, &attestor.attest(&hash).unwrap()).is_err());
    }
}
