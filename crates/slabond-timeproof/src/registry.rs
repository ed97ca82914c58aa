use dashmap::{DashMap, DashSet};
use slabond_core::{Address, Clock, Digest, EngineConfig, ItemId};
use slabond_ledger::ChainView;
use std::sync::Arc;

use crate::attestation::{AttestationVerifier, Attestor};
use crate::error::TimeProofError;
use crate::types::{
    EventKind, ProofNonce, ProofRequest, TimeProof, VerificationCheck, VerificationResult,
};

/// Tunables of proof generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofSettings {
    /// Accepted distance (seconds) between attested and commit time.
    pub skew_tolerance: i64,
    /// Number of block hashes in a proof path.
    pub depth: usize,
}

impl Default for ProofSettings {
    fn default() -> Self {
        Self {
            skew_tolerance: 300,
            depth: 8,
        }
    }
}

impl From<&EngineConfig> for ProofSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            skew_tolerance: config.clock_skew_tolerance_secs,
            depth: config.proof_depth.max(1),
        }
    }
}

/// Generates, stores and verifies time-proofs.
pub struct TimeProofRegistry {
    chain: Arc<dyn ChainView>,
    clock: Arc<dyn Clock>,
    attestor: Arc<dyn Attestor>,
    verifier: Arc<dyn AttestationVerifier>,
    settings: ProofSettings,
    /// Authorized time authorities.
    authorities: DashSet<Address>,
    /// Every nonce ever consumed.
    nonces: DashSet<ProofNonce>,
    proofs: DashMap<Digest, TimeProof>,
}

impl TimeProofRegistry {
    pub fn new(
        chain: Arc<dyn ChainView>,
        clock: Arc<dyn Clock>,
        attestor: Arc<dyn Attestor>,
        verifier: Arc<dyn AttestationVerifier>,
        settings: ProofSettings,
    ) -> Self {
        Self {
            chain,
            clock,
            attestor,
            verifier,
            settings,
            authorities: DashSet::new(),
            nonces: DashSet::new(),
            proofs: DashMap::new(),
        }
    }

    pub fn authorize(&self, authority: Address) {
        tracing::info!(authority = %authority, "Time authority authorized");
        self.authorities.insert(authority);
    }

    pub fn revoke(&self, authority: &Address) -> bool {
        let removed = self.authorities.remove(authority).is_some();
        if removed {
            tracing::info!(authority = %authority, "Time authority revoked");
        }
        removed
    }

    pub fn is_authorized(&self, authority: &Address) -> bool {
        self.authorities.contains(authority)
    }

    pub fn get(&self, proof_hash: &Digest) -> Option<TimeProof> {
        self.proofs.get(proof_hash).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    /// Deterministic hash over the proof's identifying fields.
    pub fn proof_hash(
        subject_id: &ItemId,
        event_kind: EventKind,
        commit_time: i64,
        commit_sequence: u64,
        requester: &Address,
        attested_time: i64,
        nonce: &ProofNonce,
    ) -> Digest {
        slabond_crypto::hash_fields(&[
            subject_id.as_str().as_bytes(),
            event_kind.as_str().as_bytes(),
            &commit_time.to_be_bytes(),
            &commit_sequence.to_be_bytes(),
            requester.as_bytes(),
            &attested_time.to_be_bytes(),
            nonce.as_bytes(),
        ])
    }

    /// Record a new, unverified time-proof and return its hash.
    pub fn generate(&self, request: ProofRequest) -> Result<Digest, TimeProofError> {
        if !self.is_authorized(&request.requester) {
            return Err(TimeProofError::Unauthorized(request.requester));
        }
        if self.nonces.contains(&request.nonce) {
            return Err(TimeProofError::Replay(request.nonce));
        }

        let commit_time = self.clock.now();
        let tolerance = u64::try_from(self.settings.skew_tolerance).unwrap_or(0);
        if request.attested_time.abs_diff(commit_time) > tolerance {
            return Err(TimeProofError::ClockSkew {
                attested: request.attested_time,
                commit: commit_time,
                tolerance: self.settings.skew_tolerance,
            });
        }
        if request.certificate_chain.is_empty() {
            return Err(TimeProofError::EmptyChain);
        }

        let block = self.chain.head();
        let proof_hash = Self::proof_hash(
            &request.subject_id,
            request.event_kind,
            commit_time,
            block.height,
            &request.requester,
            request.attested_time,
            &request.nonce,
        );
        let proof_path = self.build_path(block.height, &proof_hash);
        let attestation = self.attestor.attest(&proof_hash)?;

        // Consume the nonce last so a rejected request leaves it usable.
        if !self.nonces.insert(request.nonce) {
            return Err(TimeProofError::Replay(request.nonce));
        }

        tracing::info!(
            proof = %hex::encode(&proof_hash[..8]),
            subject = %request.subject_id,
            kind = %request.event_kind,
            height = block.height,
            "Time-proof generated"
        );

        self.proofs.insert(
            proof_hash,
            TimeProof {
                proof_hash,
                subject_id: request.subject_id,
                event_kind: request.event_kind,
                requester: request.requester,
                attested_time: request.attested_time,
                commit_time,
                block,
                proof_path,
                attestation,
                certificate_chain: request.certificate_chain,
                nonce: request.nonce,
                verification: None,
            },
        );
        Ok(proof_hash)
    }

    /// Verify a recorded proof. The first result is cached on the record.
    pub fn verify(&self, proof_hash: &Digest) -> Result<VerificationResult, TimeProofError> {
        let mut entry = self
            .proofs
            .get_mut(proof_hash)
            .ok_or_else(|| TimeProofError::NotFound(hex::encode(proof_hash)))?;

        if let Some(cached) = &entry.verification {
            return Ok(cached.clone());
        }

        let result = self.run_checks(&entry);
        tracing::info!(
            proof = %hex::encode(&proof_hash[..8]),
            valid = result.valid,
            "Time-proof verified"
        );
        entry.verification = Some(result.clone());
        Ok(result)
    }

    fn run_checks(&self, proof: &TimeProof) -> VerificationResult {
        let head = self.chain.head();
        let anchored = self.chain.block(proof.block.height);

        // Check 1: the referenced ledger position exists and is not in the future.
        let position_ok = anchored.is_some_and(|b| b.hash == proof.block.hash)
            && proof.block.height <= head.height
            && proof.block.timestamp <= self.clock.now();
        let position = VerificationCheck::new("ledger_position", position_ok, || {
            format!(
                "block {} is unknown, reorganised or ahead of head {}",
                proof.block.height, head.height
            )
        });

        // Check 2: the proof path is non-empty and binds the proof to that block.
        let path_ok = match (proof.proof_path.first(), proof.proof_path.last()) {
            (Some(first), Some(root)) if proof.proof_path.len() >= 2 => {
                let blocks = &proof.proof_path[..proof.proof_path.len() - 1];
                let mut leaves = Vec::with_capacity(blocks.len() + 1);
                leaves.push(proof.proof_hash);
                leaves.extend_from_slice(blocks);
                Some(*first) == anchored.map(|b| b.hash)
                    && *root == slabond_crypto::merkle_root(&leaves)
            }
            _ => false,
        };
        let path = VerificationCheck::new("proof_path", path_ok, || {
            "proof path is empty or does not match ledger history".into()
        });

        // Check 3: the attestation is present and verifies.
        let attestation_result = if proof.attestation.is_empty() {
            Err(TimeProofError::Attestation("attestation is empty".into()))
        } else {
            self.verifier.verify(&proof.proof_hash, &proof.attestation)
        };
        let attestation = VerificationCheck::new(
            "attestation",
            attestation_result.is_ok(),
            || match &attestation_result {
                Err(err) => err.to_string(),
                Ok(()) => String::new(),
            },
        );

        // Check 4: the certificate chain is present and has no empty entries.
        let chain_ok = !proof.certificate_chain.is_empty()
            && proof.certificate_chain.iter().all(|cert| !cert.is_empty());
        let chain = VerificationCheck::new("certificate_chain", chain_ok, || {
            "certificate chain is empty or holds an empty certificate".into()
        });

        VerificationResult::from_checks(vec![position, path, attestation, chain])
    }

    fn build_path(&self, height: u64, proof_hash: &Digest) -> Vec<Digest> {
        let mut path: Vec<Digest> = (0..self.settings.depth as u64)
            .map_while(|back| height.checked_sub(back))
            .filter_map(|h| self.chain.block(h))
            .map(|b| b.hash)
            .collect();

        let mut leaves = Vec::with_capacity(path.len() + 1);
        leaves.push(*proof_hash);
        leaves.extend_from_slice(&path);
        path.push(slabond_crypto::merkle_root(&leaves));
        path
    }
}

/// Stamps engine transitions using the engine's own time authority.
pub struct TimeStamper {
    registry: Arc<TimeProofRegistry>,
    authority: Address,
    certificate_chain: Vec<Vec<u8>>,
}

impl TimeStamper {
    /// Authorizes `authority` on the registry.
    pub fn new(
        registry: Arc<TimeProofRegistry>,
        authority: Address,
        certificate_chain: Vec<Vec<u8>>,
    ) -> Self {
        registry.authorize(authority);
        Self {
            registry,
            authority,
            certificate_chain,
        }
    }

    pub fn registry(&self) -> &Arc<TimeProofRegistry> {
        &self.registry
    }

    /// Generate a proof for `kind` happening to `subject` now.
    pub fn stamp(
        &self,
        subject: &ItemId,
        kind: EventKind,
        now: i64,
    ) -> Result<Digest, TimeProofError> {
        self.registry.generate(ProofRequest {
            subject_id: subject.clone(),
            event_kind: kind,
            requester: self.authority,
            attested_time: now,
            certificate_chain: self.certificate_chain.clone(),
            nonce: ProofNonce::random(),
        })
    }
}
