pub mod error;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use error::CryptoError;
pub use hashing::{hash, hash_fields, merkle_root, Hash};
pub use keys::{KeyPair, PublicKey, KEY_LEN};
pub use signing::{sign, verify, Signature, ATTESTATION_CONTEXT, SIGNATURE_LEN};
