use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CoreError;

/// Seconds since the UNIX epoch. All ledger timestamps use this unit.
pub type UnixSeconds = i64;

/// BLAKE3 / ledger hash (32 bytes).
pub type Digest = [u8; 32];

fn decode_hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], CoreError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed)
        .map_err(|e| CoreError::InvalidIdentifier(format!("bad hex '{}': {}", s, e)))?;
    bytes.as_slice().try_into().map_err(|_| {
        CoreError::InvalidIdentifier(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

/// A ledger account / principal identity (20 bytes, rendered as `0x`-hex).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create from raw bytes (must be exactly 20 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| {
            CoreError::InvalidIdentifier(format!("address must be 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Derive a stable address from a human label (first 20 bytes of BLAKE3).
    ///
    /// Used for operator identities named in configuration and in tests.
    pub fn from_label(label: &str) -> Self {
        let digest = blake3::hash(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        Self(out)
    }

    /// Parse a `0x`-prefixed (or bare) hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_hex_fixed::<20>(s).map(Self)
    }

    /// Lowercase `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier of a guarantee (32 bytes, rendered as `0x`-hex).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuaranteeId(pub [u8; 32]);

impl GuaranteeId {
    /// Create a new random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Create from raw bytes (must be exactly 32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::InvalidIdentifier(format!(
                "guarantee id must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parse a `0x`-prefixed (or bare) hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_hex_fixed::<32>(s).map(Self)
    }

    /// Lowercase `0x`-prefixed hex encoding.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..6]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for GuaranteeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for GuaranteeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuaranteeId({})", self.short())
    }
}

impl Serialize for GuaranteeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GuaranteeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of the tracked item (shipment, job, ...) a guarantee covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset in which escrow is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Denomination {
    /// The ledger's native asset.
    #[default]
    Native,
    /// A token contract on the ledger.
    Token(Address),
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denomination::Native => write!(f, "native"),
            Denomination::Token(addr) => write!(f, "token:{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_label("alice");
        let parsed = Address::from_hex(&addr.to_hex()).unwrap();
        assert_eq!(addr, parsed);
        assert!(addr.to_hex().starts_with("0x"));
        assert_eq!(addr.to_hex().len(), 42);
    }

    #[test]
    fn test_address_from_label_is_stable() {
        assert_eq!(Address::from_label("ops"), Address::from_label("ops"));
        assert_ne!(Address::from_label("ops"), Address::from_label("admin"));
    }

    #[test]
    fn test_address_wrong_length() {
        assert!(Address::from_bytes(&[1u8; 19]).is_err());
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn test_guarantee_id_random_unique() {
        assert_ne!(GuaranteeId::random(), GuaranteeId::random());
    }

    #[test]
    fn test_guarantee_id_serde_as_hex_string() {
        let id = GuaranteeId([7u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "07".repeat(32)));
        let back: GuaranteeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_guarantee_id_rejects_bad_hex() {
        assert!(GuaranteeId::from_hex("0xzz").is_err());
        assert!(serde_json::from_str::<GuaranteeId>("\"0x0102\"").is_err());
    }

    #[test]
    fn test_denomination_display() {
        assert_eq!(Denomination::Native.to_string(), "native");
        let token = Denomination::Token(Address([0u8; 20]));
        assert!(token.to_string().starts_with("token:0x"));
    }
}
