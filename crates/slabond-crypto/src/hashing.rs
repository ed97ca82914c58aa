/// BLAKE3 hash (32 bytes).
pub type Hash = [u8; 32];

/// Hash arbitrary data using BLAKE3.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Hash an ordered list of fields with length prefixes.
///
/// Each field is written as `u32 big-endian length || bytes`, so
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_fields(fields: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(&(field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    *hasher.finalize().as_bytes()
}

/// Hash two nodes into their parent.
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    hash(&combined)
}

/// Compute the Merkle root of a list of hashes.
/// Returns the single root hash. If the input is empty, returns a zero hash.
/// If the input has one element, returns that element.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                // Odd element: hash it with itself
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
    }

    level[0]
}
