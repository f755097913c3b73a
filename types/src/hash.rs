//! Hash types for transactions and blocks.

use alloy_primitives::B256;

/// A 32-byte transaction hash.
pub type TxHash = B256;

/// A 32-byte block hash.
pub type BlockHash = B256;

/// Lowercase `0x`-prefixed rendering used inside store keys.
pub fn hash_key(hash: &B256) -> String {
    format!("{hash:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_lowercase_and_prefixed() {
        let hash = B256::repeat_byte(0xAB);
        let key = hash_key(&hash);
        assert!(key.starts_with("0x"));
        assert_eq!(key.len(), 66);
        assert_eq!(key, key.to_lowercase());
    }
}
