//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! This ensures deterministic, lexicographically ordered keys in RocksDB,
//! so all contracts of one chain form a contiguous range.

use alloy_primitives::Address;

/// Meta id of the last block processed by the watcher.
pub const META_HEAD_BLOCK: u8 = 0x01;

const CONTRACT_PREFIX: u8 = b'N';
const CONTRACT_KEY_LEN: usize = 29;

/// Encode the prefix shared by all contract keys of a chain.
///
/// Format: byte 'N' (0x4E) + chain_id (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_contract_prefix(chain_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(CONTRACT_KEY_LEN);
    key.push(CONTRACT_PREFIX);
    key.extend_from_slice(&chain_id.to_be_bytes());
    key
}

/// Encode a contract key.
///
/// Format: byte 'N' (0x4E) + chain_id (8 bytes, big-endian) + address (20 bytes)
/// Total length: 29 bytes
pub fn encode_contract_key(chain_id: u64, addr: Address) -> Vec<u8> {
    let mut key = encode_contract_prefix(chain_id);
    key.extend_from_slice(addr.as_slice());
    key
}

/// Decode a contract key into (chain_id, address).
pub fn decode_contract_key(key: &[u8]) -> Option<(u64, Address)> {
    if key.len() != CONTRACT_KEY_LEN || key[0] != CONTRACT_PREFIX {
        return None;
    }
    let chain_id = u64::from_be_bytes(key[1..9].try_into().ok()?);
    Some((chain_id, Address::from_slice(&key[9..])))
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_contract_key_encoding() {
        let addr = address!("0742d35cc6634c0532925a3b844bc9e7595f0beb");
        let key = encode_contract_key(84532, addr);
        assert_eq!(key.len(), 29);
        assert_eq!(key[0], b'N');
        assert_eq!(u64::from_be_bytes(key[1..9].try_into().unwrap()), 84532);
        assert_eq!(&key[9..], addr.as_slice());
        assert_eq!(decode_contract_key(&key), Some((84532, addr)));
    }

    #[test]
    fn test_contract_keys_share_chain_prefix() {
        let prefix = encode_contract_prefix(1);
        let key = encode_contract_key(1, Address::ZERO);
        assert!(key.starts_with(&prefix));
        assert!(!encode_contract_key(2, Address::ZERO).starts_with(&prefix));
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert_eq!(decode_contract_key(&encode_meta_key(META_HEAD_BLOCK)), None);
        assert_eq!(decode_contract_key(&encode_contract_prefix(1)), None);
    }

    #[test]
    fn test_meta_key_encoding() {
        let key = encode_meta_key(META_HEAD_BLOCK);
        assert_eq!(key.len(), 2);
        assert_eq!(key[0], b'M');
        assert_eq!(key[1], 0x01);
    }
}
