//! Record key layout.
//!
//! Keys embed the chain id first so per-network scans are prefix scans.
//! Numeric components are zero-padded to 20 digits so lexical order matches
//! numeric order.

use coffer_types::{hash_key, AddressOnNetwork, Asset, BlockHash, Network, Timestamp, TxHash};

pub fn network_prefix(network: &Network) -> String {
    format!("{}:", network.chain_id)
}

pub fn block_key(network: &Network, height: u64, hash: &BlockHash) -> String {
    format!("{}:{:020}:{}", network.chain_id, height, hash_key(hash))
}

pub fn block_height_prefix(network: &Network, height: u64) -> String {
    format!("{}:{:020}:", network.chain_id, height)
}

/// Index entry pointing from a block hash to its block record key.
pub fn block_hash_key(network: &Network, hash: &BlockHash) -> String {
    format!("{}:{}", network.chain_id, hash_key(hash))
}

pub fn transaction_key(network: &Network, hash: &TxHash) -> String {
    format!("{}:{}", network.chain_id, hash_key(hash))
}

pub fn balance_prefix(address_on_network: &AddressOnNetwork, asset: &Asset) -> String {
    format!("{}:{}:", address_on_network.key(), asset.key())
}

pub fn balance_key(
    address_on_network: &AddressOnNetwork,
    asset: &Asset,
    retrieved_at: Timestamp,
) -> String {
    format!(
        "{}{:020}",
        balance_prefix(address_on_network, asset),
        retrieved_at.as_millis()
    )
}

pub fn tracked_account_key(address_on_network: &AddressOnNetwork) -> String {
    address_on_network.key()
}

pub fn lookup_prefix(address_on_network: &AddressOnNetwork) -> String {
    format!("{}:", address_on_network.key())
}

pub fn lookup_key(address_on_network: &AddressOnNetwork, start: u64, end: u64) -> String {
    format!("{}{:020}:{:020}", lookup_prefix(address_on_network), start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_types::B256;

    #[test]
    fn block_keys_sort_by_height() {
        let network = Network::ethereum();
        let low = block_key(&network, 9, &B256::repeat_byte(0xff));
        let high = block_key(&network, 10, &B256::repeat_byte(0x00));
        assert!(low < high);
    }

    #[test]
    fn height_prefix_matches_block_key() {
        let network = Network::ethereum();
        let key = block_key(&network, 42, &B256::repeat_byte(1));
        assert!(key.starts_with(&block_height_prefix(&network, 42)));
        assert!(!key.starts_with(&block_height_prefix(&network, 4)));
    }
}
