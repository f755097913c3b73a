//! Block records.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;
use crate::network::Network;
use crate::time::Timestamp;

/// A block header as observed on a network. Appended, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmBlock {
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub height: u64,
    /// Block time as reported by the chain.
    pub timestamp: Timestamp,
    pub difficulty: U256,
    pub base_fee_per_gas: Option<U256>,
    pub network: Network,
}

impl EvmBlock {
    /// Whether `other` occupies the same height on the same network with a different hash.
    pub fn conflicts_with(&self, other: &EvmBlock) -> bool {
        self.network.same_chain(&other.network)
            && self.height == other.height
            && self.hash != other.hash
    }
}
