//! Historic asset-transfer discovery records.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::address::AddressOnNetwork;
use crate::hash::TxHash;
use crate::network::Network;
use crate::time::Timestamp;

/// A scanned `[start_block, end_block]` range for one tracked address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTransferLookup {
    pub address_on_network: AddressOnNetwork,
    pub start_block: u64,
    pub end_block: u64,
    pub retrieved_at: Timestamp,
}

impl AssetTransferLookup {
    /// Whether this bookmark fully covers `[start, end]`.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.start_block <= start && end <= self.end_block
    }
}

/// A transfer discovered by the historic scanner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTransfer {
    pub network: Network,
    pub tx_hash: TxHash,
    pub block_height: Option<u64>,
    pub from: Address,
    pub to: Address,
    /// Token contract that emitted the transfer; `None` for base-asset transfers.
    pub contract_address: Option<Address>,
    pub amount: U256,
}
