//! Address handling and the tracked-address key.
//!
//! Addresses are parsed into 20-byte [`Address`] values, so comparisons are
//! case-insensitive by construction. The lowercase hex rendering is the
//! normalized form used in store keys and logs.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::network::Network;
use crate::CofferError;

/// Parse a `0x`-prefixed hex address, accepting any letter case.
pub fn parse_address(raw: &str) -> Result<Address, CofferError> {
    let lowered = raw.trim().to_ascii_lowercase();
    Address::from_str(&lowered).map_err(|_| CofferError::InvalidAddress(raw.to_string()))
}

/// Lowercase `0x`-prefixed rendering of an address.
pub fn normalize_address(address: &Address) -> String {
    format!("{address:#x}")
}

/// A tracked address paired with the network it is tracked on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressOnNetwork {
    pub address: Address,
    pub network: Network,
}

impl AddressOnNetwork {
    pub fn new(address: Address, network: Network) -> Self {
        Self { address, network }
    }

    /// Store key: `<chain id>:<normalized address>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.network.chain_id, normalize_address(&self.address))
    }

    /// Whether `other` refers to this address (on any network).
    pub fn is_address(&self, other: &Address) -> bool {
        self.address == *other
    }
}

impl fmt::Display for AddressOnNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", normalize_address(&self.address), self.network.chain_id)
    }
}
