//! Network identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address family of a ledger. Only EVM-style ledgers are tracked by this core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFamily {
    Evm,
}

/// The native, gas-paying asset of a network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseAsset {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl BaseAsset {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            decimals,
        }
    }

    pub fn ether() -> Self {
        Self::new("Ether", "ETH", 18)
    }
}

/// A distinct ledger. Immutable once registered; the chain id is the key
/// component used everywhere.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    pub base_asset: BaseAsset,
    pub family: NetworkFamily,
}

impl Network {
    pub fn evm(name: impl Into<String>, chain_id: u64, base_asset: BaseAsset) -> Self {
        Self {
            name: name.into(),
            chain_id,
            base_asset,
            family: NetworkFamily::Evm,
        }
    }

    pub fn ethereum() -> Self {
        Self::evm("Ethereum", 1, BaseAsset::ether())
    }

    pub fn optimism() -> Self {
        Self::evm("Optimism", 10, BaseAsset::ether())
    }

    pub fn polygon() -> Self {
        Self::evm("Polygon", 137, BaseAsset::new("Matic Token", "MATIC", 18))
    }

    pub fn arbitrum() -> Self {
        Self::evm("Arbitrum", 42161, BaseAsset::ether())
    }

    pub fn sepolia() -> Self {
        Self::evm("Sepolia", 11155111, BaseAsset::ether())
    }

    /// Whether two values describe the same ledger.
    pub fn same_chain(&self, other: &Network) -> bool {
        self.chain_id == other.chain_id
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.chain_id)
    }
}
