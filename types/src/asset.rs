//! Assets and amounts.
//!
//! Amounts are fixed-point integers ([`U256`]) in the asset's smallest unit;
//! [`format_units`] renders them with the asset's decimals.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::normalize_address;
use crate::network::{BaseAsset, Network};

/// A contract-issued fungible token (ERC-20 style).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FungibleAsset {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub contract_address: Address,
    pub chain_id: u64,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Either the base asset of a network or a token contract on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Base { chain_id: u64, asset: BaseAsset },
    Fungible(FungibleAsset),
}

impl Asset {
    pub fn base_of(network: &Network) -> Self {
        Self::Base {
            chain_id: network.chain_id,
            asset: network.base_asset.clone(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Base { asset, .. } => &asset.symbol,
            Self::Fungible(token) => &token.symbol,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Base { asset, .. } => &asset.name,
            Self::Fungible(token) => &token.name,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Self::Base { asset, .. } => asset.decimals,
            Self::Fungible(token) => token.decimals,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Base { chain_id, .. } => *chain_id,
            Self::Fungible(token) => token.chain_id,
        }
    }

    pub fn contract_address(&self) -> Option<Address> {
        match self {
            Self::Base { .. } => None,
            Self::Fungible(token) => Some(token.contract_address),
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Self::Base { .. })
    }

    /// Store key component: `base` or the token's normalized contract address.
    pub fn key(&self) -> String {
        match self {
            Self::Base { .. } => "base".to_string(),
            Self::Fungible(token) => normalize_address(&token.contract_address),
        }
    }
}

/// An amount of a specific asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: Asset,
    pub amount: U256,
}

impl AssetAmount {
    pub fn new(asset: Asset, amount: U256) -> Self {
        Self { asset, amount }
    }

    /// Human-readable decimal amount, e.g. `"1.0"` for 10^18 wei of ETH.
    pub fn decimal_string(&self) -> String {
        format_units(self.amount, self.asset.decimals())
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.decimal_string(), self.asset.symbol())
    }
}

/// Render a raw integer amount with `decimals` fractional digits, trimming
/// trailing zeros but always keeping one fractional digit.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    let (whole, fraction) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{digits:0>decimals$}"))
    };
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{fraction}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ether_formats_as_one() {
        let wei = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(format_units(wei, 18), "1.0");
    }

    #[test]
    fn fractional_amounts_keep_significant_digits() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(42u64), 6), "0.000042");
        assert_eq!(format_units(U256::ZERO, 18), "0.0");
    }

    #[test]
    fn zero_decimals() {
        assert_eq!(format_units(U256::from(7u64), 0), "7.0");
    }

    #[test]
    fn asset_keys() {
        let network = Network::ethereum();
        assert_eq!(Asset::base_of(&network).key(), "base");
        let token = Asset::Fungible(FungibleAsset {
            name: "Dai".into(),
            symbol: "DAI".into(),
            decimals: 18,
            contract_address: Address::repeat_byte(0x6b),
            chain_id: 1,
            logo_url: None,
        });
        assert_eq!(token.key(), format!("0x{}", "6b".repeat(20)));
    }
}
