//! Point-in-time balance measurements.

use serde::{Deserialize, Serialize};

use crate::address::AddressOnNetwork;
use crate::asset::AssetAmount;
use crate::time::Timestamp;

/// Where a record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Produced by this process (e.g. a broadcast it performed).
    Local,
    /// Retrieved from a ledger provider.
    Provider,
}

/// One balance measurement. Balances form an additive log; the "current"
/// balance is derived at read time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub address_on_network: AddressOnNetwork,
    pub asset_amount: AssetAmount,
    /// Height the measurement was taken at, when the provider reports one.
    pub block_height: Option<u64>,
    pub retrieved_at: Timestamp,
    pub data_source: DataSource,
}
