//! Chain data model for the coffer wallet core.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! networks, tracked addresses, blocks, the transaction lifecycle union, balances,
//! historic-scan bookmarks, assets and timestamps.

pub mod address;
pub mod asset;
pub mod balance;
pub mod block;
pub mod error;
pub mod hash;
pub mod network;
pub mod time;
pub mod transaction;
pub mod transfer;

pub use address::{normalize_address, parse_address, AddressOnNetwork};
pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use asset::{format_units, Asset, AssetAmount, FungibleAsset};
pub use balance::{AccountBalance, DataSource};
pub use block::EvmBlock;
pub use error::CofferError;
pub use hash::{hash_key, BlockHash, TxHash};
pub use network::{BaseAsset, Network, NetworkFamily};
pub use time::{Clock, SystemClock, Timestamp};
pub use transaction::{
    BlockInclusion, Outcome, ReceiptData, Transaction, TransactionBody, TransactionLog,
    TransactionParts, TransactionRequest, TransactionSignature, TransactionStage,
};
pub use transfer::{AssetTransfer, AssetTransferLookup};
