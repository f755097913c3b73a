//! Builders for wire-shaped test data.

use alloy_primitives::U64;
use coffer_gateway::{RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
use coffer_types::{Address, Bytes, TxHash, B256, U256};

/// Deterministic block hash for a height.
pub fn block_hash(height: u64) -> B256 {
    B256::left_padding_from(&height.to_be_bytes())
}

pub fn rpc_block(height: u64, timestamp_secs: u64) -> RpcBlock {
    RpcBlock {
        hash: Some(block_hash(height)),
        parent_hash: block_hash(height.saturating_sub(1)),
        number: Some(U64::from(height)),
        timestamp: U64::from(timestamp_secs),
        difficulty: Some(U256::ZERO),
        base_fee_per_gas: Some(U256::from(1_000_000_000u64)),
    }
}

/// An unmined base-asset transfer.
pub fn rpc_transaction(hash: TxHash, from: Address, to: Option<Address>, nonce: u64) -> RpcTransaction {
    RpcTransaction {
        hash,
        from,
        to,
        value: U256::from(1u64),
        input: Bytes::new(),
        nonce: U64::from(nonce),
        gas: U64::from(21_000u64),
        gas_price: Some(U256::from(1_000_000_000u64)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        tx_type: Some(U64::ZERO),
        block_hash: None,
        block_number: None,
        r: None,
        s: None,
        v: None,
    }
}

/// Mark a transaction as mined at `height`.
pub fn mined(mut transaction: RpcTransaction, height: u64) -> RpcTransaction {
    transaction.block_hash = Some(block_hash(height));
    transaction.block_number = Some(U64::from(height));
    transaction
}

pub fn rpc_receipt(hash: TxHash, height: u64, succeeded: bool, logs: Vec<RpcLog>) -> RpcReceipt {
    RpcReceipt {
        transaction_hash: hash,
        block_hash: block_hash(height),
        block_number: U64::from(height),
        gas_used: U256::from(21_000u64),
        effective_gas_price: Some(U256::from(1_000_000_000u64)),
        status: Some(U64::from(u64::from(succeeded))),
        logs,
        contract_address: None,
    }
}
