//! Ledger JSON-RPC wire types and their conversion into the domain model.
//!
//! Conversions validate the shape the core depends on. A payload missing a
//! required field yields [`ProviderError::InvalidResponse`] and never reaches
//! the store.

use alloy_primitives::U64;
use coffer_types::{
    Address, BlockInclusion, Bytes, EvmBlock, Network, ReceiptData, Timestamp, Transaction,
    TransactionBody, TransactionLog, TransactionSignature, TxHash, B256, U256,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ProviderError;

/// Block selector for `eth_getBlockBy*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockId {
    Latest,
    Number(u64),
    Hash(B256),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    /// Null for pending blocks.
    pub hash: Option<B256>,
    pub parent_hash: B256,
    /// Null for pending blocks.
    pub number: Option<U64>,
    pub timestamp: U64,
    #[serde(default)]
    pub difficulty: Option<U256>,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
}

impl RpcBlock {
    pub fn into_block(self, network: &Network) -> Result<EvmBlock, ProviderError> {
        let hash = self
            .hash
            .ok_or_else(|| ProviderError::InvalidResponse("block without hash".into()))?;
        let number = self
            .number
            .ok_or_else(|| ProviderError::InvalidResponse("block without number".into()))?;
        Ok(EvmBlock {
            hash,
            parent_hash: self.parent_hash,
            height: number.to::<u64>(),
            timestamp: Timestamp::from_secs(self.timestamp.to::<u64>()),
            difficulty: self.difficulty.unwrap_or_default(),
            base_fee_per_gas: self.base_fee_per_gas,
            network: network.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: TxHash,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: U64,
    pub gas: U64,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default, rename = "type")]
    pub tx_type: Option<U64>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub r: Option<U256>,
    #[serde(default)]
    pub s: Option<U256>,
    #[serde(default)]
    pub v: Option<U64>,
}

impl RpcTransaction {
    pub fn body(&self, network: &Network) -> TransactionBody {
        TransactionBody {
            hash: self.hash,
            from: self.from,
            to: self.to,
            value: self.value,
            input: self.input.clone(),
            nonce: self.nonce.to::<u64>(),
            gas_limit: self.gas.to::<u64>(),
            gas_price: self.gas_price,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            tx_type: self.tx_type.and_then(|t| u8::try_from(t.to::<u64>()).ok()),
            network: network.clone(),
        }
    }

    pub fn inclusion(&self) -> Option<BlockInclusion> {
        match (self.block_hash, self.block_number) {
            (Some(block_hash), Some(number)) => Some(BlockInclusion {
                block_hash,
                block_height: number.to::<u64>(),
            }),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<TransactionSignature> {
        match (self.r, self.s, self.v) {
            (Some(r), Some(s), Some(v)) => Some(TransactionSignature {
                r,
                s,
                v: v.to::<u64>(),
            }),
            _ => None,
        }
    }

    pub fn is_mined(&self) -> bool {
        self.inclusion().is_some()
    }

    /// The observed transaction as an unconfirmed record.
    pub fn into_transaction(self, network: &Network, first_seen: Timestamp) -> Transaction {
        Transaction::SignedUnconfirmed {
            body: self.body(network),
            signature: self.signature(),
            inclusion: self.inclusion(),
            first_seen,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub transaction_hash: Option<TxHash>,
    #[serde(default)]
    pub block_number: Option<U64>,
}

impl From<RpcLog> for TransactionLog {
    fn from(log: RpcLog) -> Self {
        TransactionLog {
            contract_address: log.address,
            topics: log.topics,
            data: log.data,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: TxHash,
    pub block_hash: B256,
    pub block_number: U64,
    pub gas_used: U256,
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
    /// Absent before Byzantium; treated as success.
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s.to::<u64>() == 1)
    }

    pub fn inclusion(&self) -> BlockInclusion {
        BlockInclusion {
            block_hash: self.block_hash,
            block_height: self.block_number.to::<u64>(),
        }
    }

    pub fn receipt_data(&self) -> ReceiptData {
        ReceiptData {
            gas_used: self.gas_used,
            effective_gas_price: self.effective_gas_price,
            logs: self.logs.iter().cloned().map(TransactionLog::from).collect(),
        }
    }

    /// A receipt is only usable for the transaction it names.
    pub fn ensure_for(&self, hash: &TxHash) -> Result<(), ProviderError> {
        if self.transaction_hash == *hash {
            Ok(())
        } else {
            Err(ProviderError::InvalidResponse(format!(
                "receipt for {} returned for {hash}",
                self.transaction_hash
            )))
        }
    }

    /// Apply this receipt to a stored or freshly observed record.
    pub fn apply_to(&self, transaction: Transaction) -> Transaction {
        transaction.with_receipt(self.inclusion(), self.receipt_data(), self.succeeded())
    }
}

/// An `eth_getLogs` filter over an inclusive block range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    /// Restrict to these emitting contracts; empty means any.
    pub addresses: Vec<Address>,
    /// Positional topic filter; `None` matches anything in that position.
    pub topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub fn to_json(&self) -> Value {
        let mut filter = json!({
            "fromBlock": format!("{:#x}", self.from_block),
            "toBlock": format!("{:#x}", self.to_block),
            "topics": self.topics,
        });
        if !self.addresses.is_empty() {
            filter["address"] = json!(self.addresses);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX: &str = r#"{
        "hash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
        "from": "0xa7d9ddbe1f17865597fbd27ec712455208b6b76d",
        "to": "0xF02c1c8e6114b1Dbe8937a39260b5b0a374432bB",
        "value": "0xf3dbb76162000",
        "input": "0x68656c6c6f21",
        "nonce": "0x15",
        "gas": "0xc350",
        "gasPrice": "0x4a817c800",
        "type": "0x0",
        "blockHash": "0x1d59ff54b1eb26b013ce3cb5fc9dab3705b415a67127a003c3e61eb445bb8df2",
        "blockNumber": "0x5daf3b",
        "r": "0x1b5e176d927f8e9ab405058b2d2457392da3e20f328b16ddabcebc33eaac5fea",
        "s": "0x4ba69724e8f69de52f0125ad8b3c5c2cef33019bac3249e2c0a2192766d1721c",
        "v": "0x25"
    }"#;

    #[test]
    fn mined_transaction_converts() {
        let rpc: RpcTransaction = serde_json::from_str(TX).unwrap();
        let network = Network::ethereum();
        assert!(rpc.is_mined());
        let body = rpc.body(&network);
        assert_eq!(body.nonce, 21);
        assert_eq!(body.gas_limit, 50_000);
        assert_eq!(body.tx_type, Some(0));
        assert_eq!(rpc.inclusion().unwrap().block_height, 6_139_707);
        assert_eq!(rpc.signature().unwrap().v, 37);
    }

    #[test]
    fn pending_block_is_rejected() {
        let block: RpcBlock = serde_json::from_value(json!({
            "hash": null,
            "parentHash": format!("{:#x}", B256::repeat_byte(1)),
            "number": null,
            "timestamp": "0x10"
        }))
        .unwrap();
        assert!(matches!(
            block.into_block(&Network::ethereum()),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn receipt_status_zero_is_a_revert() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("{:#x}", B256::repeat_byte(1)),
            "blockHash": format!("{:#x}", B256::repeat_byte(2)),
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "status": "0x0",
            "logs": []
        }))
        .unwrap();
        assert!(!receipt.succeeded());
        assert_eq!(receipt.inclusion().block_height, 16);
        assert_eq!(receipt.receipt_data().gas_used, U256::from(21_000u64));
        assert!(receipt.ensure_for(&B256::repeat_byte(1)).is_ok());
        assert!(matches!(
            receipt.ensure_for(&B256::repeat_byte(3)),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn log_filter_serialises_hex_range() {
        let filter = LogFilter {
            from_block: 16,
            to_block: 255,
            addresses: vec![],
            topics: vec![Some(B256::repeat_byte(0xaa)), None],
        };
        let value = filter.to_json();
        assert_eq!(value["fromBlock"], "0x10");
        assert_eq!(value["toBlock"], "0xff");
        assert!(value.get("address").is_none());
        assert_eq!(value["topics"][1], Value::Null);
    }
}
