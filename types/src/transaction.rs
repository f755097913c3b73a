//! Transaction lifecycle model.
//!
//! A transaction moves through lifecycle stages:
//!
//! - [`TransactionRequest`]: the `Unsigned` stage. No signature, possibly no
//!   nonce, and no hash, so it is never stored.
//! - [`Transaction::SignedUnconfirmed`]: signed and known by hash, outcome not
//!   yet known. May already carry a block inclusion when it was seen mined
//!   before its receipt was retrieved.
//! - [`Transaction::Confirmed`]: mined with a successful receipt.
//! - [`Transaction::FailedConfirmation`]: reverted (status 0) or given up on,
//!   with an optional error.
//!
//! A stored transaction is identified by `(hash, network)`.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::hash::{BlockHash, TxHash};
use crate::network::Network;
use crate::time::Timestamp;

/// An unsigned transaction request (the `Unsigned` lifecycle stage).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub network: Network,
}

impl TransactionRequest {
    /// A plain value transfer with everything else left for population.
    pub fn transfer(from: Address, to: Address, value: U256, network: Network) -> Self {
        Self {
            from,
            to: Some(to),
            value,
            input: Bytes::new(),
            nonce: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            network,
        }
    }

    /// Worst-case gas fee: gas limit times the max fee (or legacy gas price).
    /// `None` until both are populated.
    pub fn max_gas_fee(&self) -> Option<U256> {
        let limit = self.gas_limit?;
        let price = self.max_fee_per_gas.or(self.gas_price)?;
        Some(price.saturating_mul(U256::from(limit)))
    }
}

/// Fields every signed transaction carries regardless of stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub tx_type: Option<u8>,
    pub network: Network,
}

impl TransactionBody {
    /// Whether `address` is the sender or the recipient.
    pub fn involves(&self, address: &Address) -> bool {
        self.from == *address || self.to.as_ref() == Some(address)
    }

    /// The equivalent request shape, used to annotate observed transactions
    /// with the same rules as pre-broadcast requests.
    pub fn as_request(&self) -> TransactionRequest {
        TransactionRequest {
            from: self.from,
            to: self.to,
            value: self.value,
            input: self.input.clone(),
            nonce: Some(self.nonce),
            gas_limit: Some(self.gas_limit),
            gas_price: self.gas_price,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            network: self.network.clone(),
        }
    }
}

/// ECDSA signature components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub r: U256,
    pub s: U256,
    pub v: u64,
}

/// Where a transaction was mined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInclusion {
    pub block_hash: BlockHash,
    pub block_height: u64,
}

/// A log emitted during execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub contract_address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Execution data taken from a receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptData {
    pub gas_used: U256,
    pub effective_gas_price: Option<U256>,
    pub logs: Vec<TransactionLog>,
}

/// Final outcome of a transaction, when known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { error: Option<String> },
}

/// Lifecycle stage discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStage {
    Unsigned,
    SignedUnconfirmed,
    Confirmed,
    FailedConfirmation,
}

/// A hashed transaction at one of its stored lifecycle stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Transaction {
    SignedUnconfirmed {
        body: TransactionBody,
        signature: Option<TransactionSignature>,
        inclusion: Option<BlockInclusion>,
        first_seen: Timestamp,
    },
    Confirmed {
        body: TransactionBody,
        signature: Option<TransactionSignature>,
        inclusion: BlockInclusion,
        receipt: ReceiptData,
        first_seen: Timestamp,
    },
    FailedConfirmation {
        body: TransactionBody,
        signature: Option<TransactionSignature>,
        inclusion: Option<BlockInclusion>,
        receipt: Option<ReceiptData>,
        error: Option<String>,
        first_seen: Timestamp,
    },
}

impl Transaction {
    pub fn body(&self) -> &TransactionBody {
        match self {
            Self::SignedUnconfirmed { body, .. }
            | Self::Confirmed { body, .. }
            | Self::FailedConfirmation { body, .. } => body,
        }
    }

    pub fn hash(&self) -> TxHash {
        self.body().hash
    }

    pub fn network(&self) -> &Network {
        &self.body().network
    }

    pub fn sender(&self) -> Address {
        self.body().from
    }

    pub fn recipient(&self) -> Option<Address> {
        self.body().to
    }

    pub fn first_seen(&self) -> Timestamp {
        match self {
            Self::SignedUnconfirmed { first_seen, .. }
            | Self::Confirmed { first_seen, .. }
            | Self::FailedConfirmation { first_seen, .. } => *first_seen,
        }
    }

    pub fn inclusion(&self) -> Option<&BlockInclusion> {
        match self {
            Self::SignedUnconfirmed { inclusion, .. } => inclusion.as_ref(),
            Self::Confirmed { inclusion, .. } => Some(inclusion),
            Self::FailedConfirmation { inclusion, .. } => inclusion.as_ref(),
        }
    }

    pub fn receipt(&self) -> Option<&ReceiptData> {
        match self {
            Self::SignedUnconfirmed { .. } => None,
            Self::Confirmed { receipt, .. } => Some(receipt),
            Self::FailedConfirmation { receipt, .. } => receipt.as_ref(),
        }
    }

    pub fn stage(&self) -> TransactionStage {
        match self {
            Self::SignedUnconfirmed { .. } => TransactionStage::SignedUnconfirmed,
            Self::Confirmed { .. } => TransactionStage::Confirmed,
            Self::FailedConfirmation { .. } => TransactionStage::FailedConfirmation,
        }
    }

    /// Whether block or gas-used data has been recorded.
    pub fn has_mined_data(&self) -> bool {
        self.inclusion().is_some() || self.receipt().is_some()
    }

    /// Whether a final outcome (success or failure) has been recorded.
    pub fn has_outcome(&self) -> bool {
        !matches!(self, Self::SignedUnconfirmed { .. })
    }

    /// Apply a receipt: status `true` confirms, `false` marks a revert.
    pub fn with_receipt(self, inclusion: BlockInclusion, receipt: ReceiptData, succeeded: bool) -> Self {
        let mut parts = self.into_parts();
        parts.inclusion = Some(inclusion);
        parts.receipt = Some(receipt);
        parts.outcome = Some(if succeeded {
            Outcome::Succeeded
        } else {
            Outcome::Failed { error: None }
        });
        parts.into_transaction()
    }

    /// Mark as failed without mined data, e.g. dropped from the mempool.
    pub fn into_failed(self, error: impl Into<String>) -> Self {
        let mut parts = self.into_parts();
        parts.outcome = Some(Outcome::Failed {
            error: Some(error.into()),
        });
        parts.into_transaction()
    }

    pub fn into_parts(self) -> TransactionParts {
        match self {
            Self::SignedUnconfirmed {
                body,
                signature,
                inclusion,
                first_seen,
            } => TransactionParts {
                body,
                signature,
                inclusion,
                receipt: None,
                outcome: None,
                first_seen,
            },
            Self::Confirmed {
                body,
                signature,
                inclusion,
                receipt,
                first_seen,
            } => TransactionParts {
                body,
                signature,
                inclusion: Some(inclusion),
                receipt: Some(receipt),
                outcome: Some(Outcome::Succeeded),
                first_seen,
            },
            Self::FailedConfirmation {
                body,
                signature,
                inclusion,
                receipt,
                error,
                first_seen,
            } => TransactionParts {
                body,
                signature,
                inclusion,
                receipt,
                outcome: Some(Outcome::Failed { error }),
                first_seen,
            },
        }
    }
}

/// Stage-independent decomposition of a [`Transaction`], used when merging
/// records from several sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionParts {
    pub body: TransactionBody,
    pub signature: Option<TransactionSignature>,
    pub inclusion: Option<BlockInclusion>,
    pub receipt: Option<ReceiptData>,
    pub outcome: Option<Outcome>,
    pub first_seen: Timestamp,
}

impl TransactionParts {
    /// Reassemble into the stage the parts describe. A success without both
    /// inclusion and receipt cannot be represented and stays unconfirmed.
    pub fn into_transaction(self) -> Transaction {
        let Self {
            body,
            signature,
            inclusion,
            receipt,
            outcome,
            first_seen,
        } = self;
        match (outcome, inclusion, receipt) {
            (Some(Outcome::Succeeded), Some(inclusion), Some(receipt)) => Transaction::Confirmed {
                body,
                signature,
                inclusion,
                receipt,
                first_seen,
            },
            (Some(Outcome::Failed { error }), inclusion, receipt) => {
                Transaction::FailedConfirmation {
                    body,
                    signature,
                    inclusion,
                    receipt,
                    error,
                    first_seen,
                }
            }
            (_, inclusion, _) => Transaction::SignedUnconfirmed {
                body,
                signature,
                inclusion,
                first_seen,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> TransactionBody {
        TransactionBody {
            hash: B256::repeat_byte(1),
            from: Address::repeat_byte(0xab),
            to: Some(Address::repeat_byte(0x12)),
            value: U256::from(1u64),
            input: Bytes::new(),
            nonce: 3,
            gas_limit: 21_000,
            gas_price: Some(U256::from(10u64)),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            tx_type: Some(0),
            network: Network::ethereum(),
        }
    }

    fn pending() -> Transaction {
        Transaction::SignedUnconfirmed {
            body: body(),
            signature: None,
            inclusion: None,
            first_seen: Timestamp::from_millis(5),
        }
    }

    fn inclusion() -> BlockInclusion {
        BlockInclusion {
            block_hash: B256::repeat_byte(9),
            block_height: 100,
        }
    }

    fn receipt() -> ReceiptData {
        ReceiptData {
            gas_used: U256::from(21_000u64),
            effective_gas_price: None,
            logs: Vec::new(),
        }
    }

    #[test]
    fn successful_receipt_confirms() {
        let tx = pending().with_receipt(inclusion(), receipt(), true);
        assert_eq!(tx.stage(), TransactionStage::Confirmed);
        assert_eq!(tx.inclusion().map(|i| i.block_height), Some(100));
    }

    #[test]
    fn reverted_receipt_fails_but_keeps_mined_data() {
        let tx = pending().with_receipt(inclusion(), receipt(), false);
        assert_eq!(tx.stage(), TransactionStage::FailedConfirmation);
        assert!(tx.has_mined_data());
    }

    #[test]
    fn parts_round_trip_preserves_stage() {
        let confirmed = pending().with_receipt(inclusion(), receipt(), true);
        assert_eq!(confirmed.clone().into_parts().into_transaction(), confirmed);
        let failed = pending().into_failed("dropped");
        assert_eq!(failed.clone().into_parts().into_transaction(), failed);
    }

    #[test]
    fn involves_sender_and_recipient() {
        let body = body();
        assert!(body.involves(&Address::repeat_byte(0xab)));
        assert!(body.involves(&Address::repeat_byte(0x12)));
        assert!(!body.involves(&Address::repeat_byte(0x34)));
    }

    #[test]
    fn max_gas_fee_prefers_eip1559_cap() {
        let mut request = TransactionRequest::transfer(
            Address::ZERO,
            Address::repeat_byte(1),
            U256::ZERO,
            Network::ethereum(),
        );
        assert_eq!(request.max_gas_fee(), None);
        request.gas_limit = Some(21_000);
        request.gas_price = Some(U256::from(1u64));
        request.max_fee_per_gas = Some(U256::from(2u64));
        assert_eq!(request.max_gas_fee(), Some(U256::from(42_000u64)));
    }

    #[test]
    fn stage_tag_serializes() {
        let json = serde_json::to_value(pending()).unwrap();
        assert_eq!(json["stage"], "signed_unconfirmed");
    }
}
