//! Nullable signer: deterministic fake signatures.

use std::collections::VecDeque;
use std::sync::Mutex;

use alloy_primitives::keccak256;
use async_trait::async_trait;
use coffer_gateway::{SignedTransaction, SignerError, TransactionSigner};
use coffer_types::{
    Bytes, Timestamp, Transaction, TransactionBody, TransactionRequest, TransactionSignature, U256,
};

/// A signer that "signs" by serialising the request. The hash of the raw
/// bytes matches what [`crate::NullProvider`] returns on broadcast.
pub struct NullSigner {
    signed: Mutex<Vec<TransactionRequest>>,
    failures: Mutex<VecDeque<SignerError>>,
}

impl NullSigner {
    pub fn new() -> Self {
        Self {
            signed: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next signing request.
    pub fn fail_next(&self, error: SignerError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Requests signed so far.
    pub fn signed(&self) -> Vec<TransactionRequest> {
        self.signed.lock().unwrap().clone()
    }
}

impl Default for NullSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for NullSigner {
    async fn sign(&self, request: &TransactionRequest) -> Result<SignedTransaction, SignerError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let nonce = request
            .nonce
            .ok_or_else(|| SignerError::Rejected("nonce not set".into()))?;
        let gas_limit = request
            .gas_limit
            .ok_or_else(|| SignerError::Rejected("gas limit not set".into()))?;

        let mut raw = b"signed:".to_vec();
        raw.extend(serde_json::to_vec(request).map_err(|e| SignerError::Rejected(e.to_string()))?);
        let raw = Bytes::from(raw);

        let transaction = Transaction::SignedUnconfirmed {
            body: TransactionBody {
                hash: keccak256(&raw),
                from: request.from,
                to: request.to,
                value: request.value,
                input: request.input.clone(),
                nonce,
                gas_limit,
                gas_price: request.gas_price,
                max_fee_per_gas: request.max_fee_per_gas,
                max_priority_fee_per_gas: request.max_priority_fee_per_gas,
                tx_type: Some(if request.max_fee_per_gas.is_some() { 2 } else { 0 }),
                network: request.network.clone(),
            },
            signature: Some(TransactionSignature {
                r: U256::from(1u64),
                s: U256::from(2u64),
                v: 27,
            }),
            inclusion: None,
            first_seen: Timestamp::EPOCH,
        };

        self.signed.lock().unwrap().push(request.clone());
        Ok(SignedTransaction { transaction, raw })
    }
}
