//! Batched read-only calls through the Multicall3 aggregator contract.

use alloy_primitives::{address, Address, Bytes};
use alloy_sol_types::{sol, SolCall};

use crate::ProviderError;

/// Multicall3, deployed at the same address on every major EVM network.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Call3Result {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calls) external payable returns (Call3Result[] returnData);
}

/// One read-only call inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchCall {
    pub target: Address,
    pub data: Bytes,
}

impl BatchCall {
    pub fn new(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
        }
    }
}

/// Per-call outcome; a failed call does not fail the batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchResult {
    pub success: bool,
    pub return_data: Bytes,
}

pub fn encode_aggregate3(calls: &[BatchCall]) -> Bytes {
    let calls = calls
        .iter()
        .map(|c| Call3 {
            target: c.target,
            allowFailure: true,
            callData: c.data.clone(),
        })
        .collect();
    aggregate3Call { calls }.abi_encode().into()
}

pub fn decode_aggregate3(data: &[u8], expected: usize) -> Result<Vec<BatchResult>, ProviderError> {
    let decoded = aggregate3Call::abi_decode_returns(data, true)
        .map_err(|e| ProviderError::InvalidResponse(format!("aggregate3: {e}")))?;
    if decoded.returnData.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "aggregate3 returned {} results for {} calls",
            decoded.returnData.len(),
            expected
        )));
    }
    Ok(decoded
        .returnData
        .into_iter()
        .map(|r| BatchResult {
            success: r.success,
            return_data: r.returnData,
        })
        .collect())
}
