//! Contract ABIs the engine understands, and log decoding.

use alloy_sol_types::{sol, SolCall, SolEvent};
use coffer_types::{Address, TransactionLog, B256, U256};

sol! {
    function transfer(address to, uint256 amount) external returns (bool);
    function transferFrom(address from, address to, uint256 amount) external returns (bool);
    function approve(address spender, uint256 amount) external returns (bool);
    function balanceOf(address owner) external view returns (uint256);

    event Transfer(address indexed from, address indexed to, uint256 amount);

    event Deposit(address indexed dst, uint256 wad);
    event Withdrawal(address indexed src, uint256 wad);

    function getNames(address[] addresses) external view returns (string[] names);
}

/// A fungible-token call decoded from transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenCall {
    Transfer {
        from: Option<Address>,
        to: Address,
        amount: U256,
    },
    Approve {
        spender: Address,
        amount: U256,
    },
}

pub fn decode_token_call(input: &[u8]) -> Option<TokenCall> {
    if let Ok(call) = transferCall::abi_decode(input, true) {
        return Some(TokenCall::Transfer {
            from: None,
            to: call.to,
            amount: call.amount,
        });
    }
    if let Ok(call) = transferFromCall::abi_decode(input, true) {
        return Some(TokenCall::Transfer {
            from: Some(call.from),
            to: call.to,
            amount: call.amount,
        });
    }
    if let Ok(call) = approveCall::abi_decode(input, true) {
        return Some(TokenCall::Approve {
            spender: call.spender,
            amount: call.amount,
        });
    }
    None
}

/// A value movement found in a log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLog {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// Decode an ERC-20 `Transfer`, or a wrapped-asset `Deposit`/`Withdrawal`
/// expressed as a transfer out of / into the wrapper contract.
///
/// NFT transfers share the `Transfer` signature but index the token id; they
/// have four topics and are rejected.
pub fn decode_transfer_log(log: &TransactionLog) -> Option<TransferLog> {
    let topic0 = *log.topics.first()?;
    let topics = log.topics.iter().copied();
    let data = log.data.as_ref();

    if topic0 == Transfer::SIGNATURE_HASH {
        if log.topics.len() != 3 {
            return None;
        }
        let event = Transfer::decode_raw_log(topics, data, true).ok()?;
        return Some(TransferLog {
            contract: log.contract_address,
            from: event.from,
            to: event.to,
            amount: event.amount,
        });
    }
    if topic0 == Deposit::SIGNATURE_HASH {
        let event = Deposit::decode_raw_log(topics, data, true).ok()?;
        return Some(TransferLog {
            contract: log.contract_address,
            from: log.contract_address,
            to: event.dst,
            amount: event.wad,
        });
    }
    if topic0 == Withdrawal::SIGNATURE_HASH {
        let event = Withdrawal::decode_raw_log(topics, data, true).ok()?;
        return Some(TransferLog {
            contract: log.contract_address,
            from: event.src,
            to: log.contract_address,
            amount: event.wad,
        });
    }
    None
}

/// Topic 0 of the ERC-20 `Transfer` event.
pub fn transfer_topic() -> B256 {
    Transfer::SIGNATURE_HASH
}

pub fn balance_of_call(owner: Address) -> Vec<u8> {
    balanceOfCall { owner }.abi_encode()
}

pub fn decode_balance_of(data: &[u8]) -> Option<U256> {
    balanceOfCall::abi_decode_returns(data, true)
        .ok()
        .map(|r| r._0)
}

pub fn get_names_call(addresses: Vec<Address>) -> Vec<u8> {
    getNamesCall { addresses }.abi_encode()
}

pub fn decode_get_names(data: &[u8]) -> Option<Vec<String>> {
    getNamesCall::abi_decode_returns(data, true)
        .ok()
        .map(|r| r.names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, B256};
    use alloy_sol_types::SolValue;

    fn topic(address: Address) -> B256 {
        address.into_word()
    }

    #[test]
    fn decodes_erc20_transfer_input() {
        let to = Address::repeat_byte(7);
        let input = transferCall {
            to,
            amount: U256::from(5u64),
        }
        .abi_encode();
        assert_eq!(
            decode_token_call(&input),
            Some(TokenCall::Transfer {
                from: None,
                to,
                amount: U256::from(5u64)
            })
        );
    }

    #[test]
    fn unknown_selector_is_not_a_token_call() {
        assert_eq!(decode_token_call(&[0xde, 0xad, 0xbe, 0xef, 0, 0]), None);
        assert_eq!(decode_token_call(&[]), None);
    }

    #[test]
    fn decodes_transfer_log() {
        let token = Address::repeat_byte(0x10);
        let log = TransactionLog {
            contract_address: token,
            topics: vec![
                Transfer::SIGNATURE_HASH,
                topic(Address::repeat_byte(1)),
                topic(Address::repeat_byte(2)),
            ],
            data: Bytes::from(U256::from(99u64).abi_encode()),
        };
        let decoded = decode_transfer_log(&log).unwrap();
        assert_eq!(decoded.from, Address::repeat_byte(1));
        assert_eq!(decoded.to, Address::repeat_byte(2));
        assert_eq!(decoded.amount, U256::from(99u64));
    }

    #[test]
    fn nft_transfer_is_ignored() {
        let log = TransactionLog {
            contract_address: Address::repeat_byte(0x10),
            topics: vec![
                Transfer::SIGNATURE_HASH,
                topic(Address::repeat_byte(1)),
                topic(Address::repeat_byte(2)),
                B256::with_last_byte(1),
            ],
            data: Bytes::new(),
        };
        assert_eq!(decode_transfer_log(&log), None);
    }

    #[test]
    fn deposit_is_a_transfer_out_of_the_wrapper() {
        let weth = Address::repeat_byte(0xee);
        let log = TransactionLog {
            contract_address: weth,
            topics: vec![Deposit::SIGNATURE_HASH, topic(Address::repeat_byte(3))],
            data: Bytes::from(U256::from(10u64).abi_encode()),
        };
        let decoded = decode_transfer_log(&log).unwrap();
        assert_eq!(decoded.from, weth);
        assert_eq!(decoded.to, Address::repeat_byte(3));
    }
}
