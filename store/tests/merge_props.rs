use coffer_store::merge_transaction;
use coffer_types::{
    Address, BlockInclusion, Bytes, Network, ReceiptData, Timestamp, Transaction, TransactionBody,
    B256, U256,
};
use proptest::prelude::*;

fn body() -> TransactionBody {
    TransactionBody {
        hash: B256::repeat_byte(7),
        from: Address::repeat_byte(1),
        to: Some(Address::repeat_byte(2)),
        value: U256::ZERO,
        input: Bytes::new(),
        nonce: 1,
        gas_limit: 21_000,
        gas_price: None,
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        tx_type: Some(2),
        network: Network::ethereum(),
    }
}

fn mined(first_seen: u64, height: u64, succeeded: bool) -> Transaction {
    Transaction::SignedUnconfirmed {
        body: body(),
        signature: None,
        inclusion: None,
        first_seen: Timestamp::from_millis(first_seen),
    }
    .with_receipt(
        BlockInclusion {
            block_hash: B256::repeat_byte(9),
            block_height: height,
        },
        ReceiptData {
            gas_used: U256::from(height),
            effective_gas_price: None,
            logs: vec![],
        },
        succeeded,
    )
}

fn unmined(first_seen: u64, dropped: bool) -> Transaction {
    let tx = Transaction::SignedUnconfirmed {
        body: body(),
        signature: None,
        inclusion: None,
        first_seen: Timestamp::from_millis(first_seen),
    };
    if dropped {
        tx.into_failed("dropped")
    } else {
        tx
    }
}

proptest! {
    #[test]
    fn merging_unmined_into_mined_changes_only_first_seen(
        a_seen in 0u64..1_000_000,
        b_seen in 0u64..1_000_000,
        height in 1u64..10_000_000,
        succeeded in any::<bool>(),
        dropped in any::<bool>(),
    ) {
        let stored = mined(a_seen, height, succeeded);
        let merged = merge_transaction(Some(&stored), unmined(b_seen, dropped));

        prop_assert_eq!(merged.first_seen(), Timestamp::from_millis(a_seen.min(b_seen)));
        prop_assert!(merged.first_seen() <= stored.first_seen());
        let mut expected = stored.into_parts();
        expected.first_seen = merged.first_seen();
        prop_assert_eq!(merged, expected.into_transaction());
    }

    #[test]
    fn receipt_and_poll_order_do_not_matter(
        poll_seen in 0u64..1_000_000,
        receipt_seen in 0u64..1_000_000,
        height in 1u64..10_000_000,
    ) {
        let poll = Transaction::SignedUnconfirmed {
            body: body(),
            signature: None,
            inclusion: Some(BlockInclusion { block_hash: B256::repeat_byte(9), block_height: height }),
            first_seen: Timestamp::from_millis(poll_seen),
        };
        let receipt = mined(receipt_seen, height, true);

        let a = merge_transaction(Some(&merge_transaction(None, poll.clone())), receipt.clone());
        let b = merge_transaction(Some(&merge_transaction(None, receipt)), poll);
        prop_assert_eq!(a, b);
    }
}
