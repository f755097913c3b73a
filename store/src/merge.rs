//! Merging of transaction observations.
//!
//! Several sources report the same transaction (our own broadcast, the
//! pending subscription, the lifecycle poll, the historic scanner) in no
//! particular order. A merge never loses mined data or an outcome once it has
//! been recorded.

use coffer_types::{Transaction, TransactionParts};

/// Combine a stored record with a newer observation of the same hash.
///
/// - `first_seen` is the earliest of the two.
/// - An observation without block or receipt data never replaces a record
///   that has one.
/// - Otherwise the incoming fields win, falling back to stored fields the
///   incoming observation lacks.
pub fn merge_transaction(existing: Option<&Transaction>, incoming: Transaction) -> Transaction {
    let Some(existing) = existing else {
        return incoming;
    };
    let first_seen = existing.first_seen().min(incoming.first_seen());

    if existing.has_mined_data() && !incoming.has_mined_data() {
        let mut kept = existing.clone().into_parts();
        kept.first_seen = first_seen;
        return kept.into_transaction();
    }

    let existing = existing.clone().into_parts();
    let incoming = incoming.into_parts();

    let outcome = if incoming.receipt.is_some() {
        incoming.outcome
    } else if existing.receipt.is_some() {
        existing.outcome
    } else {
        incoming.outcome.or(existing.outcome)
    };

    TransactionParts {
        body: incoming.body,
        signature: incoming.signature.or(existing.signature),
        inclusion: incoming.inclusion.or(existing.inclusion),
        receipt: incoming.receipt.or(existing.receipt),
        outcome,
        first_seen,
    }
    .into_transaction()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_types::{
        Address, BlockInclusion, Bytes, Network, ReceiptData, Timestamp, TransactionBody,
        TransactionSignature, TransactionStage, B256, U256,
    };

    fn body() -> TransactionBody {
        TransactionBody {
            hash: B256::repeat_byte(0xab),
            from: Address::repeat_byte(1),
            to: Some(Address::repeat_byte(2)),
            value: U256::from(5u64),
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

    fn pending(first_seen: u64) -> Transaction {
        Transaction::SignedUnconfirmed {
            body: body(),
            signature: None,
            inclusion: None,
            first_seen: Timestamp::from_millis(first_seen),
        }
    }

    fn inclusion() -> BlockInclusion {
        BlockInclusion {
            block_hash: B256::repeat_byte(0xbb),
            block_height: 100,
        }
    }

    fn receipt() -> ReceiptData {
        ReceiptData {
            gas_used: U256::from(21_000u64),
            effective_gas_price: Some(U256::from(10u64)),
            logs: vec![],
        }
    }

    fn confirmed(first_seen: u64) -> Transaction {
        pending(first_seen).with_receipt(inclusion(), receipt(), true)
    }

    #[test]
    fn first_observation_is_stored_as_is() {
        let incoming = pending(10);
        assert_eq!(merge_transaction(None, incoming.clone()), incoming);
    }

    #[test]
    fn pending_observation_does_not_regress_confirmed() {
        let stored = confirmed(50);
        let merged = merge_transaction(Some(&stored), pending(20));
        assert_eq!(merged.stage(), TransactionStage::Confirmed);
        assert_eq!(merged.first_seen(), Timestamp::from_millis(20));
        assert_eq!(merged.receipt(), Some(&receipt()));
    }

    #[test]
    fn receipt_upgrades_pending() {
        let merged = merge_transaction(Some(&pending(10)), confirmed(30));
        assert_eq!(merged.stage(), TransactionStage::Confirmed);
        assert_eq!(merged.first_seen(), Timestamp::from_millis(10));
    }

    #[test]
    fn block_only_observation_keeps_stored_receipt() {
        let stored = confirmed(10);
        let incoming = Transaction::SignedUnconfirmed {
            body: body(),
            signature: None,
            inclusion: Some(inclusion()),
            first_seen: Timestamp::from_millis(40),
        };
        let merged = merge_transaction(Some(&stored), incoming);
        assert_eq!(merged.stage(), TransactionStage::Confirmed);
        assert_eq!(merged.receipt(), Some(&receipt()));
    }

    #[test]
    fn signature_survives_unsigned_observation() {
        let signature = TransactionSignature {
            r: U256::from(1u64),
            s: U256::from(2u64),
            v: 27,
        };
        let stored = Transaction::SignedUnconfirmed {
            body: body(),
            signature: Some(signature.clone()),
            inclusion: None,
            first_seen: Timestamp::from_millis(5),
        };
        let merged = merge_transaction(Some(&stored), pending(9));
        match merged {
            Transaction::SignedUnconfirmed { signature: kept, .. } => {
                assert_eq!(kept, Some(signature))
            }
            other => panic!("unexpected stage {:?}", other.stage()),
        }
    }

    #[test]
    fn dropped_failure_stays_failed_when_seen_pending_again() {
        let stored = pending(5).into_failed("dropped");
        let merged = merge_transaction(Some(&stored), pending(8));
        assert_eq!(merged.stage(), TransactionStage::FailedConfirmation);
    }

    #[test]
    fn reverted_receipt_is_failed_confirmation() {
        let reverted = pending(5).with_receipt(inclusion(), receipt(), false);
        let merged = merge_transaction(Some(&pending(1)), reverted);
        assert_eq!(merged.stage(), TransactionStage::FailedConfirmation);
        assert!(merged.has_mined_data());
    }
}
