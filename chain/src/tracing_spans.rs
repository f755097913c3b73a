//! Span constructors for the chain core's recurring operations, so traces
//! share names and field sets.

use coffer_types::{AddressOnNetwork, TxHash};
use tracing::{info_span, Span};

/// One lifecycle-queue drain on a network.
pub fn drain_span(chain_id: u64, batch: usize) -> Span {
    info_span!("queue_drain", chain_id, batch)
}

/// One historic transfer scan for a tracked account.
pub fn scan_span(account: &AddressOnNetwork, mode: &'static str) -> Span {
    info_span!("historic_scan", account = %account, mode)
}

/// Handling of one inbound new head.
pub fn new_head_span(chain_id: u64, height: u64) -> Span {
    info_span!("new_head", chain_id, height)
}

/// Enrichment of one transaction or request.
pub fn annotate_span(chain_id: u64, hash: Option<&TxHash>) -> Span {
    match hash {
        Some(hash) => info_span!("annotate", chain_id, hash = %hash),
        None => info_span!("annotate", chain_id, hash = "request"),
    }
}

/// The sign-and-broadcast pipeline for one outgoing transaction.
pub fn broadcast_span(chain_id: u64, from: &str) -> Span {
    info_span!("broadcast", chain_id, from = %from)
}
