//! Debounced, batched reverse-name lookups.
//!
//! Lookups arriving within the debounce window are collected into one
//! `getNames(address[])` call against the reverse-records contract. The
//! actor processes one batch at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coffer_gateway::ProviderGateway;
use coffer_types::Address;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::abi::{decode_get_names, get_names_call};

struct NameRequest {
    address: Address,
    reply: oneshot::Sender<Option<String>>,
}

/// Handle to a running batcher actor. Cheap to clone; the actor stops when
/// every handle is dropped.
#[derive(Clone)]
pub struct NameBatcher {
    requests: mpsc::UnboundedSender<NameRequest>,
}

impl NameBatcher {
    pub fn spawn(
        provider: Arc<dyn ProviderGateway>,
        contract: Address,
        debounce: Duration,
        max_batch: usize,
    ) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(provider, contract, debounce, max_batch.max(1), rx));
        Self { requests }
    }

    /// Reverse-resolve `address`. `None` when no name is registered or the
    /// lookup failed.
    pub async fn lookup(&self, address: Address) -> Option<String> {
        let (reply, response) = oneshot::channel();
        self.requests.send(NameRequest { address, reply }).ok()?;
        response.await.ok().flatten()
    }
}

async fn run(
    provider: Arc<dyn ProviderGateway>,
    contract: Address,
    debounce: Duration,
    max_batch: usize,
    mut rx: mpsc::UnboundedReceiver<NameRequest>,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = Instant::now() + debounce;
        while batch.len() < max_batch {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(request)) => batch.push(request),
                Ok(None) | Err(_) => break,
            }
        }

        let mut addresses: Vec<Address> = batch.iter().map(|r| r.address).collect();
        addresses.sort();
        addresses.dedup();
        let names = resolve_batch(provider.as_ref(), contract, &addresses).await;

        for request in batch {
            let name = names.get(&request.address).cloned();
            let _ = request.reply.send(name);
        }
    }
}

async fn resolve_batch(
    provider: &dyn ProviderGateway,
    contract: Address,
    addresses: &[Address],
) -> HashMap<Address, String> {
    debug!(count = addresses.len(), "resolving name batch");
    let data = get_names_call(addresses.to_vec());
    let returned = match provider.call(contract, data.into()).await {
        Ok(returned) => returned,
        Err(e) => {
            debug!("reverse-records lookup failed: {e}");
            return HashMap::new();
        }
    };
    let Some(names) = decode_get_names(&returned) else {
        warn!("undecodable reverse-records response");
        return HashMap::new();
    };
    addresses
        .iter()
        .zip(names)
        .filter(|(_, name)| !name.is_empty())
        .map(|(address, name)| (*address, name))
        .collect()
}
