//! Transaction classification.

use std::collections::HashSet;
use std::sync::Arc;

use coffer_gateway::{ProviderGateway, ProviderRegistry};
use coffer_store::ChainStore;
use coffer_types::{
    Address, AddressOnNetwork, Asset, AssetAmount, Bytes, Clock, Network, Transaction,
    TransactionLog, TransactionRequest, U256,
};
use tracing::{debug, instrument};

use crate::abi::{decode_token_call, decode_transfer_log, TokenCall, TransferLog};
use crate::assets::AssetRegistry;
use crate::names::ResolverChain;
use crate::types::{
    AnnotationKind, AnnotationWarning, EnrichedSignatureRequest, EnrichedTransaction,
    TransactionAnnotation,
};
use crate::AnnotationError;

/// The fields classification looks at, shared by requests and transactions.
struct Subject<'a> {
    network: &'a Network,
    from: Address,
    to: Option<Address>,
    value: U256,
    input: &'a Bytes,
    max_gas_fee: Option<U256>,
    logs: &'a [TransactionLog],
}

pub struct AnnotationEngine {
    providers: ProviderRegistry,
    assets: Arc<AssetRegistry>,
    names: ResolverChain,
    store: Arc<ChainStore>,
    clock: Arc<dyn Clock>,
}

impl AnnotationEngine {
    pub fn new(
        providers: ProviderRegistry,
        assets: Arc<AssetRegistry>,
        names: ResolverChain,
        store: Arc<ChainStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers,
            assets,
            names,
            store,
            clock,
        }
    }

    pub fn assets(&self) -> &Arc<AssetRegistry> {
        &self.assets
    }

    pub async fn enrich_transaction(&self, transaction: Transaction) -> EnrichedTransaction {
        let annotation = self.annotate_transaction(&transaction).await;
        EnrichedTransaction {
            transaction,
            annotation,
        }
    }

    pub async fn enrich_request(&self, request: TransactionRequest) -> EnrichedSignatureRequest {
        let annotation = self.annotate_request(&request).await;
        EnrichedSignatureRequest {
            request,
            annotation,
        }
    }

    #[instrument(skip_all, fields(chain_id = request.network.chain_id))]
    pub async fn annotate_request(&self, request: &TransactionRequest) -> TransactionAnnotation {
        self.annotate(Subject {
            network: &request.network,
            from: request.from,
            to: request.to,
            value: request.value,
            input: &request.input,
            max_gas_fee: request.max_gas_fee(),
            logs: &[],
        })
        .await
    }

    #[instrument(skip_all, fields(hash = %transaction.hash()))]
    pub async fn annotate_transaction(&self, transaction: &Transaction) -> TransactionAnnotation {
        let body = transaction.body();
        let logs = transaction
            .receipt()
            .map(|r| r.logs.as_slice())
            .unwrap_or_default();
        let mut annotation = self
            .annotate(Subject {
                network: &body.network,
                from: body.from,
                to: body.to,
                value: body.value,
                input: &body.input,
                max_gas_fee: body.as_request().max_gas_fee(),
                logs,
            })
            .await;

        if let Some(inclusion) = transaction.inclusion() {
            match self.store.get_block(&body.network, &inclusion.block_hash) {
                Ok(block) => annotation.block_timestamp = block.map(|b| b.timestamp),
                Err(e) => debug!("block lookup for annotation failed: {e}"),
            }
        }
        annotation
    }

    async fn annotate(&self, subject: Subject<'_>) -> TransactionAnnotation {
        let provider = self.providers.get(subject.network);
        let mut annotation = self.classify(&subject, provider.as_deref()).await;

        annotation.subannotations = self.subannotations(&subject).await;
        if let AnnotationKind::ContractInteraction { contract } = &annotation.kind {
            if let Some(kind) = detect_swap(&subject, contract.clone(), &annotation.subannotations) {
                annotation.kind = kind;
            }
        }

        match self.has_insufficient_funds(&subject, provider.as_deref()).await {
            Ok(true) => annotation.warn(AnnotationWarning::InsufficientFunds),
            Ok(false) => {}
            Err(e) => debug!("balance check skipped: {e}"),
        }
        annotation
    }

    async fn classify(
        &self,
        subject: &Subject<'_>,
        provider: Option<&dyn ProviderGateway>,
    ) -> TransactionAnnotation {
        let network = subject.network;
        let Some(to) = subject.to else {
            return TransactionAnnotation::new(AnnotationKind::ContractDeployment);
        };

        if subject.input.is_empty() {
            let mut annotation = TransactionAnnotation::new(AnnotationKind::AssetTransfer {
                sender: self.identity(subject.from, network).await,
                recipient: self.identity(to, network).await,
                asset_amount: AssetAmount::new(Asset::base_of(network), subject.value),
            });
            if has_code(provider, to).await == Some(true) {
                annotation.warn(AnnotationWarning::SendToContract);
            }
            return annotation;
        }

        let known_asset = self.assets.get(network.chain_id, &to).await;
        let token_call = decode_token_call(subject.input);

        match (known_asset, token_call) {
            (Some(asset), Some(TokenCall::Transfer { from, to: recipient, amount })) => {
                let sender = from.unwrap_or(subject.from);
                let mut annotation = TransactionAnnotation::new(AnnotationKind::AssetTransfer {
                    sender: self.identity(sender, network).await,
                    recipient: self.identity(recipient, network).await,
                    asset_amount: AssetAmount::new(Asset::Fungible(asset), amount),
                });
                if recipient == to {
                    annotation.warn(AnnotationWarning::SendToToken);
                } else if has_code(provider, recipient).await == Some(true) {
                    annotation.warn(AnnotationWarning::SendToContract);
                }
                annotation
            }
            (Some(asset), Some(TokenCall::Approve { spender, amount })) => {
                let mut annotation = TransactionAnnotation::new(AnnotationKind::AssetApproval {
                    spender: self.identity(spender, network).await,
                    asset_amount: AssetAmount::new(Asset::Fungible(asset), amount),
                });
                if has_code(provider, spender).await == Some(false) {
                    annotation.warn(AnnotationWarning::ApproveToEoa);
                }
                annotation
            }
            _ => TransactionAnnotation::new(AnnotationKind::ContractInteraction {
                contract: self.identity(to, network).await,
            }),
        }
    }

    /// Transfers of known assets found in the logs, with identities resolved
    /// in one concurrent pass.
    async fn subannotations(&self, subject: &Subject<'_>) -> Vec<TransactionAnnotation> {
        let mut transfers: Vec<(TransferLog, Asset)> = Vec::new();
        for log in subject.logs {
            let Some(transfer) = decode_transfer_log(log) else {
                continue;
            };
            if let Some(asset) = self.assets.get(subject.network.chain_id, &transfer.contract).await {
                transfers.push((transfer, Asset::Fungible(asset)));
            }
        }
        if transfers.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let targets: Vec<AddressOnNetwork> = transfers
            .iter()
            .flat_map(|(t, _)| [t.from, t.to])
            .filter(|a| seen.insert(*a))
            .map(|a| AddressOnNetwork::new(a, subject.network.clone()))
            .collect();
        let identities = self.names.identities(&targets).await;
        let identity = |address: Address| {
            identities
                .get(&address)
                .cloned()
                .unwrap_or_else(|| crate::AddressIdentity::bare(address))
        };

        transfers
            .into_iter()
            .map(|(transfer, asset)| {
                TransactionAnnotation::new(AnnotationKind::AssetTransfer {
                    sender: identity(transfer.from),
                    recipient: identity(transfer.to),
                    asset_amount: AssetAmount::new(asset, transfer.amount),
                })
            })
            .collect()
    }

    /// Whether gas fee plus value exceeds the sender's base-asset balance.
    async fn has_insufficient_funds(
        &self,
        subject: &Subject<'_>,
        provider: Option<&dyn ProviderGateway>,
    ) -> Result<bool, AnnotationError> {
        let account = AddressOnNetwork::new(subject.from, subject.network.clone());
        let base = Asset::base_of(subject.network);
        let balance = match self.store.latest_balance(&account, &base, self.clock.now())? {
            Some(balance) => balance.asset_amount.amount,
            None => {
                let provider =
                    provider.ok_or(AnnotationError::NoProvider(subject.network.chain_id))?;
                provider.get_balance(subject.from).await?
            }
        };
        let required = subject
            .max_gas_fee
            .unwrap_or_default()
            .saturating_add(subject.value);
        Ok(required > balance)
    }

    async fn identity(&self, address: Address, network: &Network) -> crate::AddressIdentity {
        self.names
            .identity(&AddressOnNetwork::new(address, network.clone()))
            .await
    }
}

/// Whether `address` carries contract code; `None` when it cannot be told.
async fn has_code(provider: Option<&dyn ProviderGateway>, address: Address) -> Option<bool> {
    match provider?.get_code(address).await {
        Ok(code) => Some(!code.is_empty()),
        Err(e) => {
            debug!(%address, "code lookup failed: {e}");
            None
        }
    }
}

/// A contract interaction where the sender gave up one asset and received a
/// different one. Base asset sent as value counts as the given asset when no
/// token left the sender.
fn detect_swap(
    subject: &Subject<'_>,
    contract: crate::AddressIdentity,
    subannotations: &[TransactionAnnotation],
) -> Option<AnnotationKind> {
    let mut sent = None;
    let mut received = None;
    for sub in subannotations {
        if let AnnotationKind::AssetTransfer {
            sender,
            recipient,
            asset_amount,
        } = &sub.kind
        {
            if sender.address == subject.from && sent.is_none() {
                sent = Some(asset_amount.clone());
            } else if recipient.address == subject.from && received.is_none() {
                received = Some(asset_amount.clone());
            }
        }
    }
    if sent.is_none() && !subject.value.is_zero() {
        sent = Some(AssetAmount::new(Asset::base_of(subject.network), subject.value));
    }

    match (sent, received) {
        (Some(sent), Some(received)) if sent.asset != received.asset => Some(AnnotationKind::AssetSwap {
            contract,
            sent,
            received,
        }),
        _ => None,
    }
}
