//! The chain service: wires the store, providers, tracker, scanner,
//! subscriptions and annotation engine together and runs their background
//! work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coffer_annotation::abi::{balance_of_call, decode_balance_of};
use coffer_annotation::{AnnotationEngine, EnrichedSignatureRequest, EnrichedTransaction};
use coffer_gateway::{
    BatchCall, ConnectionEvent, ProviderGateway, ProviderRegistry, SignedTransaction,
    SubscriptionMessage, TransactionSigner,
};
use coffer_store::ChainStore;
use coffer_types::{
    normalize_address, AccountBalance, AddressOnNetwork, Asset, AssetAmount, Clock, DataSource,
    Network, Transaction, TransactionRequest, TxHash,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn, Instrument};

use crate::context::ChainContext;
use crate::events::{ChainEvent, EventBus};
use crate::gas::GasOracle;
use crate::metrics::ChainMetrics;
use crate::nonce::NonceAllocator;
use crate::scanner::{HistoricScanner, ScannerConfig};
use crate::scheduler::Scheduler;
use crate::shutdown::{ShutdownController, ShutdownSignal};
use crate::subscriptions::{handle_message, SubscriptionManager};
use crate::tracing_spans::{annotate_span, broadcast_span};
use crate::tracker::{TrackerConfig, TransactionTracker};
use crate::ChainError;

/// Timeout for background tasks to stop after shutdown is signalled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub tracker: TrackerConfig,
    pub scanner: ScannerConfig,
    pub drain_interval: Duration,
    pub history_sweep_interval: Duration,
    pub balance_refresh_interval: Duration,
    pub gas_refresh_interval: Duration,
    pub event_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            scanner: ScannerConfig::default(),
            drain_interval: Duration::from_secs(15),
            history_sweep_interval: Duration::from_secs(300),
            balance_refresh_interval: Duration::from_secs(60),
            gas_refresh_interval: Duration::from_secs(60),
            event_capacity: 1024,
        }
    }
}

pub struct ChainService {
    ctx: Arc<ChainContext>,
    scanner: Arc<HistoricScanner>,
    annotation: Arc<AnnotationEngine>,
    signer: Option<Arc<dyn TransactionSigner>>,
    settings: ServiceSettings,
    subscriptions: HashMap<u64, Arc<SubscriptionManager>>,
    inbound: Mutex<HashMap<u64, mpsc::UnboundedReceiver<SubscriptionMessage>>>,
    shutdown: ShutdownController,
    scheduler: Mutex<Scheduler>,
}

impl ChainService {
    pub fn new(
        store: Arc<ChainStore>,
        providers: ProviderRegistry,
        annotation: Arc<AnnotationEngine>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let events = EventBus::new(settings.event_capacity);
        let metrics = Arc::new(ChainMetrics::new());
        let tracker = Arc::new(TransactionTracker::new(
            settings.tracker,
            Arc::clone(&store),
            providers.clone(),
            Arc::clone(&clock),
            events.clone(),
            Arc::clone(&metrics),
        ));
        let scanner = Arc::new(HistoricScanner::new(
            settings.scanner,
            Arc::clone(&store),
            providers.clone(),
            Arc::clone(&tracker),
            Arc::clone(&clock),
            events.clone(),
            Arc::clone(&metrics),
        ));

        let mut subscriptions = HashMap::new();
        let mut inbound = HashMap::new();
        for network in providers.networks() {
            if let Some(provider) = providers.get(&network) {
                let (manager, messages) = SubscriptionManager::new(provider);
                subscriptions.insert(network.chain_id, Arc::new(manager));
                inbound.insert(network.chain_id, messages);
            }
        }

        let ctx = Arc::new(ChainContext {
            store,
            providers,
            clock,
            events,
            metrics,
            nonces: Arc::new(NonceAllocator::new()),
            gas: Arc::new(GasOracle::new(settings.gas_refresh_interval)),
            tracker,
        });

        Self {
            ctx,
            scanner,
            annotation,
            signer: None,
            settings,
            subscriptions,
            inbound: Mutex::new(inbound),
            shutdown: ShutdownController::new(),
            scheduler: Mutex::new(Scheduler::new()),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn context(&self) -> &Arc<ChainContext> {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.ctx.store
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.ctx.tracker
    }

    pub fn scanner(&self) -> &Arc<HistoricScanner> {
        &self.scanner
    }

    pub fn nonces(&self) -> &Arc<NonceAllocator> {
        &self.ctx.nonces
    }

    pub fn metrics(&self) -> &Arc<ChainMetrics> {
        &self.ctx.metrics
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.ctx.events.subscribe()
    }

    pub fn subscription(&self, network: &Network) -> Option<&Arc<SubscriptionManager>> {
        self.subscriptions.get(&network.chain_id)
    }

    pub fn supports(&self, network: &Network) -> bool {
        self.ctx.providers.supports(network)
    }

    // ── Accounts ────────────────────────────────────────────────────────

    /// Start tracking an account: persist it, watch its pending
    /// transactions, record its balances and scan its recent history in the
    /// background.
    pub async fn track_account(&self, account: AddressOnNetwork) -> Result<(), ChainError> {
        self.ctx.provider(&account.network)?;
        self.ctx.store.add_tracked_account(&account)?;
        info!(account = %account, "tracking account");

        if let Some(manager) = self.subscriptions.get(&account.network.chain_id) {
            if let Err(e) = manager.add_account(account.address).await {
                warn!(account = %account, error = %e, "pending-transaction subscription failed");
            }
        }
        if let Err(e) = self.refresh_balances(&account).await {
            warn!(account = %account, error = %e, "initial balance refresh failed");
        }

        let scanner = Arc::clone(&self.scanner);
        tokio::spawn(async move {
            if let Err(e) = scanner.scan_recent(&account).await {
                warn!(account = %account, error = %e, "initial history scan failed");
            }
        });
        Ok(())
    }

    /// Stop tracking an account. Its stored transactions and balances stay.
    pub async fn untrack_account(&self, account: &AddressOnNetwork) -> Result<(), ChainError> {
        self.ctx.provider(&account.network)?;
        self.ctx.store.remove_tracked_account(account)?;
        info!(account = %account, "account untracked");

        if let Some(manager) = self.subscriptions.get(&account.network.chain_id) {
            if let Err(e) = manager.remove_account(account.address).await {
                debug!(account = %account, error = %e, "unsubscribe failed");
            }
        }
        Ok(())
    }

    pub fn tracked_accounts(&self) -> Result<Vec<AddressOnNetwork>, ChainError> {
        Ok(self.ctx.store.tracked_accounts()?)
    }

    // ── Balances ────────────────────────────────────────────────────────

    /// Measure the base-asset balance and, in one batched call, the balance
    /// of every known token on the account's network.
    pub async fn refresh_balances(
        &self,
        account: &AddressOnNetwork,
    ) -> Result<Vec<AccountBalance>, ChainError> {
        let provider = self.ctx.provider(&account.network)?;
        let now = self.ctx.clock.now();
        let measured = |asset: Asset, amount| AccountBalance {
            address_on_network: account.clone(),
            asset_amount: AssetAmount::new(asset, amount),
            block_height: None,
            retrieved_at: now,
            data_source: DataSource::Provider,
        };

        let base = provider.get_balance(account.address).await?;
        let mut balances = vec![measured(Asset::base_of(&account.network), base)];

        let assets = self.annotation.assets().on_network(&account.network).await;
        if !assets.is_empty() {
            let calls: Vec<BatchCall> = assets
                .iter()
                .map(|asset| BatchCall::new(asset.contract_address, balance_of_call(account.address)))
                .collect();
            match provider.call_batch(&calls).await {
                Ok(results) => {
                    for (asset, result) in assets.into_iter().zip(results) {
                        let amount = result
                            .success
                            .then(|| decode_balance_of(&result.return_data))
                            .flatten();
                        match amount {
                            Some(amount) => balances.push(measured(Asset::Fungible(asset), amount)),
                            None => debug!(token = %asset.symbol, "token balance unavailable"),
                        }
                    }
                }
                Err(e) => warn!(account = %account, error = %e, "token balance batch failed"),
            }
        }

        for balance in &balances {
            self.ctx.store.add_balance(balance)?;
            self.ctx
                .events
                .publish(ChainEvent::AccountBalance(balance.clone()));
        }
        Ok(balances)
    }

    pub async fn refresh_all_balances(&self) {
        for account in self.supported_tracked_accounts() {
            if let Err(e) = self.refresh_balances(&account).await {
                warn!(account = %account, error = %e, "balance refresh failed");
            }
        }
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// The stored record for `hash`, or a fresh one from the provider.
    pub async fn get_or_fetch_transaction(
        &self,
        network: &Network,
        hash: TxHash,
    ) -> Result<Option<Transaction>, ChainError> {
        self.ctx.provider(network)?;
        if let Some(stored) = self.ctx.store.get_transaction(network, &hash)? {
            return Ok(Some(stored));
        }
        self.ctx.tracker.retrieve(network, hash).await
    }

    /// Populate, sign and broadcast `request`.
    ///
    /// The nonce is allocated here unless the request carries one. It is
    /// released again if the transaction never leaves: on gas estimation
    /// or signing failure, and when the network rejects the broadcast
    /// outright. A rejected transaction is stored as failed and published.
    /// A transient broadcast failure keeps the nonce and leaves the signed
    /// transaction to the lifecycle tracker.
    pub async fn sign_and_broadcast(
        &self,
        request: TransactionRequest,
    ) -> Result<Transaction, ChainError> {
        let provider = self.ctx.provider(&request.network)?;
        let signer = self.signer.clone().ok_or(ChainError::NoSigner)?;
        let span = broadcast_span(request.network.chain_id, &normalize_address(&request.from));
        self.broadcast(provider.as_ref(), signer.as_ref(), request)
            .instrument(span)
            .await
    }

    async fn broadcast(
        &self,
        provider: &dyn ProviderGateway,
        signer: &dyn TransactionSigner,
        mut request: TransactionRequest,
    ) -> Result<Transaction, ChainError> {
        let chain_id = request.network.chain_id;
        let from = request.from;
        let allocated = match request.nonce {
            Some(_) => None,
            None => {
                let nonce = self.ctx.nonces.allocate(provider, from).await?;
                self.ctx.metrics.nonces_allocated.inc();
                request.nonce = Some(nonce);
                Some(nonce)
            }
        };

        let signed = match self.populate_and_sign(provider, signer, &mut request).await {
            Ok(signed) => signed,
            Err(e) => {
                if let Some(nonce) = allocated {
                    self.ctx.nonces.release(chain_id, from, nonce).await;
                }
                return Err(e);
            }
        };

        let now = self.ctx.clock.now();
        let mut parts = signed.transaction.into_parts();
        parts.first_seen = now;
        let transaction = parts.into_transaction();
        let hash = transaction.hash();

        match provider.send_raw_transaction(&signed.raw).await {
            Ok(returned) => {
                if returned != hash {
                    warn!(%hash, %returned, "provider reported a different transaction hash");
                }
                info!(%hash, nonce = ?request.nonce, "transaction broadcast");
                let stored = self.ctx.store.add_or_update_transaction(transaction)?;
                self.ctx.tracker.enqueue(&request.network, hash, now);
                self.publish_transaction(&stored);
                Ok(stored)
            }
            Err(e) if e.is_transient() => {
                warn!(%hash, error = %e, "broadcast outcome unknown, leaving it to the tracker");
                let stored = self.ctx.store.add_or_update_transaction(transaction)?;
                self.ctx.tracker.enqueue(&request.network, hash, now);
                self.publish_transaction(&stored);
                Ok(stored)
            }
            Err(e) => {
                error!(%hash, error = %e, "broadcast rejected");
                self.ctx.metrics.broadcasts_rejected.inc();
                if let Some(nonce) = allocated {
                    self.ctx.nonces.release(chain_id, from, nonce).await;
                }
                let failed = self
                    .ctx
                    .store
                    .add_or_update_transaction(transaction.into_failed(e.to_string()))?;
                self.publish_transaction(&failed);
                Err(ChainError::Provider(e))
            }
        }
    }

    async fn populate_and_sign(
        &self,
        provider: &dyn ProviderGateway,
        signer: &dyn TransactionSigner,
        request: &mut TransactionRequest,
    ) -> Result<SignedTransaction, ChainError> {
        if request.gas_limit.is_none() {
            request.gas_limit = Some(provider.estimate_gas(request).await?);
        }
        if request.gas_price.is_none() && request.max_fee_per_gas.is_none() {
            let price = self.ctx.gas.current(provider, self.ctx.clock.now()).await?;
            request.gas_price = Some(price);
        }
        Ok(signer.sign(request).await?)
    }

    fn publish_transaction(&self, transaction: &Transaction) {
        let for_accounts = self
            .ctx
            .store
            .tracked_accounts_on(transaction.network())
            .unwrap_or_default()
            .into_iter()
            .filter(|a| transaction.body().involves(&a.address))
            .collect();
        self.ctx.events.publish(ChainEvent::Transaction {
            transaction: transaction.clone(),
            for_accounts,
        });
    }

    // ── Annotation ──────────────────────────────────────────────────────

    /// Annotate a request before it is signed and publish the result.
    pub async fn prepare_signature_request(
        &self,
        request: TransactionRequest,
    ) -> Result<EnrichedSignatureRequest, ChainError> {
        self.ctx.provider(&request.network)?;
        let span = annotate_span(request.network.chain_id, None);
        let enriched = self.annotation.enrich_request(request).instrument(span).await;
        self.ctx.metrics.annotations_produced.inc();
        self.ctx
            .events
            .publish(ChainEvent::EnrichedTransactionSignatureRequest(enriched.clone()));
        Ok(enriched)
    }

    /// Annotate an observed transaction and publish the result.
    pub async fn enrich(&self, transaction: Transaction) -> EnrichedTransaction {
        let hash = transaction.hash();
        let span = annotate_span(transaction.network().chain_id, Some(&hash));
        let enriched = self
            .annotation
            .enrich_transaction(transaction)
            .instrument(span)
            .await;
        self.ctx.metrics.annotations_produced.inc();
        self.ctx
            .events
            .publish(ChainEvent::EnrichedTransaction(enriched.clone()));
        enriched
    }

    // ── Periodic work ───────────────────────────────────────────────────

    /// Drain one batch of every network's lookup queue.
    pub async fn drain_queues(&self) {
        for network in self.ctx.providers.networks() {
            match self.ctx.tracker.drain(&network).await {
                Ok(report) if report != Default::default() => {
                    debug!(network = %network, ?report, "lookup queue drained")
                }
                Ok(_) => {}
                Err(e) => warn!(network = %network, error = %e, "lookup queue drain failed"),
            }
        }
    }

    /// Bring every tracked account's history up to date, then extend it one
    /// window further back.
    pub async fn sweep_history(&self) {
        for account in self.supported_tracked_accounts() {
            if let Err(e) = self.scanner.scan_recent(&account).await {
                warn!(account = %account, error = %e, "recent history scan failed");
                continue;
            }
            if let Err(e) = self.scanner.scan_older(&account).await {
                warn!(account = %account, error = %e, "history backfill failed");
            }
        }
    }

    pub async fn refresh_gas_prices(&self) {
        let now = self.ctx.clock.now();
        for network in self.ctx.providers.networks() {
            if let Some(provider) = self.ctx.providers.get(&network) {
                if let Err(e) = self.ctx.gas.refresh(provider.as_ref(), now).await {
                    debug!(network = %network, error = %e, "gas price refresh failed");
                }
            }
        }
    }

    fn supported_tracked_accounts(&self) -> Vec<AddressOnNetwork> {
        match self.ctx.store.tracked_accounts() {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|a| self.ctx.providers.supports(&a.network))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not read tracked accounts");
                Vec::new()
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the subscription loops, the enrichment worker and the periodic
    /// tasks. Calling it twice has no further effect.
    pub fn start(self: &Arc<Self>) {
        let inbound: Vec<(u64, mpsc::UnboundedReceiver<SubscriptionMessage>)> = self
            .inbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .collect();
        if inbound.is_empty() {
            debug!("chain service already started");
            return;
        }
        info!(networks = inbound.len(), "chain service starting");

        let mut scheduler = self.scheduler.lock().unwrap_or_else(|p| p.into_inner());

        // Subscribe before anything can publish.
        let events = self.ctx.events.subscribe();
        scheduler.spawn(
            "enrichment",
            Arc::clone(self).run_enrichment(events, self.shutdown.subscribe()),
        );

        for (chain_id, messages) in inbound {
            if let Some(manager) = self.subscriptions.get(&chain_id) {
                scheduler.spawn(
                    "subscriptions",
                    Arc::clone(self).run_subscriptions(
                        Arc::clone(manager),
                        messages,
                        self.shutdown.subscribe(),
                    ),
                );
            }
        }

        let service = Arc::clone(self);
        scheduler.schedule(
            "lookup_queue_drain",
            Duration::ZERO,
            self.settings.drain_interval,
            self.shutdown.subscribe(),
            move || {
                let service = Arc::clone(&service);
                async move { service.drain_queues().await }
            },
        );

        let service = Arc::clone(self);
        scheduler.schedule(
            "historic_scan_sweep",
            self.settings.history_sweep_interval,
            self.settings.history_sweep_interval,
            self.shutdown.subscribe(),
            move || {
                let service = Arc::clone(&service);
                async move { service.sweep_history().await }
            },
        );

        let service = Arc::clone(self);
        scheduler.schedule(
            "balance_refresh",
            self.settings.balance_refresh_interval,
            self.settings.balance_refresh_interval,
            self.shutdown.subscribe(),
            move || {
                let service = Arc::clone(&service);
                async move { service.refresh_all_balances().await }
            },
        );

        let service = Arc::clone(self);
        scheduler.schedule(
            "gas_refresh",
            Duration::ZERO,
            self.settings.gas_refresh_interval,
            self.shutdown.subscribe(),
            move || {
                let service = Arc::clone(&service);
                async move { service.refresh_gas_prices().await }
            },
        );
    }

    /// Signal every background task and wait for them to stop.
    pub async fn stop(&self) -> Result<(), ChainError> {
        info!("chain service stopping");
        self.shutdown.shutdown();
        let scheduler = std::mem::take(
            &mut *self.scheduler.lock().unwrap_or_else(|p| p.into_inner()),
        );
        if scheduler.join(SHUTDOWN_TIMEOUT).await {
            info!("chain service stopped");
            Ok(())
        } else {
            Err(ChainError::ShutdownTimeout)
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    async fn run_subscriptions(
        self: Arc<Self>,
        manager: Arc<SubscriptionManager>,
        mut messages: mpsc::UnboundedReceiver<SubscriptionMessage>,
        mut shutdown: ShutdownSignal,
    ) {
        let network = manager.network().clone();
        let mut connection = manager.provider().connection_events();
        let mut connection_open = true;
        self.connect_subscriptions(&manager).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!(network = %network, "subscription loop shutting down");
                    break;
                }
                event = connection.recv(), if connection_open => match event {
                    Ok(ConnectionEvent::Connected) => self.connect_subscriptions(&manager).await,
                    Ok(ConnectionEvent::Disconnected) => manager.mark_disconnected().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "connection events lagged, resubscribing");
                        self.connect_subscriptions(&manager).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => connection_open = false,
                },
                message = messages.recv() => match message {
                    Some(message) => handle_message(&self.ctx, &network, message).await,
                    None => break,
                },
            }
        }
    }

    async fn connect_subscriptions(&self, manager: &SubscriptionManager) {
        let tracked: Vec<_> = match self.ctx.store.tracked_accounts_on(manager.network()) {
            Ok(accounts) => accounts.into_iter().map(|a| a.address).collect(),
            Err(e) => {
                warn!(error = %e, "could not read tracked accounts");
                return;
            }
        };
        if let Err(e) = manager.connect(&tracked).await {
            warn!(network = %manager.network(), error = %e, "subscriptions not established, waiting for reconnect");
        }
    }

    /// Annotate every stored transaction that concerns a tracked account.
    async fn run_enrichment(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ChainEvent>,
        mut shutdown: ShutdownSignal,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(ChainEvent::Transaction { transaction, for_accounts })
                        if !for_accounts.is_empty() =>
                    {
                        self.enrich(transaction).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "enrichment fell behind, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}
