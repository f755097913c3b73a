mod common;

use coffer_annotation::abi::balance_of_call;
use coffer_chain::{ChainError, ChainEvent};
use coffer_gateway::{ProviderError, SignerError};
use coffer_store::Collection;
use coffer_types::{
    Asset, Clock, DataSource, FungibleAsset, Network, TransactionRequest, TransactionStage, U256,
};
use common::{addr, drain_events, Harness};

fn transfer(h: &Harness) -> TransactionRequest {
    TransactionRequest::transfer(addr(1), addr(2), U256::from(1_000u64), h.network.clone())
}

fn rejection() -> ProviderError {
    ProviderError::Rpc {
        code: -32000,
        message: "insufficient funds for gas * price + value".into(),
    }
}

#[tokio::test]
async fn broadcast_allocates_populates_and_queues() {
    let h = Harness::new();
    let sender = h.account(1);
    h.track(&sender);
    h.provider.set_transaction_count(addr(1), 3);
    let mut events = h.service.subscribe_events();

    let sent = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();

    assert_eq!(sent.body().nonce, 3);
    assert_eq!(sent.body().gas_limit, 21_000);
    assert_eq!(sent.body().gas_price, Some(U256::from(1_000_000_000u64)));
    assert_eq!(sent.first_seen(), h.clock.now());
    assert_eq!(sent.stage(), TransactionStage::SignedUnconfirmed);
    assert_eq!(h.provider.broadcasts().len(), 1);
    assert_eq!(
        h.store.get_transaction(&h.network, &sent.hash()).unwrap(),
        Some(sent.clone())
    );
    assert_eq!(h.service.tracker().queued(&h.network), vec![sent.hash()]);
    assert_eq!(h.service.metrics().nonces_allocated.get(), 1);

    let published = drain_events(&mut events);
    assert!(published.iter().any(|e| matches!(
        e,
        ChainEvent::Transaction { transaction, for_accounts }
            if transaction.hash() == sent.hash() && for_accounts.contains(&sender)
    )));

    let second = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();
    assert_eq!(second.body().nonce, 4);
}

#[tokio::test]
async fn caller_supplied_fields_are_kept() {
    let h = Harness::new();
    let request = TransactionRequest {
        nonce: Some(40),
        gas_limit: Some(50_000),
        max_fee_per_gas: Some(U256::from(7u64)),
        ..transfer(&h)
    };

    let sent = h.service.sign_and_broadcast(request).await.unwrap();

    assert_eq!(sent.body().nonce, 40);
    assert_eq!(sent.body().gas_limit, 50_000);
    assert_eq!(sent.body().gas_price, None);
    assert_eq!(h.provider.call_count("get_transaction_count"), 0);
    assert_eq!(h.provider.call_count("estimate_gas"), 0);
    assert_eq!(h.provider.call_count("gas_price"), 0);
    assert_eq!(h.service.nonces().remembered(h.network.chain_id, addr(1)).await, None);
}

#[tokio::test]
async fn rejected_broadcast_releases_the_nonce_and_records_the_failure() {
    let h = Harness::new();
    h.track(&h.account(1));
    h.provider.set_transaction_count(addr(1), 3);
    h.provider.fail_next("send_raw_transaction", rejection());
    let mut events = h.service.subscribe_events();

    let err = h.service.sign_and_broadcast(transfer(&h)).await.unwrap_err();
    assert!(matches!(err, ChainError::Provider(ProviderError::Rpc { code: -32000, .. })));
    assert_eq!(h.service.metrics().broadcasts_rejected.get(), 1);

    let failed = drain_events(&mut events)
        .into_iter()
        .find_map(|e| match e {
            ChainEvent::Transaction { transaction, .. } => Some(transaction),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed.stage(), TransactionStage::FailedConfirmation);
    assert_eq!(
        h.store.get_transaction(&h.network, &failed.hash()).unwrap(),
        Some(failed.clone())
    );
    assert!(h.service.tracker().queued(&h.network).is_empty());

    let retry = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();
    assert_eq!(retry.body().nonce, 3);
}

#[tokio::test]
async fn transient_broadcast_failure_keeps_the_nonce_and_tracks_the_transaction() {
    let h = Harness::new();
    h.provider.set_transaction_count(addr(1), 3);
    h.provider
        .fail_next("send_raw_transaction", ProviderError::Timeout);

    let sent = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();

    assert_eq!(sent.stage(), TransactionStage::SignedUnconfirmed);
    assert_eq!(h.service.tracker().queued(&h.network), vec![sent.hash()]);
    assert_eq!(
        h.service.nonces().remembered(h.network.chain_id, addr(1)).await,
        Some(3)
    );
    let next = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();
    assert_eq!(next.body().nonce, 4);
}

#[tokio::test]
async fn signing_failure_releases_the_nonce() {
    let h = Harness::new();
    h.provider.set_transaction_count(addr(1), 3);
    h.signer
        .fail_next(SignerError::Unavailable("keyring locked".into()));

    let err = h.service.sign_and_broadcast(transfer(&h)).await.unwrap_err();

    assert!(matches!(err, ChainError::Signer(SignerError::Unavailable(_))));
    assert!(h.provider.broadcasts().is_empty());
    assert!(h.records.is_empty(Collection::Transactions));
    let retry = h.service.sign_and_broadcast(transfer(&h)).await.unwrap();
    assert_eq!(retry.body().nonce, 3);
}

#[tokio::test]
async fn gas_estimation_failure_releases_the_nonce() {
    let h = Harness::new();
    h.provider.set_transaction_count(addr(1), 3);
    h.provider.fail_next(
        "estimate_gas",
        ProviderError::Rpc {
            code: 3,
            message: "execution reverted".into(),
        },
    );

    assert!(h.service.sign_and_broadcast(transfer(&h)).await.is_err());
    assert_eq!(
        h.service.nonces().remembered(h.network.chain_id, addr(1)).await,
        Some(2)
    );
    assert!(h.signer.signed().is_empty());
}

#[tokio::test]
async fn unsupported_network_is_refused_without_side_effects() {
    let h = Harness::new();
    let request = TransactionRequest {
        network: Network::polygon(),
        ..transfer(&h)
    };

    let err = h.service.sign_and_broadcast(request).await.unwrap_err();
    assert!(matches!(err, ChainError::UnsupportedNetwork(n) if n == Network::polygon()));

    let elsewhere = coffer_types::AddressOnNetwork::new(addr(1), Network::polygon());
    assert!(matches!(
        h.service.track_account(elsewhere).await,
        Err(ChainError::UnsupportedNetwork(_))
    ));
    assert!(h.service.tracked_accounts().unwrap().is_empty());
    for collection in Collection::ALL {
        assert!(h.records.is_empty(collection));
    }
    assert_eq!(h.provider.call_count("get_transaction_count"), 0);
}

#[tokio::test]
async fn broadcast_without_a_signer_is_refused() {
    let h = Harness::new();
    let service = coffer_chain::ChainService::new(
        h.store.clone(),
        coffer_gateway::ProviderRegistry::new().with(h.provider.clone()),
        std::sync::Arc::new(coffer_annotation::AnnotationEngine::new(
            coffer_gateway::ProviderRegistry::new(),
            h.assets.clone(),
            Default::default(),
            h.store.clone(),
            h.clock.clone(),
        )),
        h.clock.clone(),
        Default::default(),
    );

    let err = service.sign_and_broadcast(transfer(&h)).await.unwrap_err();
    assert!(matches!(err, ChainError::NoSigner));
    assert_eq!(h.provider.call_count("get_transaction_count"), 0);
}

#[tokio::test]
async fn balance_refresh_measures_base_and_known_tokens() {
    let h = Harness::new();
    let account = h.account(1);
    let token = FungibleAsset {
        name: "Test Dollar".into(),
        symbol: "TUSD".into(),
        decimals: 6,
        contract_address: addr(0x7070),
        chain_id: h.network.chain_id,
        logo_url: None,
    };
    let silent = FungibleAsset {
        symbol: "NOPE".into(),
        contract_address: addr(0x7071),
        ..token.clone()
    };
    h.assets.extend([token.clone(), silent]).await;
    h.provider.set_balance(addr(1), U256::from(5u64));
    h.provider.set_call_response(
        addr(0x7070),
        balance_of_call(addr(1)),
        U256::from(42u64).to_be_bytes::<32>().to_vec(),
    );
    let mut events = h.service.subscribe_events();

    let balances = h.service.refresh_balances(&account).await.unwrap();

    assert_eq!(balances.len(), 2);
    assert_eq!(balances[0].asset_amount.amount, U256::from(5u64));
    assert_eq!(balances[1].asset_amount.asset, Asset::Fungible(token.clone()));
    assert_eq!(balances[1].asset_amount.amount, U256::from(42u64));
    assert!(balances.iter().all(|b| b.data_source == DataSource::Provider));

    let stored = h
        .store
        .latest_balance(&account, &Asset::Fungible(token), h.clock.now())
        .unwrap()
        .unwrap();
    assert_eq!(stored.asset_amount.amount, U256::from(42u64));
    let published = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ChainEvent::AccountBalance(_)))
        .count();
    assert_eq!(published, 2);
}

#[tokio::test]
async fn tracking_an_account_records_balances_and_history() {
    let h = Harness::new();
    let account = h.account(1);
    h.provider.set_block_number(1_000);

    h.service.track_account(account.clone()).await.unwrap();

    assert_eq!(h.service.tracked_accounts().unwrap(), vec![account.clone()]);
    assert!(h
        .store
        .latest_balance(&account, &Asset::base_of(&h.network), h.clock.now())
        .unwrap()
        .is_some());
    for _ in 0..100 {
        if h.store.newest_scanned_block(&account).unwrap().is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.store.newest_scanned_block(&account).unwrap(), Some(980));

    h.service.untrack_account(&account).await.unwrap();
    assert!(h.service.tracked_accounts().unwrap().is_empty());
}

#[tokio::test]
async fn signature_requests_are_annotated_and_published() {
    let h = Harness::new();
    let mut events = h.service.subscribe_events();

    let enriched = h.service.prepare_signature_request(transfer(&h)).await.unwrap();

    assert_eq!(enriched.request.from, addr(1));
    assert_eq!(h.service.metrics().annotations_produced.get(), 1);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, ChainEvent::EnrichedTransactionSignatureRequest(_))));
}

#[tokio::test]
async fn stop_ends_every_background_task() {
    let h = Harness::new();
    h.service.start();
    // A second start is ignored.
    h.service.start();
    h.service.stop().await.unwrap();
}
