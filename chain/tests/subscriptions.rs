mod common;

use std::time::Duration;

use coffer_chain::subscriptions::{on_new_head, on_pending_transaction};
use coffer_chain::{ChainEvent, ConnectionState};
use coffer_gateway::{ProviderError, RpcBlock, SubscriptionTopic};
use coffer_nullables::fixtures::{rpc_block, rpc_transaction};
use coffer_types::B256;
use common::{addr, drain_events, hash, Harness, START_SECS};

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn connect_subscribes_heads_and_each_tracked_address() {
    let h = Harness::new();
    let manager = h.service.subscription(&h.network).unwrap();

    manager.connect(&[addr(1), addr(2)]).await.unwrap();

    assert_eq!(manager.state().await, ConnectionState::Subscribed);
    let topics = h.provider.subscription_topics();
    assert_eq!(topics.len(), 3);
    assert!(topics.contains(&SubscriptionTopic::NewHeads));
    assert!(topics.contains(&SubscriptionTopic::PendingTransactions { address: addr(2) }));
}

#[tokio::test]
async fn reconnect_subscribes_the_current_tracked_set_from_scratch() {
    let h = Harness::new();
    let manager = h.service.subscription(&h.network).unwrap();
    manager.connect(&[addr(1)]).await.unwrap();

    h.provider.disconnect();
    manager.mark_disconnected().await;
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
    assert!(manager.active_topics().await.is_empty());

    // Added while disconnected: picked up by the next connect.
    manager.add_account(addr(2)).await.unwrap();
    assert!(h.provider.subscription_topics().is_empty());

    h.provider.connect();
    manager.connect(&[addr(1), addr(2)]).await.unwrap();
    assert_eq!(h.provider.subscription_topics().len(), 3);
    assert_eq!(h.provider.call_count("unsubscribe"), 0);
}

#[tokio::test]
async fn failed_subscribe_leaves_the_manager_disconnected() {
    let h = Harness::new();
    let manager = h.service.subscription(&h.network).unwrap();
    h.provider.disconnect();

    assert!(manager.connect(&[addr(1)]).await.is_err());
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn rejected_pending_feed_keeps_new_heads_subscribed() {
    let h = Harness::new();
    let manager = h.service.subscription(&h.network).unwrap();
    h.provider.reject_pending_feed(Some(ProviderError::Rpc {
        code: -32601,
        message: "the method alchemy_pendingTransactions does not exist".into(),
    }));

    manager.connect(&[addr(1), addr(2)]).await.unwrap();

    assert_eq!(manager.state().await, ConnectionState::Subscribed);
    assert_eq!(manager.active_topics().await, vec![SubscriptionTopic::NewHeads]);
    assert_eq!(h.provider.subscription_topics(), vec![SubscriptionTopic::NewHeads]);
    assert_eq!(h.provider.call_count("unsubscribe"), 0);

    // Accounts tracked later are skipped the same way.
    manager.add_account(addr(3)).await.unwrap();
    assert_eq!(manager.active_topics().await, vec![SubscriptionTopic::NewHeads]);
}

#[tokio::test]
async fn running_service_follows_heads_without_a_pending_feed() {
    let h = Harness::new();
    h.track(&h.account(1));
    h.provider.reject_pending_feed(Some(ProviderError::Rpc {
        code: -32601,
        message: "method not found".into(),
    }));
    h.service.start();

    let provider = h.provider.clone();
    wait_for(|| provider.subscription_topics() == vec![SubscriptionTopic::NewHeads]).await;
    h.provider.emit_new_head(rpc_block(400, START_SECS));

    let store = h.store.clone();
    let network = h.network.clone();
    wait_for(|| store.blocks_at_height(&network, 400).unwrap().len() == 1).await;
    h.service.stop().await.unwrap();
}

#[tokio::test]
async fn running_service_resubscribes_after_the_connection_returns() {
    let h = Harness::new();
    h.track(&h.account(1));
    h.service.start();

    let provider = h.provider.clone();
    wait_for(|| provider.subscription_topics().len() == 2).await;

    h.provider.disconnect();
    wait_for(|| provider.subscription_topics().is_empty()).await;
    h.track(&h.account(2));
    h.provider.connect();
    wait_for(|| provider.subscription_topics().len() == 3).await;

    h.service.stop().await.unwrap();
}

#[tokio::test]
async fn running_service_persists_heads_and_pending_transactions() {
    let h = Harness::new();
    h.track(&h.account(1));
    let mut events = h.service.subscribe_events();
    h.service.start();

    let provider = h.provider.clone();
    wait_for(|| provider.subscription_topics().len() == 2).await;

    h.provider.emit_new_head(rpc_block(200, START_SECS));
    h.provider
        .emit_pending(rpc_transaction(hash(1), addr(1), Some(addr(5)), 12));

    let store = h.store.clone();
    let network = h.network.clone();
    wait_for(|| store.blocks_at_height(&network, 200).unwrap().len() == 1).await;
    // Queued, or already drained into the store.
    let tracker = h.service.tracker().clone();
    wait_for(|| {
        tracker.queued(&network).contains(&hash(1))
            || store.get_transaction(&network, &hash(1)).unwrap().is_some()
    })
    .await;
    assert_eq!(
        h.service.nonces().remembered(h.network.chain_id, addr(1)).await,
        Some(12)
    );

    h.service.stop().await.unwrap();
    let published = drain_events(&mut events);
    assert!(published.iter().any(|e| matches!(e, ChainEvent::Block(b) if b.height == 200)));
}

#[tokio::test]
async fn competing_block_at_a_known_height_is_counted_as_a_reorg() {
    let h = Harness::new();
    let mut events = h.service.subscribe_events();
    let ctx = h.service.context();

    on_new_head(ctx, &h.network, rpc_block(300, START_SECS)).await;
    let competitor = RpcBlock {
        hash: Some(B256::repeat_byte(0xee)),
        ..rpc_block(300, START_SECS + 1)
    };
    on_new_head(ctx, &h.network, competitor.clone()).await;
    // Seen again: nothing new.
    on_new_head(ctx, &h.network, competitor).await;

    assert_eq!(h.service.metrics().reorgs_detected.get(), 1);
    assert_eq!(h.service.metrics().blocks_observed.get(), 2);
    assert_eq!(h.store.blocks_at_height(&h.network, 300).unwrap().len(), 2);
    let blocks = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ChainEvent::Block(_)))
        .count();
    assert_eq!(blocks, 2);
}

#[tokio::test]
async fn pending_transaction_of_a_tracked_sender_reconciles_its_nonce() {
    let h = Harness::new();
    h.track(&h.account(1));
    let ctx = h.service.context();
    let chain_id = h.network.chain_id;

    on_pending_transaction(ctx, &h.network, rpc_transaction(hash(1), addr(1), Some(addr(2)), 7)).await;
    on_pending_transaction(ctx, &h.network, rpc_transaction(hash(2), addr(3), Some(addr(1)), 9)).await;

    assert_eq!(h.service.nonces().remembered(chain_id, addr(1)).await, Some(7));
    assert_eq!(h.service.nonces().remembered(chain_id, addr(3)).await, None);
    assert_eq!(h.service.tracker().queued(&h.network), vec![hash(1), hash(2)]);

    // The next allocation continues after the observed nonce.
    h.provider.set_transaction_count(addr(1), 5);
    let next = h
        .service
        .nonces()
        .allocate(h.provider.as_ref(), addr(1))
        .await
        .unwrap();
    assert_eq!(next, 8);
}
