//! End-to-end tests for the trade service: workflow, custody and restart.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    FlakyGateway, SlowGateway, diamonds, emeralds, player, remove_if_exists, temp_store_path,
};
use trade_core::lifecycle::TradeState;
use trade_core::record::RecordError;
use trade_infra::config::TradeConfig;
use trade_infra::service::{ServiceError, TradeService, open_store};
use trade_infra::store::GatewayError;
use trade_infra::sweeper::SweeperStop;

async fn service() -> (TradeService, Arc<FlakyGateway>) {
    let gateway = FlakyGateway::new();
    let svc = TradeService::start(TradeConfig::default(), gateway.clone())
        .await
        .unwrap();
    (svc, gateway)
}

// --- Create ------------------------------------------------------------

#[tokio::test]
async fn test_create_takes_initiator_staged_items() {
    let (svc, gateway) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(3)]);

    let record = svc.create_trade(&alice, &bob).await.unwrap();
    assert_eq!(record.trade_id(), 1);
    assert_eq!(record.state(), TradeState::Pending);
    assert_eq!(record.player1_items(), vec![diamonds(3)]);
    assert!(!svc.registry().has_staged_items(&alice));

    let stored = gateway.inner.get(1).unwrap();
    assert_eq!(stored.state, "PENDING");
    assert_eq!(stored.player1, "alice");
}

#[tokio::test]
async fn test_self_trade_is_rejected() {
    let (svc, _) = service().await;
    let alice = player("alice");
    assert!(matches!(
        svc.create_trade(&alice, &alice).await,
        Err(ServiceError::SelfTrade { .. })
    ));
}

#[tokio::test]
async fn test_second_open_trade_between_same_pair_is_rejected() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.create_trade(&alice, &bob).await.unwrap();

    assert!(matches!(
        svc.create_trade(&bob, &alice).await,
        Err(ServiceError::AlreadyPaired { .. })
    ));
    // Other pairs are unaffected.
    assert!(svc.create_trade(&alice, &player("carol")).await.is_ok());
}

#[tokio::test]
async fn test_pair_may_trade_again_after_settlement() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let first = svc.create_trade(&alice, &bob).await.unwrap();
    svc.cancel_trade(first.trade_id()).await.unwrap();

    let second = svc.create_trade(&alice, &bob).await.unwrap();
    assert_eq!(second.trade_id(), 2);
}

// --- Accept ------------------------------------------------------------

#[tokio::test]
async fn test_accept_by_invitee_activates_trade() {
    let (svc, gateway) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();

    svc.stage_items(&bob, &[emeralds(5)]);
    let record = svc.accept_trade(id, &bob).await.unwrap();

    assert_eq!(record.state(), TradeState::Active);
    assert_eq!(record.player2_items(), vec![emeralds(5)]);
    assert_eq!(svc.registry().state(id), TradeState::Active);
    assert_eq!(gateway.inner.get(id).unwrap().state, "ACTIVE");
}

#[tokio::test]
async fn test_accept_by_wrong_player_is_rejected() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();

    assert!(matches!(
        svc.accept_trade(id, &alice).await,
        Err(ServiceError::NotInvitee { .. })
    ));
    assert!(matches!(
        svc.accept_trade(id, &player("mallory")).await,
        Err(ServiceError::NotParticipant { .. })
    ));
    assert_eq!(
        svc.accept_trade(99, &bob).await.unwrap_err(),
        ServiceError::UnknownTrade { trade_id: 99 }
    );
}

#[tokio::test]
async fn test_accept_twice_is_an_illegal_transition() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.accept_trade(id, &bob).await.unwrap();

    svc.stage_items(&bob, &[emeralds(1)]);
    assert!(matches!(
        svc.accept_trade(id, &bob).await,
        Err(ServiceError::IllegalTransition {
            from: TradeState::Active,
            to: TradeState::Active,
            ..
        })
    ));
    // Rejected before staging was touched.
    assert!(svc.registry().has_staged_items(&bob));
}

// --- Settle and claim --------------------------------------------------

#[tokio::test]
async fn test_completed_trade_swaps_items_once() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(3)]);
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.stage_items(&bob, &[emeralds(5)]);
    svc.accept_trade(id, &bob).await.unwrap();

    let done = svc.complete_trade(id).await.unwrap();
    assert_eq!(done.state(), TradeState::Completed);
    assert!(!svc.registry().is_valid(id));

    assert_eq!(svc.claim_items(id, &alice).await.unwrap(), vec![emeralds(5)]);
    assert_eq!(svc.claim_items(id, &bob).await.unwrap(), vec![diamonds(3)]);
    assert!(matches!(
        svc.claim_items(id, &alice).await,
        Err(ServiceError::Record(RecordError::AlreadySent { .. }))
    ));
}

#[tokio::test]
async fn test_complete_from_pending_is_rejected() {
    let (svc, _) = service().await;
    let id = svc
        .create_trade(&player("alice"), &player("bob"))
        .await
        .unwrap()
        .trade_id();
    assert_eq!(
        svc.complete_trade(id).await.unwrap_err(),
        ServiceError::IllegalTransition {
            trade_id: id,
            from: TradeState::Pending,
            to: TradeState::Completed,
        }
    );
}

#[tokio::test]
async fn test_cancelled_trade_returns_own_items() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(3)]);
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();

    svc.cancel_trade(id).await.unwrap();
    assert_eq!(svc.claim_items(id, &alice).await.unwrap(), vec![diamonds(3)]);
    assert!(svc.claim_items(id, &bob).await.unwrap().is_empty());
    assert!(matches!(
        svc.cancel_trade(id).await,
        Err(ServiceError::IllegalTransition { .. })
    ));
}

#[tokio::test]
async fn test_claim_before_settlement_is_rejected() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    assert!(matches!(
        svc.claim_items(id, &alice).await,
        Err(ServiceError::Record(RecordError::NotSettled { .. }))
    ));
    assert!(matches!(
        svc.claim_items(id, &player("mallory")).await,
        Err(ServiceError::NotParticipant { .. })
    ));
}

#[tokio::test]
async fn test_settlement_keeps_unrelated_staging() {
    let (svc, _) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.stage_items(&bob, &[emeralds(2)]);

    svc.cancel_trade(id).await.unwrap();
    assert_eq!(svc.withdraw_staged_items(&bob), vec![emeralds(2)]);
}

// --- Custody on write failure ------------------------------------------

#[tokio::test]
async fn test_failed_create_restages_items_and_burns_id() {
    let (svc, gateway) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(3)]);

    gateway.fail_upserts(true);
    let err = svc.create_trade(&alice, &bob).await.unwrap_err();
    assert!(matches!(err, ServiceError::Gateway(GatewayError::WriteFailed { .. })));

    assert_eq!(svc.registry().peek_staged_items(&alice), vec![diamonds(3)]);
    assert!(!svc.registry().are_players_paired(&alice, &bob));
    assert!(svc.registry().is_empty());
    assert_eq!(svc.custody_rollbacks_total(), 1);

    gateway.fail_upserts(false);
    let record = svc.create_trade(&alice, &bob).await.unwrap();
    assert_eq!(record.trade_id(), 2);
    assert_eq!(record.player1_items(), vec![diamonds(3)]);
}

#[tokio::test]
async fn test_failed_accept_restages_items_and_stays_pending() {
    let (svc, gateway) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.stage_items(&bob, &[emeralds(5)]);

    gateway.fail_upserts(true);
    assert!(svc.accept_trade(id, &bob).await.is_err());

    assert_eq!(svc.registry().peek_staged_items(&bob), vec![emeralds(5)]);
    assert_eq!(svc.registry().state(id), TradeState::Pending);
    assert_eq!(gateway.inner.get(id).unwrap().state, "PENDING");
    let cached = svc.load_trade(id).await.unwrap().unwrap();
    assert_eq!(cached.state(), TradeState::Pending);

    gateway.fail_upserts(false);
    let record = svc.accept_trade(id, &bob).await.unwrap();
    assert_eq!(record.player2_items(), vec![emeralds(5)]);
}

#[tokio::test]
async fn test_failed_claim_hands_out_nothing() {
    let (svc, gateway) = service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(3)]);
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.cancel_trade(id).await.unwrap();

    gateway.fail_upserts(true);
    assert!(matches!(
        svc.claim_items(id, &alice).await,
        Err(ServiceError::Gateway(_))
    ));
    assert!(!gateway.inner.get(id).unwrap().items_sent_to_player1);

    gateway.fail_upserts(false);
    assert_eq!(svc.claim_items(id, &alice).await.unwrap(), vec![diamonds(3)]);
    assert!(gateway.inner.get(id).unwrap().items_sent_to_player1);
}

// --- Reads -------------------------------------------------------------

#[tokio::test]
async fn test_load_trade_falls_back_to_store() {
    let (svc, _) = service().await;
    let id = svc
        .create_trade(&player("alice"), &player("bob"))
        .await
        .unwrap()
        .trade_id();

    svc.cache().clear();
    let loaded = svc.load_trade(id).await.unwrap().unwrap();
    assert_eq!(loaded.trade_id(), id);
    assert_eq!(svc.cache().len(), 1);
    assert_eq!(svc.load_trade(404).await.unwrap(), None);
}

#[tokio::test]
async fn test_trades_for_lists_player_history() {
    let (svc, _) = service().await;
    let (alice, bob, carol) = (player("alice"), player("bob"), player("carol"));
    let t1 = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.create_trade(&bob, &carol).await.unwrap();
    let t3 = svc.create_trade(&carol, &alice).await.unwrap().trade_id();
    svc.cancel_trade(t1).await.unwrap();

    let ids: Vec<u64> = svc
        .trades_for(&alice)
        .await
        .unwrap()
        .iter()
        .map(|r| r.trade_id())
        .collect();
    assert_eq!(ids, vec![t1, t3]);
}

async fn slow_service() -> (Arc<TradeService>, Arc<SlowGateway>) {
    let gateway = SlowGateway::new();
    let svc = TradeService::start(TradeConfig::default(), gateway.clone())
        .await
        .unwrap();
    (Arc::new(svc), gateway)
}

#[tokio::test]
async fn test_held_store_read_cannot_resurrect_claimed_items() {
    let (svc, gateway) = slow_service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    svc.stage_items(&alice, &[diamonds(2)]);
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.stage_items(&bob, &[emeralds(3)]);
    svc.accept_trade(id, &bob).await.unwrap();
    svc.complete_trade(id).await.unwrap();
    svc.cache().remove(id);

    gateway.arm();
    let reader = tokio::spawn({
        let svc = Arc::clone(&svc);
        async move { svc.load_trade(id).await }
    });
    gateway.wait_until_held().await;

    let claimer = tokio::spawn({
        let svc = Arc::clone(&svc);
        let alice = alice.clone();
        async move { svc.claim_items(id, &alice).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    gateway.release();

    reader.await.unwrap().unwrap();
    assert_eq!(claimer.await.unwrap().unwrap(), vec![emeralds(3)]);
    assert!(matches!(
        svc.claim_items(id, &alice).await,
        Err(ServiceError::Record(RecordError::AlreadySent { .. }))
    ));
    assert!(gateway.inner.get(id).unwrap().items_sent_to_player1);
}

#[tokio::test]
async fn test_held_store_read_cannot_revive_cancelled_trade() {
    let (svc, gateway) = slow_service().await;
    let (alice, bob) = (player("alice"), player("bob"));
    let id = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
    svc.cache().remove(id);

    gateway.arm();
    let reader = tokio::spawn({
        let svc = Arc::clone(&svc);
        async move { svc.load_trade(id).await }
    });
    gateway.wait_until_held().await;

    let canceller = tokio::spawn({
        let svc = Arc::clone(&svc);
        async move { svc.cancel_trade(id).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    gateway.release();

    reader.await.unwrap().unwrap();
    let cancelled = canceller.await.unwrap().unwrap();
    assert_eq!(cancelled.state(), TradeState::Cancelled);
    assert!(!svc.registry().is_valid(id));
    assert!(!svc.registry().are_players_paired(&alice, &bob));
    assert_eq!(
        svc.load_trade(id).await.unwrap().unwrap().state(),
        TradeState::Cancelled
    );
    svc.create_trade(&alice, &bob).await.unwrap();
}

// --- Lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_shutdown_stops_sweeper_once() {
    let (svc, _) = service().await;
    svc.create_trade(&player("alice"), &player("bob"))
        .await
        .unwrap();

    assert_eq!(svc.shutdown().await, Some(SweeperStop::Stopped));
    assert!(svc.registry().is_empty());
    assert!(svc.cache().is_empty());
    assert_eq!(svc.shutdown().await, None);
}

#[tokio::test]
async fn test_restart_resumes_ids_and_pairing() {
    let path = temp_store_path("restart");
    remove_if_exists(&path);
    let config = TradeConfig {
        store_path: Some(path.clone()),
        ..TradeConfig::default()
    };
    let (alice, bob) = (player("alice"), player("bob"));

    let open_id = {
        let svc = TradeService::start(config.clone(), open_store(&config).unwrap())
            .await
            .unwrap();
        svc.stage_items(&alice, &[diamonds(1)]);
        let open = svc.create_trade(&alice, &bob).await.unwrap().trade_id();
        let other = svc
            .create_trade(&alice, &player("carol"))
            .await
            .unwrap()
            .trade_id();
        svc.cancel_trade(other).await.unwrap();
        svc.shutdown().await;
        open
    };

    let svc = TradeService::start(config.clone(), open_store(&config).unwrap())
        .await
        .unwrap();
    assert!(matches!(
        svc.create_trade(&bob, &alice).await,
        Err(ServiceError::AlreadyPaired { .. })
    ));
    let fresh = svc.create_trade(&bob, &player("dave")).await.unwrap();
    assert_eq!(fresh.trade_id(), 3);

    let reloaded = svc.load_trade(open_id).await.unwrap().unwrap();
    assert_eq!(reloaded.player1_items(), vec![diamonds(1)]);
    svc.accept_trade(open_id, &bob).await.unwrap();

    svc.shutdown().await;
    remove_if_exists(&path);
}
