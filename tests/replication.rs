//! End-to-end replication flows against the fake ledger:
//! start → leader event → replica submitted → audit/notify → stop.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, start_request, FakeLedger, Harness, ENDPOINT, FOLLOWER, LEADER};
use ledger_mirror::storage::AuditLog;
use ledger_mirror::types::{BotState, ControlResponse, LeaderEvent, MirrorError, TF_SET_NO_RIPPLE};

#[tokio::test]
async fn test_payment_replicated_at_percentage() {
    let h = Harness::new(FakeLedger::new()).await;
    let mut observer = h.notifier.subscribe();

    let resp = h.registry.start(start_request("user-1", 25)).await.unwrap();
    assert_eq!(resp, ControlResponse::started("user-1"));

    assert!(
        h.ledger
            .push(LeaderEvent::new(
                LEADER,
                "Payment",
                json!({"Amount": "1000000", "Destination": "rMerchant"}),
            ))
            .await
    );
    eventually(|| h.ledger.submitted().len() == 1).await;

    let tx = &h.ledger.submitted()[0];
    assert_eq!(tx["TransactionType"], "Payment");
    assert_eq!(tx["Account"], FOLLOWER);
    assert_eq!(tx["Destination"], FOLLOWER);
    assert_eq!(tx["Amount"], "250000");
    assert_eq!(tx["Sequence"], 10);
    // ledger_current 100 + offset 20 + expiry buffer 20
    assert_eq!(tx["LastLedgerSequence"], 140);

    let note = tokio::time::timeout(Duration::from_secs(2), observer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.follower_id, "user-1");
    assert_eq!(note.trade_type, "Payment");
    assert_eq!(note.result["engine_result"], "tesSUCCESS");

    let logs = h.audit.recent_trades(Some("user-1".into()), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].trade_type, "Payment");
    assert_eq!(logs[0].tx_hash.as_deref(), Some("HASH1"));

    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_offer_create_scaled_and_cancel_passed_through() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 50)).await.unwrap();

    h.ledger
        .push(LeaderEvent::new(
            LEADER,
            "OfferCreate",
            json!({
                "TakerGets": "5000000",
                "TakerPays": {"currency": "USD", "issuer": "rIssuer", "value": "10"}
            }),
        ))
        .await;
    h.ledger
        .push(LeaderEvent::new(LEADER, "OfferCancel", json!({"Sequence": 555})))
        .await;
    eventually(|| h.ledger.submitted().len() == 2).await;

    let submitted = h.ledger.submitted();
    assert_eq!(submitted[0]["TakerGets"], "5000000");
    assert_eq!(submitted[0]["TakerPays"]["value"], "5");
    assert_eq!(submitted[1]["TransactionType"], "OfferCancel");
    assert_eq!(submitted[1]["OfferSequence"], 555);

    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_foreign_and_unsupported_events_are_not_replicated() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    // Incoming payment sent by someone else to the leader
    h.ledger
        .push(LeaderEvent::new(
            "rSomeoneElsexxxxxxxxxxxxxxxxxx",
            "Payment",
            json!({"Amount": "1000000", "Destination": LEADER}),
        ))
        .await;
    h.ledger.push(LeaderEvent::new(LEADER, "AccountSet", json!({}))).await;
    let mut provisional = LeaderEvent::new(LEADER, "Payment", json!({"Amount": "500"}));
    provisional.validated = false;
    h.ledger.push(provisional).await;

    // Processed in order, so once this lands the earlier ones were seen.
    h.ledger
        .push(LeaderEvent::new(LEADER, "OfferCancel", json!({"Sequence": 7})))
        .await;
    eventually(|| !h.ledger.submitted().is_empty()).await;

    let submitted = h.ledger.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["TransactionType"], "OfferCancel");

    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_existing_trust_line_is_not_resubmitted() {
    let ledger = FakeLedger::new().with_trust_line("USD", "rIssuer");
    let h = Harness::new(ledger).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    for currency in ["USD", "EUR"] {
        h.ledger
            .push(LeaderEvent::new(
                LEADER,
                "TrustSet",
                json!({"LimitAmount": {"currency": currency, "issuer": "rIssuer", "value": "500"}}),
            ))
            .await;
    }
    eventually(|| !h.ledger.submitted().is_empty()).await;

    let submitted = h.ledger.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["LimitAmount"]["currency"], "EUR");
    assert_eq!(submitted[0]["LimitAmount"]["value"], "1000000000");
    assert_eq!(submitted[0]["Flags"], TF_SET_NO_RIPPLE);

    // The skipped duplicate leaves no trade log
    let logs = h.audit.recent_trades(None, 10).await.unwrap();
    assert_eq!(logs.len(), 1);

    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_concurrent_starts_admit_exactly_one() {
    let ledger = FakeLedger::new().with_connect_delay(Duration::from_millis(100));
    let h = Harness::new(ledger).await;

    let (a, b) = tokio::join!(
        h.registry.start(start_request("user-1", 25)),
        h.registry.start(start_request("user-1", 50)),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(MirrorError::AlreadyRunning(_))))
            .count(),
        1
    );
    assert_eq!(h.registry.list().await.len(), 1);

    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_start_after_running_is_rejected() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    let err = h.registry.start(start_request("user-1", 25)).await.unwrap_err();
    assert!(matches!(err, MirrorError::AlreadyRunning(ref u) if u == "user-1"));

    // Other users are independent
    h.registry.start(start_request("user-2", 25)).await.unwrap();
    assert_eq!(h.registry.list().await.len(), 2);

    h.registry.stop_all().await;
    assert!(h.registry.list().await.is_empty());
}

#[tokio::test]
async fn test_stop_unknown_user_reports_not_found() {
    let h = Harness::new(FakeLedger::new()).await;
    let resp = h.registry.stop("nobody").await;
    assert_eq!(resp, ControlResponse::not_found("nobody"));
    assert_eq!(resp.message, "No active copy trading bot found for user");
}

#[tokio::test]
async fn test_unreachable_endpoints_release_reservation() {
    let ledger = FakeLedger::new();
    ledger.take_down(ENDPOINT);
    let h = Harness::new(ledger).await;

    let err = h.registry.start(start_request("user-1", 25)).await.unwrap_err();
    assert!(matches!(err, MirrorError::Connection(_)));
    assert!(h.registry.list().await.is_empty());
    assert_eq!(h.registry.state("user-1").await, None);
}

#[tokio::test]
async fn test_stop_tears_down_and_nothing_is_submitted_after() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();
    assert_eq!(h.registry.state("user-1").await, Some(BotState::Subscribed));
    assert!(h.ledger.is_subscribed());

    let resp = h.registry.stop("user-1").await;
    assert_eq!(resp, ControlResponse::stopped("user-1"));
    assert_eq!(h.registry.state("user-1").await, None);
    assert_eq!(h.ledger.unsubscribes(), 1);
    assert_eq!(h.ledger.disconnects(), 1);

    // The feed is gone: late events have nowhere to go
    let delivered = h
        .ledger
        .push(LeaderEvent::new(LEADER, "Payment", json!({"Amount": "1000000"})))
        .await;
    assert!(!delivered);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.ledger.submitted().is_empty());
}

#[tokio::test]
async fn test_stop_while_connecting_cancels_start() {
    let ledger = FakeLedger::new().with_connect_delay(Duration::from_millis(100));
    let h = Harness::new(ledger).await;

    let registry = Arc::clone(&h.registry);
    let starting = tokio::spawn(async move { registry.start(start_request("user-1", 25)).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.registry.state("user-1").await, Some(BotState::Connecting));
    assert_eq!(h.registry.stop("user-1").await, ControlResponse::stopped("user-1"));

    let result = starting.await.unwrap();
    assert!(matches!(result, Err(MirrorError::Cancelled(_))));
    assert!(h.registry.list().await.is_empty());
    assert_eq!(h.ledger.disconnects(), 1);
}

#[tokio::test]
async fn test_bot_config_is_audited_without_secret() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    let bots = h.registry.list().await;
    assert_eq!(bots[0].leader_address, LEADER);
    let listed = serde_json::to_string(&bots).unwrap();
    assert!(!listed.contains("sEdFakeSecretSeed"));

    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT user_id || '|' || leader_address || '|' || copy_percentage || '|' || \
         endpoints || '|' || created_at FROM copy_trading_strategies",
    )
    .fetch_all(h.audit.pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("user-1|"));
    assert!(rows[0].contains(LEADER));
    assert!(rows[0].contains(ENDPOINT));
    assert!(!rows[0].contains("sEdFakeSecretSeed"));

    h.registry.stop("user-1").await;
}

fn native_payment(drops: &str) -> LeaderEvent {
    LeaderEvent::new(LEADER, "Payment", json!({"Amount": drops, "Destination": "rMerchant"}))
}

#[tokio::test]
async fn test_restart_rejected_until_in_flight_submission_finishes() {
    let ledger = FakeLedger::new().with_tx_delay(Duration::from_millis(300));
    let h = Harness::new(ledger).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    h.ledger.push(native_payment("1000000")).await;
    // Submitted, now waiting on validation
    eventually(|| h.ledger.submitted().len() == 1).await;

    let registry = Arc::clone(&h.registry);
    let stopping = tokio::spawn(async move { registry.stop("user-1").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h.registry.start(start_request("user-1", 50)).await.unwrap_err();
    assert!(matches!(err, MirrorError::AlreadyRunning(ref u) if u == "user-1"));
    assert_eq!(h.registry.list().await.len(), 1);

    assert_eq!(stopping.await.unwrap(), ControlResponse::stopped("user-1"));
    assert_eq!(h.ledger.disconnects(), 1);

    // Old bot fully gone: the restart goes through
    h.registry.start(start_request("user-1", 50)).await.unwrap();
    assert_eq!(h.registry.state("user-1").await, Some(BotState::Subscribed));
    h.registry.stop("user-1").await;
}

#[tokio::test]
async fn test_stop_during_submission_records_it() {
    let ledger = FakeLedger::new().with_tx_delay(Duration::from_millis(200));
    let h = Harness::new(ledger).await;
    let mut observer = h.notifier.subscribe();
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    h.ledger.push(native_payment("1000000")).await;
    eventually(|| h.ledger.submitted().len() == 1).await;

    assert_eq!(h.registry.stop("user-1").await, ControlResponse::stopped("user-1"));

    // The in-flight attempt completed and was audited before stop returned
    assert_eq!(h.ledger.submitted().len(), 1);
    let logs = h.audit.recent_trades(Some("user-1".into()), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].tx_hash.as_deref(), Some("HASH1"));
    assert_eq!(logs[0].result["engine_result"], "tesSUCCESS");
    assert_eq!(observer.try_recv().unwrap().trade_type, "Payment");

    assert_eq!(h.registry.state("user-1").await, None);
    assert_eq!(h.ledger.unsubscribes(), 1);
    assert_eq!(h.ledger.disconnects(), 1);
}

#[tokio::test]
async fn test_dropped_feed_leaves_bot_registered_and_inert() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 25)).await.unwrap();

    h.ledger.drop_feed();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still listed, but nothing reaches it any more
    assert_eq!(h.registry.state("user-1").await, Some(BotState::Subscribed));
    assert_eq!(h.registry.list().await.len(), 1);
    assert!(!h.ledger.push(native_payment("1000000")).await);
    assert!(h.ledger.submitted().is_empty());

    assert_eq!(h.registry.stop("user-1").await, ControlResponse::stopped("user-1"));
    assert_eq!(h.registry.state("user-1").await, None);
    assert_eq!(h.ledger.unsubscribes(), 1);
    assert_eq!(h.ledger.disconnects(), 1);
}

#[tokio::test]
async fn test_oversized_amount_does_not_kill_bot() {
    let h = Harness::new(FakeLedger::new()).await;
    h.registry.start(start_request("user-1", 99)).await.unwrap();

    h.ledger
        .push(LeaderEvent::new(
            LEADER,
            "Payment",
            json!({
                "Amount": {
                    "currency": "USD",
                    "issuer": "rIssuer",
                    "value": "1000000000000000000000000000"
                },
                "Destination": "rMerchant"
            }),
        ))
        .await;
    h.ledger.push(native_payment("1000000")).await;
    eventually(|| !h.ledger.submitted().is_empty()).await;

    let submitted = h.ledger.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["Amount"], "990000");
    assert_eq!(h.registry.list().await.len(), 1);

    h.registry.stop("user-1").await;
}
