//! End-to-end settlement journeys across notification sources, plus the
//! concurrency properties the ledger and the status machine guarantee:
//! replayed notifications credit once, debits never overdraw, and the
//! ledger chain stays consistent under contention.

mod common;

use std::sync::Arc;

use common::{failed_notification, success_notification, test_env, TestEnv, TEST_USER};
use giftbay_settlement::database::store::{
    LedgerReference, PaymentEventType, WalletKind, WalletStore,
};
use giftbay_settlement::gateway::client::GatewayApi;
use giftbay_settlement::gateway::payload::parse_amount;
use giftbay_settlement::gateway::types::{PayerInfo, TxnStatus};
use giftbay_settlement::services::{InitiateCommand, SettlementError};

async fn initiate(env: &TestEnv, amount: &str, tag: &str, reference: Option<&str>) -> String {
    env.settlement
        .initiate(
            TEST_USER,
            InitiateCommand {
                amount: parse_amount(amount).expect("test amount"),
                purpose_tag: Some(tag.to_string()),
                purpose_ref: reference.map(str::to_string),
                payer: PayerInfo::default(),
            },
        )
        .await
        .expect("initiate")
        .transaction
        .client_txn_id
}

async fn customer_balance(env: &TestEnv) -> i64 {
    env.wallets
        .balance(WalletKind::Customer, TEST_USER)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_topup_journey_leaves_full_audit_trail() {
    let env = test_env();
    let txn_id = initiate(&env, "500.00", "WALLET_TOPUP", None).await;

    // gateway settles through the webhook first
    let webhook = success_notification(&env, &txn_id, "500.00");
    let outcome = env
        .settlement
        .settle_notification(&webhook, PaymentEventType::Webhook)
        .await
        .expect("webhook settles");
    assert!(outcome.first_success);
    assert_eq!(customer_balance(&env).await, 50_000);

    // the browser callback lands later with the same payload
    let callback = success_notification(&env, &txn_id, "500.00");
    let replay = env
        .settlement
        .settle_notification(&callback, PaymentEventType::Callback)
        .await
        .expect("callback replays");
    assert!(!replay.first_success);
    assert_eq!(replay.status, TxnStatus::Success);
    assert_eq!(customer_balance(&env).await, 50_000);

    // the customer double-checks; inquiry answers SUCCESS again
    env.gateway.script_inquiry(Ok(env
        .gateway
        .decode_notification(&success_notification(&env, &txn_id, "500.00"))
        .expect("decode scripted answer")));
    let report = env
        .settlement
        .verify(TEST_USER, &txn_id)
        .await
        .expect("verify");
    assert!(!report.indeterminate);
    assert_eq!(report.gateway_status, Some(TxnStatus::Success));
    assert_eq!(customer_balance(&env).await, 50_000);

    // and finally asks for a refund
    env.settlement
        .request_refund(TEST_USER, &txn_id, Some("changed my mind".to_string()))
        .await
        .expect("refund recorded");

    // one event per step, attributed to its source
    assert_eq!(env.events.count_by_type(PaymentEventType::Initiate), 1);
    assert_eq!(env.events.count_by_type(PaymentEventType::Webhook), 1);
    assert_eq!(env.events.count_by_type(PaymentEventType::Callback), 1);
    assert_eq!(env.events.count_by_type(PaymentEventType::Verify), 1);
    assert_eq!(
        env.events.count_by_type(PaymentEventType::RefundRequested),
        1
    );
    assert_eq!(env.wallets.entry_count(), 1);
}

#[tokio::test]
async fn test_failure_then_success_across_sources() {
    let env = test_env();
    let txn_id = initiate(&env, "120.00", "WALLET_TOPUP", None).await;

    // the browser callback reports a failure first
    let failed = failed_notification(&env, &txn_id);
    let outcome = env
        .settlement
        .settle_notification(&failed, PaymentEventType::Callback)
        .await
        .expect("failed callback");
    assert_eq!(outcome.status, TxnStatus::Failed);
    assert_eq!(customer_balance(&env).await, 0);

    // the webhook then delivers the authoritative success
    let success = success_notification(&env, &txn_id, "120.00");
    let outcome = env
        .settlement
        .settle_notification(&success, PaymentEventType::Webhook)
        .await
        .expect("webhook success");
    assert!(outcome.first_success);
    assert_eq!(outcome.status, TxnStatus::Success);
    assert_eq!(customer_balance(&env).await, 12_000);

    // a stale failure cannot demote it afterwards
    let late_failure = failed_notification(&env, &txn_id);
    let outcome = env
        .settlement
        .settle_notification(&late_failure, PaymentEventType::Webhook)
        .await
        .expect("late failure absorbed");
    assert_eq!(outcome.status, TxnStatus::Success);
    assert_eq!(customer_balance(&env).await, 12_000);
}

#[tokio::test]
async fn test_verify_against_down_gateway_does_not_invent_failure() {
    let env = test_env();
    let txn_id = initiate(&env, "75.00", "WALLET_TOPUP", None).await;

    // default stub behaviour: the inquiry call fails at the transport
    let report = env
        .settlement
        .verify(TEST_USER, &txn_id)
        .await
        .expect("verify survives outage");
    assert!(report.indeterminate);
    assert_eq!(report.gateway_status, None);
    assert_eq!(report.transaction.txn_status(), TxnStatus::Initiated);

    // the outage itself is on the audit trail
    assert_eq!(env.events.count_by_type(PaymentEventType::Verify), 1);
}

#[tokio::test]
async fn test_event_log_outage_never_blocks_settlement() {
    let env = test_env();
    let txn_id = initiate(&env, "500.00", "WALLET_TOPUP", None).await;
    env.events.set_failing(true);

    let blob = success_notification(&env, &txn_id, "500.00");
    let outcome = env
        .settlement
        .settle_notification(&blob, PaymentEventType::Webhook)
        .await
        .expect("settles despite audit outage");
    assert!(outcome.first_success);
    assert_eq!(customer_balance(&env).await, 50_000);
    // only the pre-outage INITIATE event made it onto the trail
    assert_eq!(env.events.count_by_type(PaymentEventType::Webhook), 0);
    assert_eq!(env.events.entries().len(), 1);

    // refund is the one operation where the event IS the record
    env.events.set_failing(true);
    let err = env
        .settlement
        .request_refund(TEST_USER, &txn_id, None)
        .await
        .expect_err("refund needs the log");
    assert!(matches!(err, SettlementError::Store(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replays_credit_exactly_once() {
    let env = Arc::new(test_env());
    let txn_id = initiate(&env, "500.00", "WALLET_TOPUP", None).await;
    let blob = success_notification(&env, &txn_id, "500.00");

    let mut handles = Vec::new();
    for i in 0..8 {
        let env = env.clone();
        let blob = blob.clone();
        let source = if i % 2 == 0 {
            PaymentEventType::Webhook
        } else {
            PaymentEventType::Callback
        };
        handles.push(tokio::spawn(async move {
            env.settlement.settle_notification(&blob, source).await
        }));
    }

    let mut first_successes = 0;
    for handle in handles {
        let outcome = handle.await.expect("task").expect("settle");
        assert_eq!(outcome.status, TxnStatus::Success);
        if outcome.first_success {
            first_successes += 1;
        }
    }

    assert_eq!(first_successes, 1);
    assert_eq!(customer_balance(&env).await, 50_000);
    assert_eq!(env.wallets.entry_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let env = Arc::new(test_env());
    env.wallet_service
        .credit(
            WalletKind::Customer,
            TEST_USER,
            10_000,
            LedgerReference::new("WALLET_TOPUP"),
        )
        .await
        .expect("seed balance");

    let mut handles = Vec::new();
    for i in 0..10 {
        let env = env.clone();
        handles.push(tokio::spawn(async move {
            env.wallet_service
                .debit(
                    WalletKind::Customer,
                    TEST_USER,
                    3_000,
                    LedgerReference::new("GIFT_CARD")
                        .with_reference_id(format!("GC-{}", i)),
                )
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.expect("task").is_ok() {
            applied += 1;
        }
    }

    // 10_000 covers exactly three 3_000 debits; the rest must bounce
    assert_eq!(applied, 3);
    assert_eq!(customer_balance(&env).await, 1_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ledger_chain_stays_consistent_under_contention() {
    let env = Arc::new(test_env());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let env = env.clone();
        handles.push(tokio::spawn(async move {
            env.wallet_service
                .credit(
                    WalletKind::Customer,
                    TEST_USER,
                    500,
                    LedgerReference::new("WALLET_TOPUP"),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("credit");
    }

    assert_eq!(customer_balance(&env).await, 10_000);

    // oldest-first, every entry starts where the previous one ended
    let mut entries = env
        .wallets
        .ledger_entries(WalletKind::Customer, TEST_USER, 100)
        .await
        .expect("entries");
    entries.reverse();
    assert_eq!(entries.len(), 20);
    let mut running = 0;
    for entry in entries {
        assert_eq!(entry.balance_before, running);
        assert_eq!(entry.balance_after, running + entry.amount_paise);
        running = entry.balance_after;
    }
    assert_eq!(running, 10_000);
}

#[tokio::test]
async fn test_gold_purchase_settles_cashback_and_entitlement() {
    let env = test_env();
    let txn_id = initiate(&env, "1000.00", "GOLD_SUBSCRIPTION", Some("gold-annual")).await;

    let blob = success_notification(&env, &txn_id, "1000.00");
    env.settlement
        .settle_notification(&blob, PaymentEventType::Webhook)
        .await
        .expect("settle");

    let activations = env.subscriptions.activations();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].user_id, TEST_USER);
    assert_eq!(activations[0].plan_ref, "gold-annual");
    assert_eq!(activations[0].source_txn_id, txn_id);

    // default cashback is 10%, credited to the customer wallet
    assert_eq!(customer_balance(&env).await, 10_000);

    // the webhook replaying must not stack a second cashback
    let replay = success_notification(&env, &txn_id, "1000.00");
    env.settlement
        .settle_notification(&replay, PaymentEventType::Webhook)
        .await
        .expect("replay");
    assert_eq!(customer_balance(&env).await, 10_000);
    assert_eq!(env.subscriptions.activations().len(), 1);
}

#[tokio::test]
async fn test_merchant_settlement_routes_to_merchant_wallet() {
    let env = test_env();
    let txn_id = initiate(&env, "2500.00", "MERCHANT_SETTLEMENT", Some("merchant-77")).await;

    let blob = success_notification(&env, &txn_id, "2500.00");
    env.settlement
        .settle_notification(&blob, PaymentEventType::Webhook)
        .await
        .expect("settle");

    assert_eq!(
        env.wallets
            .balance(WalletKind::Merchant, "merchant-77")
            .await
            .unwrap(),
        250_000
    );
    // nothing lands in the paying customer's wallet
    assert_eq!(customer_balance(&env).await, 0);
}
