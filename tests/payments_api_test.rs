//! Integration tests for the payment endpoints: initiate, callback, webhook,
//! verify and refund, driven through the router against in-memory state.

mod common;

use axum::body::Body;
use http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{build_app, success_notification, test_env, TestEnv, TEST_TOKEN};
use giftbay_settlement::database::store::{TransactionStore, WalletKind, WalletStore};
use giftbay_settlement::gateway::error::GatewayError;

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn location_of(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default()
}

fn initiate_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/payment/initiate")
        .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Initiate a 500.00 wallet top-up and return its transaction id.
async fn initiate_topup(env: &TestEnv) -> String {
    let response = build_app(env)
        .oneshot(initiate_request(json!({
            "amount": "500.00",
            "purposeTag": "WALLET_TOPUP",
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    body.get("transactionId")
        .and_then(|v| v.as_str())
        .expect("transactionId in response")
        .to_string()
}

#[tokio::test]
async fn test_initiate_requires_auth() {
    let env = test_env();
    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment/initiate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "amount": "500.00" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body.get("error").and_then(|v| v.as_str()), Some("UNAUTHORIZED"));
}

#[tokio::test]
async fn test_initiate_rejects_unknown_token() {
    let env = test_env();
    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment/initiate")
                .header(header::AUTHORIZATION, "Bearer not-a-real-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "amount": "500.00" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_initiate_returns_launch_material() {
    let env = test_env();
    let response = build_app(&env)
        .oneshot(initiate_request(json!({
            "amount": "500.00",
            "purposeTag": "WALLET_TOPUP",
            "payerName": "Asha Rao",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;

    let txn_id = body
        .get("transactionId")
        .and_then(|v| v.as_str())
        .expect("transactionId");
    assert!(!txn_id.is_empty() && txn_id.len() <= 20, "id '{}'", txn_id);
    assert_eq!(
        body.get("launchUrl").and_then(|v| v.as_str()),
        Some("https://pg.test/launch")
    );
    assert!(body
        .get("encryptedPayload")
        .and_then(|v| v.as_str())
        .is_some_and(|p| !p.is_empty()));
    assert_eq!(
        body.get("gatewayClientCode").and_then(|v| v.as_str()),
        Some("GBTEST")
    );
    assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("INITIATED"));
    assert_eq!(body.get("amount").and_then(|v| v.as_str()), Some("500.00"));
}

#[tokio::test]
async fn test_initiate_rejects_non_positive_amount() {
    let env = test_env();
    for bad in ["0.00", "-12", "ten rupees"] {
        let response = build_app(&env)
            .oneshot(initiate_request(json!({ "amount": bad })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "amount {}", bad);
        let body = read_json(response).await;
        assert_eq!(
            body.get("error").and_then(|v| v.as_str()),
            Some("VALIDATION_ERROR")
        );
    }
}

#[tokio::test]
async fn test_callback_redirects_to_success_and_credits_wallet() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;
    let blob = success_notification(&env, &txn_id, "500.00");

    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .uri(format!("/payment/callback?encResponse={}", blob))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location_of(&response);
    assert!(
        location.starts_with("https://shop.test/payment/success?txnId="),
        "unexpected location {}",
        location
    );
    assert!(location.contains(&txn_id));

    assert_eq!(
        env.wallets
            .balance(WalletKind::Customer, "user-1")
            .await
            .unwrap(),
        50_000
    );
}

#[tokio::test]
async fn test_duplicate_callback_credits_wallet_once() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;
    let blob = success_notification(&env, &txn_id, "500.00");
    let uri = format!("/payment/callback?encResponse={}", blob);

    for _ in 0..3 {
        let response = build_app(&env)
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location_of(&response).contains("/payment/success"));
    }

    assert_eq!(
        env.wallets
            .balance(WalletKind::Customer, "user-1")
            .await
            .unwrap(),
        50_000
    );
    assert_eq!(env.wallets.entry_count(), 1);
}

#[tokio::test]
async fn test_callback_with_undecryptable_payload_redirects_failure() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;

    // valid hex, but not a whole cipher block; decryption fails closed
    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .uri("/payment/callback?encResponse=deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location_of(&response);
    assert!(
        location.starts_with("https://shop.test/payment/failure"),
        "unexpected location {}",
        location
    );

    // the stored transaction is untouched
    let stored = env
        .transactions
        .find_by_client_txn_id(&txn_id)
        .await
        .unwrap()
        .expect("transaction still on file");
    assert_eq!(stored.status, "INITIATED");
    assert_eq!(
        env.wallets
            .balance(WalletKind::Customer, "user-1")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_callback_without_encresponse_redirects_failure() {
    let env = test_env();
    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .uri("/payment/callback")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location_of(&response).starts_with("https://shop.test/payment/failure"));
}

#[tokio::test]
async fn test_webhook_applies_status_and_answers_json() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;
    let blob = success_notification(&env, &txn_id, "500.00");

    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment/webhook")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from(format!("encResponse={}", blob)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("ok"));
    assert_eq!(
        body.get("txnStatus").and_then(|v| v.as_str()),
        Some("SUCCESS")
    );
    assert_eq!(
        env.wallets
            .balance(WalletKind::Customer, "user-1")
            .await
            .unwrap(),
        50_000
    );
}

#[tokio::test]
async fn test_webhook_for_unknown_transaction_is_404() {
    let env = test_env();
    let blob = success_notification(&env, "T9999999999999", "500.00");

    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment/webhook")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from(format!("encResponse={}", blob)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("TRANSACTION_NOT_FOUND")
    );
}

#[tokio::test]
async fn test_webhook_without_encresponse_is_400() {
    let env = test_env();
    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payment/webhook")
                .header(
                    header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(Body::from(""))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_verify_reports_indeterminate_when_gateway_down() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;
    env.gateway.script_inquiry(Err(GatewayError::Network {
        message: "connect timed out".to_string(),
    }));

    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .uri(format!("/payment/verify?clientTxnId={}", txn_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    // never guesses FAILED while the gateway is unreachable
    assert_eq!(
        body.get("status").and_then(|v| v.as_str()),
        Some("INITIATED")
    );
    assert_eq!(
        body.get("indeterminate").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert!(body.get("gatewayStatus").is_some_and(Value::is_null));
}

#[tokio::test]
async fn test_verify_is_forbidden_for_another_users_transaction() {
    use bigdecimal::BigDecimal;
    use giftbay_settlement::database::store::{NewPaymentTransaction, TransactionStore};

    let env = test_env();
    env.transactions
        .create(NewPaymentTransaction {
            client_txn_id: "T1700000000000001".to_string(),
            user_id: "someone-else".to_string(),
            amount: BigDecimal::from(100),
            purpose_tag: "WALLET_TOPUP".to_string(),
            purpose_ref: None,
            payer_name: None,
            payer_email: None,
            payer_mobile: None,
        })
        .await
        .unwrap();

    let response = build_app(&env)
        .oneshot(
            Request::builder()
                .uri("/payment/verify?clientTxnId=T1700000000000001")
                .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body.get("error").and_then(|v| v.as_str()), Some("FORBIDDEN"));
}

#[tokio::test]
async fn test_refund_only_after_settlement() {
    let env = test_env();
    let txn_id = initiate_topup(&env).await;

    let refund_request = || {
        Request::builder()
            .method("POST")
            .uri("/payment/refund")
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "clientTxnId": txn_id, "reason": "wrong card" }).to_string(),
            ))
            .unwrap()
    };

    // not settled yet
    let response = build_app(&env).oneshot(refund_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("REFUND_NOT_ELIGIBLE")
    );

    // settle, then ask again
    let blob = success_notification(&env, &txn_id, "500.00");
    let settle = build_app(&env)
        .oneshot(
            Request::builder()
                .uri(format!("/payment/callback?encResponse={}", blob))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(settle.status(), StatusCode::SEE_OTHER);

    let response = build_app(&env).oneshot(refund_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert_eq!(
        body.get("status").and_then(|v| v.as_str()),
        Some("SUCCESS")
    );
    assert_eq!(
        body.get("message").and_then(|v| v.as_str()),
        Some("Refund request recorded")
    );
}
