//! Shared fixtures for the integration suite: in-memory stores wired into a
//! real `SettlementService`, plus a gateway stand-in that uses the actual
//! cipher, so notification payloads have to survive real decryption.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use giftbay_settlement::api::payments::{self, PaymentApiState, RedirectTargets};
use giftbay_settlement::api::wallet::{self, WalletApiState};
use giftbay_settlement::database::memory::{
    MemoryEventLog, MemorySubscriptionStore, MemoryTransactionStore, MemoryWalletStore,
};
use giftbay_settlement::gateway::cipher::{CipherMode, PayloadCipher};
use giftbay_settlement::gateway::client::GatewayApi;
use giftbay_settlement::gateway::error::GatewayError;
use giftbay_settlement::gateway::payload::parse_response;
use giftbay_settlement::gateway::types::{CallbackFields, InitiationFields, LaunchParameters};
use giftbay_settlement::middleware::auth::{AuthProvider, StaticAuthProvider};
use giftbay_settlement::services::{SettlementConfig, SettlementService, WalletService};

pub const TEST_TOKEN: &str = "it-token-1";
pub const TEST_USER: &str = "user-1";
pub const FRONTEND_BASE: &str = "https://shop.test";

/// Gateway stand-in backed by the real legacy cipher. Tests encrypt
/// notifications with [`StubGateway::encrypt_notification`] and feed them
/// through the open endpoints exactly as the gateway would.
pub struct StubGateway {
    cipher: PayloadCipher,
    inquiry: Mutex<Option<Result<CallbackFields, GatewayError>>>,
}

impl StubGateway {
    pub fn new() -> Self {
        let cipher = PayloadCipher::new(
            CipherMode::LegacyCbcHex,
            "0123456789abcdef",
            Some("fedcba9876543210"),
        )
        .expect("test cipher");
        Self {
            cipher,
            inquiry: Mutex::new(None),
        }
    }

    /// Script the answer the next status inquiry returns.
    pub fn script_inquiry(&self, result: Result<CallbackFields, GatewayError>) {
        *self.inquiry.lock().unwrap() = Some(result);
    }

    pub fn encrypt_notification(&self, pairs: &[(&str, &str)]) -> String {
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        self.cipher.encrypt(&body).expect("encrypt notification")
    }
}

#[async_trait]
impl GatewayApi for StubGateway {
    fn client_code(&self) -> &str {
        "GBTEST"
    }

    fn build_launch(&self, fields: &InitiationFields) -> Result<LaunchParameters, GatewayError> {
        Ok(LaunchParameters {
            launch_url: "https://pg.test/launch".to_string(),
            encrypted_payload: self.cipher.encrypt(&format!(
                "clientTxnId={}&amount={}",
                fields.client_txn_id, fields.amount
            ))?,
            client_code: "GBTEST".to_string(),
        })
    }

    fn decode_notification(&self, enc_response: &str) -> Result<CallbackFields, GatewayError> {
        let plaintext = self.cipher.decrypt(enc_response)?;
        parse_response(&plaintext)
    }

    async fn status_inquiry(&self, _client_txn_id: &str) -> Result<CallbackFields, GatewayError> {
        self.inquiry.lock().unwrap().clone().unwrap_or_else(|| {
            Err(GatewayError::Network {
                message: "no scripted answer".to_string(),
            })
        })
    }
}

pub struct TestEnv {
    pub settlement: Arc<SettlementService>,
    pub wallet_service: Arc<WalletService>,
    pub transactions: Arc<MemoryTransactionStore>,
    pub wallets: Arc<MemoryWalletStore>,
    pub events: Arc<MemoryEventLog>,
    pub subscriptions: Arc<MemorySubscriptionStore>,
    pub gateway: Arc<StubGateway>,
}

pub fn test_env() -> TestEnv {
    let transactions = Arc::new(MemoryTransactionStore::new());
    let wallets = Arc::new(MemoryWalletStore::new());
    let events = Arc::new(MemoryEventLog::new());
    let subscriptions = Arc::new(MemorySubscriptionStore::new());
    let gateway = Arc::new(StubGateway::new());

    let wallet_service = Arc::new(WalletService::new(wallets.clone()));
    let settlement = Arc::new(SettlementService::new(
        transactions.clone(),
        wallet_service.clone(),
        events.clone(),
        subscriptions.clone(),
        gateway.clone(),
        SettlementConfig::default(),
    ));

    TestEnv {
        settlement,
        wallet_service,
        transactions,
        wallets,
        events,
        subscriptions,
        gateway,
    }
}

/// Full HTTP surface against in-memory state, with one known bearer token.
pub fn build_app(env: &TestEnv) -> Router {
    let auth: Arc<dyn AuthProvider> =
        Arc::new(StaticAuthProvider::new().with_token(TEST_TOKEN, TEST_USER));

    let payment_routes = payments::router(
        PaymentApiState {
            settlement: env.settlement.clone(),
            redirects: RedirectTargets::new(FRONTEND_BASE),
        },
        auth.clone(),
    );
    let wallet_routes = wallet::router(
        WalletApiState {
            wallets: env.wallet_service.clone(),
        },
        auth,
    );

    payment_routes.merge(wallet_routes)
}

/// Encrypted SUCCESS notification for the given transaction, shaped like the
/// gateway's callback body.
pub fn success_notification(env: &TestEnv, client_txn_id: &str, paid_amount: &str) -> String {
    env.gateway.encrypt_notification(&[
        ("clientTxnId", client_txn_id),
        ("status", "SUCCESS"),
        ("statusCode", "0000"),
        ("paidAmount", paid_amount),
        ("gatewayTxnId", "GW-881"),
        ("paymentMode", "UPI"),
        ("bankMessage", "Transaction successful"),
    ])
}

pub fn failed_notification(env: &TestEnv, client_txn_id: &str) -> String {
    env.gateway.encrypt_notification(&[
        ("clientTxnId", client_txn_id),
        ("status", "FAILED"),
        ("statusCode", "0300"),
        ("bankMessage", "Declined by issuer"),
    ])
}
