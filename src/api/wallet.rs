//! Wallet endpoints. All of them require auth; the wallet in question is
//! always the caller's own (merchants authenticate as the merchant id).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::store::{LedgerReference, WalletKind, WalletLedgerEntry};
use crate::error::AppError;
use crate::gateway::payload::{amount_to_paise, parse_amount};
use crate::middleware::auth::{require_auth, AuthProvider, AuthUser};
use crate::services::wallet::{WalletError, WalletService};

#[derive(Clone)]
pub struct WalletApiState {
    pub wallets: Arc<WalletService>,
}

pub fn router(state: WalletApiState, auth: Arc<dyn AuthProvider>) -> Router {
    Router::new()
        .route("/wallet/balance", get(get_balance))
        .route("/wallet/ledger", get(get_ledger))
        .route("/wallet/purchase", post(purchase_gift_card))
        .route_layer(middleware::from_fn_with_state(auth, require_auth))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WalletQuery {
    #[serde(default)]
    pub kind: Option<WalletKind>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub kind: WalletKind,
    pub balance_paise: i64,
    pub balance: String,
}

/// GET /wallet/balance?kind=CUSTOMER
pub async fn get_balance(
    State(state): State<WalletApiState>,
    user: AuthUser,
    Query(query): Query<WalletQuery>,
) -> Result<Json<BalanceResponse>, AppError> {
    let kind = query.kind.unwrap_or(WalletKind::Customer);
    let balance_paise = state
        .wallets
        .balance(kind, &user.user_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(BalanceResponse {
        kind,
        balance_paise,
        balance: paise_to_rupees(balance_paise),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub direction: String,
    pub amount_paise: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: String,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<WalletLedgerEntry> for LedgerEntryView {
    fn from(entry: WalletLedgerEntry) -> Self {
        Self {
            id: entry.id,
            direction: entry.direction,
            amount_paise: entry.amount_paise,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id,
            description: entry.description,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerResponse {
    pub kind: WalletKind,
    pub entries: Vec<LedgerEntryView>,
}

/// GET /wallet/ledger?kind=CUSTOMER&limit=20
pub async fn get_ledger(
    State(state): State<WalletApiState>,
    user: AuthUser,
    Query(query): Query<WalletQuery>,
) -> Result<Json<LedgerResponse>, AppError> {
    let kind = query.kind.unwrap_or(WalletKind::Customer);
    let entries = state
        .wallets
        .ledger(kind, &user.user_id, query.limit)
        .await
        .map_err(AppError::from)?;
    Ok(Json(LedgerResponse {
        kind,
        entries: entries.into_iter().map(LedgerEntryView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    /// Rupee amount as a decimal string, e.g. "249.00".
    pub amount: String,
    pub order_ref: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub order_ref: String,
    pub amount_paise: i64,
    pub balance_paise: i64,
}

/// POST /wallet/purchase
///
/// Pays for a gift-card order out of the customer wallet. The debit is
/// synchronous and atomic; a balance that cannot cover the order rejects the
/// whole request and moves nothing.
pub async fn purchase_gift_card(
    State(state): State<WalletApiState>,
    user: AuthUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let amount = parse_amount(&request.amount)
        .and_then(|amount| amount_to_paise(&amount).ok_or_else(|| "amount out of range".to_string()))
        .map_err(|reason| AppError::from(WalletError::InvalidAmount { reason }))?;

    let entry = state
        .wallets
        .debit(
            WalletKind::Customer,
            &user.user_id,
            amount,
            LedgerReference::new("GIFT_CARD")
                .with_reference_id(&request.order_ref)
                .with_description(format!("Gift card order {}", request.order_ref)),
        )
        .await
        .map_err(AppError::from)?;

    Ok(Json(PurchaseResponse {
        order_ref: request.order_ref,
        amount_paise: entry.amount_paise,
        balance_paise: entry.balance_after,
    }))
}

fn paise_to_rupees(paise: i64) -> String {
    format!("{}.{:02}", paise / 100, paise % 100)
}
