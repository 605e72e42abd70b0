//! Payment endpoints.
//!
//! `/payment/initiate`, `/payment/verify` and `/payment/refund` sit behind
//! bearer auth. `/payment/callback` and `/payment/webhook` are open: they are
//! called by the gateway (or by the payer's browser bouncing off it) and
//! authenticate themselves through the encrypted payload instead.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::database::store::PaymentEventType;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::gateway::payload::{format_amount, parse_amount};
use crate::gateway::types::{PayerInfo, TxnStatus};
use crate::middleware::auth::{require_auth, AuthProvider, AuthUser};
use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::services::settlement::{InitiateCommand, SettlementError, SettlementService};

/// Shown to payers when we cannot say anything more specific.
const GENERIC_FAILURE_MSG: &str =
    "We could not confirm your payment. If money left your account it will be reconciled shortly.";

#[derive(Clone)]
pub struct PaymentApiState {
    pub settlement: Arc<SettlementService>,
    pub redirects: RedirectTargets,
}

/// Frontend pages the callback handler bounces the browser to.
#[derive(Clone)]
pub struct RedirectTargets {
    frontend_base_url: String,
}

impl RedirectTargets {
    pub fn new(frontend_base_url: impl Into<String>) -> Self {
        Self {
            frontend_base_url: frontend_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn for_status(&self, status: TxnStatus, txn_id: Option<&str>, msg: &str) -> Response {
        let segment = match status {
            TxnStatus::Success => "success",
            TxnStatus::Initiated | TxnStatus::Pending => "processing",
            TxnStatus::Failed | TxnStatus::Aborted => "failure",
        };
        self.redirect(segment, txn_id, msg)
    }

    pub fn failure(&self, txn_id: Option<&str>, msg: &str) -> Response {
        self.redirect("failure", txn_id, msg)
    }

    fn redirect(&self, segment: &str, txn_id: Option<&str>, msg: &str) -> Response {
        let url = format!(
            "{}/payment/{}?txnId={}&msg={}",
            self.frontend_base_url,
            segment,
            urlencoding::encode(txn_id.unwrap_or("")),
            urlencoding::encode(msg)
        );
        Redirect::to(&url).into_response()
    }
}

pub fn router(state: PaymentApiState, auth: Arc<dyn AuthProvider>) -> Router {
    let authed = Router::new()
        .route("/payment/initiate", post(initiate_payment))
        .route("/payment/verify", get(verify_payment))
        .route("/payment/refund", post(request_refund))
        .route_layer(middleware::from_fn_with_state(auth, require_auth))
        .with_state(state.clone());

    let open = Router::new()
        .route(
            "/payment/callback",
            get(callback_via_query).post(callback_via_form),
        )
        .route("/payment/webhook", post(handle_webhook))
        .with_state(state);

    authed.merge(open)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub amount: String,
    #[serde(default)]
    pub purpose_tag: Option<String>,
    #[serde(default)]
    pub purpose_ref: Option<String>,
    #[serde(default)]
    pub payer_name: Option<String>,
    #[serde(default)]
    pub payer_email: Option<String>,
    #[serde(default)]
    pub payer_mobile: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub transaction_id: String,
    pub launch_url: String,
    pub encrypted_payload: String,
    pub gateway_client_code: String,
    pub status: TxnStatus,
    pub amount: String,
}

/// POST /payment/initiate
pub async fn initiate_payment(
    State(state): State<PaymentApiState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiateResponse>), AppError> {
    let amount = parse_amount(&request.amount).map_err(|reason| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            reason,
        }))
    })?;
    let cmd = InitiateCommand {
        amount,
        purpose_tag: request.purpose_tag,
        purpose_ref: request.purpose_ref,
        payer: PayerInfo {
            name: request.payer_name,
            email: request.payer_email,
            mobile: request.payer_mobile,
        },
    };

    let initiated = state
        .settlement
        .initiate(&user.user_id, cmd)
        .await
        .map_err(|err| to_app_error(err, &headers))?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateResponse {
            transaction_id: initiated.transaction.client_txn_id,
            launch_url: initiated.launch.launch_url,
            encrypted_payload: initiated.launch.encrypted_payload,
            gateway_client_code: initiated.launch.client_code,
            status: TxnStatus::Initiated,
            amount: format_amount(&initiated.transaction.amount),
        }),
    ))
}

/// Gateway notifications arrive either as a query string (browser GET) or as
/// a form post; both carry the same single field.
#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    #[serde(rename = "encResponse")]
    pub enc_response: Option<String>,
}

/// GET /payment/callback
pub async fn callback_via_query(
    State(state): State<PaymentApiState>,
    Query(params): Query<NotificationParams>,
) -> Response {
    settle_and_redirect(&state, params.enc_response, PaymentEventType::Callback).await
}

/// POST /payment/callback
pub async fn callback_via_form(
    State(state): State<PaymentApiState>,
    Form(params): Form<NotificationParams>,
) -> Response {
    settle_and_redirect(&state, params.enc_response, PaymentEventType::Callback).await
}

/// Settle a browser-borne notification, then bounce the payer to the page
/// matching the resulting status. Decode failures deliberately land on the
/// generic failure page with no hint of what went wrong inside.
async fn settle_and_redirect(
    state: &PaymentApiState,
    enc_response: Option<String>,
    source: PaymentEventType,
) -> Response {
    let enc = match enc_response.filter(|b| !b.trim().is_empty()) {
        Some(enc) => enc,
        None => {
            warn!(source = source.as_db_str(), "Notification arrived without encResponse");
            return state.redirects.failure(None, GENERIC_FAILURE_MSG);
        }
    };

    match state.settlement.settle_notification(&enc, source).await {
        Ok(outcome) => {
            let msg = outcome.gateway_message.unwrap_or_default();
            state.redirects.for_status(
                outcome.status,
                Some(&outcome.transaction.client_txn_id),
                &msg,
            )
        }
        Err(err @ SettlementError::TransactionNotFound { .. }) => {
            AppError::from(err).into_response()
        }
        Err(SettlementError::Gateway(err)) => {
            warn!(error = %err, "Callback payload rejected; redirecting to generic failure");
            state.redirects.failure(None, &err.user_message())
        }
        Err(err) => {
            error!(error = %err, "Callback processing failed; redirecting to generic failure");
            state.redirects.failure(None, GENERIC_FAILURE_MSG)
        }
    }
}

/// POST /payment/webhook
pub async fn handle_webhook(
    State(state): State<PaymentApiState>,
    headers: HeaderMap,
    Form(params): Form<NotificationParams>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let enc = match params.enc_response.filter(|b| !b.trim().is_empty()) {
        Some(enc) => enc,
        None => {
            warn!("Webhook arrived without encResponse");
            return json_error_response(StatusCode::BAD_REQUEST, "missing encResponse", request_id)
                .into_response();
        }
    };

    match state
        .settlement
        .settle_notification(&enc, PaymentEventType::Webhook)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "txnStatus": outcome.status })),
        )
            .into_response(),
        Err(err @ SettlementError::TransactionNotFound { .. }) => {
            to_app_error(err, &headers).into_response()
        }
        Err(SettlementError::Gateway(err)) => {
            warn!(error = %err, "Webhook payload rejected");
            json_error_response(StatusCode::BAD_REQUEST, err.user_message(), request_id)
                .into_response()
        }
        Err(err) => to_app_error(err, &headers).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "clientTxnId")]
    pub client_txn_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub client_txn_id: String,
    /// Status on file after the inquiry, still the stored one when the
    /// gateway could not be reached.
    pub status: TxnStatus,
    pub gateway_status: Option<TxnStatus>,
    pub indeterminate: bool,
    pub amount: String,
    pub paid_amount: Option<String>,
    pub gateway_message: Option<String>,
}

/// GET /payment/verify?clientTxnId=...
pub async fn verify_payment(
    State(state): State<PaymentApiState>,
    user: AuthUser,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, AppError> {
    let report = state
        .settlement
        .verify(&user.user_id, &query.client_txn_id)
        .await
        .map_err(|err| to_app_error(err, &headers))?;

    let txn = &report.transaction;
    Ok(Json(VerifyResponse {
        client_txn_id: txn.client_txn_id.clone(),
        status: txn.txn_status(),
        gateway_status: report.gateway_status,
        indeterminate: report.indeterminate,
        amount: format_amount(&txn.amount),
        paid_amount: txn.paid_amount.as_ref().map(format_amount),
        gateway_message: txn.gateway_message.clone(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub client_txn_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub client_txn_id: String,
    pub status: TxnStatus,
    pub message: String,
}

/// POST /payment/refund
pub async fn request_refund(
    State(state): State<PaymentApiState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), AppError> {
    let transaction = state
        .settlement
        .request_refund(&user.user_id, &request.client_txn_id, request.reason)
        .await
        .map_err(|err| to_app_error(err, &headers))?;

    let status = transaction.txn_status();
    Ok((
        StatusCode::ACCEPTED,
        Json(RefundResponse {
            client_txn_id: transaction.client_txn_id,
            status,
            message: "Refund request recorded".to_string(),
        }),
    ))
}

fn to_app_error(err: SettlementError, headers: &HeaderMap) -> AppError {
    let app = AppError::from(err);
    match get_request_id_from_headers(headers) {
        Some(request_id) => app.with_request_id(request_id),
        None => app,
    }
}
