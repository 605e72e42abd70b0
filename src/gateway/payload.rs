//! Canonical key-value payload for the gateway protocol.
//!
//! The gateway signs what it decrypts, so the request string must be
//! byte-identical for identical inputs: fixed key order, every key present,
//! amounts always rendered with two decimal places.

use std::collections::HashMap;

use bigdecimal::{BigDecimal, ToPrimitive};

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{CallbackFields, InitiationFields};

const DEFAULT_CHANNEL_ID: &str = "W";

/// Render an amount the way the gateway expects it: two decimal places,
/// no thousands separators. `500` becomes `"500.00"`.
pub fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

/// Parse a caller-supplied amount. Must be a positive decimal with at most
/// two fractional digits; anything else is rejected before a transaction is
/// created.
pub fn parse_amount(value: &str) -> Result<BigDecimal, String> {
    let trimmed = value.trim();
    let amount: BigDecimal = trimmed
        .parse()
        .map_err(|_| format!("'{}' is not a decimal amount", trimmed))?;
    if amount <= BigDecimal::from(0) {
        return Err("amount must be positive".to_string());
    }
    let (_, exponent) = amount.normalized().as_bigint_and_exponent();
    if exponent > 2 {
        return Err("amount precision is limited to paise (two decimal places)".to_string());
    }
    Ok(amount.with_scale(2))
}

/// Convert a rupee amount into integer paise. Returns `None` when the value
/// does not fit an i64, which callers must treat as a reconciliation case.
pub fn amount_to_paise(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100)).with_scale(0).to_i64()
}

/// Builds the plaintext request strings that get encrypted and sent to the
/// gateway. Credentials are baked in at construction from validated config.
pub struct PayloadBuilder {
    client_code: String,
    username: String,
    password: String,
    callback_url: String,
    channel_id: String,
}

impl PayloadBuilder {
    pub fn new(
        client_code: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        PayloadBuilder {
            client_code: client_code.into(),
            username: username.into(),
            password: password.into(),
            callback_url: callback_url.into(),
            channel_id: DEFAULT_CHANNEL_ID.to_string(),
        }
    }

    /// Request string for launching a payment. Key order is part of the
    /// protocol contract; optional payer fields are sent as empty values,
    /// never omitted.
    pub fn initiation_payload(&self, fields: &InitiationFields) -> String {
        let pairs = [
            ("clientCode", self.client_code.clone()),
            ("username", self.username.clone()),
            ("password", self.password.clone()),
            ("clientTxnId", fields.client_txn_id.clone()),
            ("amount", format_amount(&fields.amount)),
            ("payerName", fields.payer.name.clone().unwrap_or_default()),
            ("payerEmail", fields.payer.email.clone().unwrap_or_default()),
            ("payerMobile", fields.payer.mobile.clone().unwrap_or_default()),
            ("callbackUrl", self.callback_url.clone()),
            ("channelId", self.channel_id.clone()),
            ("udf1", fields.udf1.clone().unwrap_or_default()),
            ("udf2", fields.udf2.clone().unwrap_or_default()),
        ];
        encode_pairs(&pairs)
    }

    /// Request string for the status-inquiry endpoint.
    pub fn inquiry_payload(&self, client_txn_id: &str) -> String {
        let pairs = [
            ("clientCode", self.client_code.clone()),
            ("username", self.username.clone()),
            ("password", self.password.clone()),
            ("clientTxnId", client_txn_id.to_string()),
        ];
        encode_pairs(&pairs)
    }
}

fn encode_pairs(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse a decrypted gateway notification into its typed fields.
///
/// `clientTxnId` and `status` are mandatory. A paid amount that is present
/// but unparseable is an error rather than a silent `None`; money fields do
/// not degrade quietly.
pub fn parse_response(plaintext: &str) -> GatewayResult<CallbackFields> {
    let mut fields: HashMap<&str, String> = HashMap::new();
    for pair in plaintext.split('&') {
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let decoded = urlencoding::decode(value).unwrap_or_else(|_| value.into());
        fields.insert(key, decoded.into_owned());
    }

    let client_txn_id = non_empty(fields.get("clientTxnId"))
        .ok_or_else(|| GatewayError::payload_format("missing clientTxnId"))?;
    let status = non_empty(fields.get("status"))
        .ok_or_else(|| GatewayError::payload_format("missing status"))?;

    let paid_amount =
        match non_empty(fields.get("paidAmount")).or_else(|| non_empty(fields.get("amount"))) {
            Some(raw) => Some(raw.parse::<BigDecimal>().map_err(|_| {
                GatewayError::payload_format(format!("paidAmount '{}' is not a decimal", raw))
            })?),
            None => None,
        };

    Ok(CallbackFields {
        client_txn_id,
        status,
        status_code: non_empty(fields.get("statusCode")),
        paid_amount,
        gateway_txn_id: non_empty(fields.get("gatewayTxnId")),
        bank_txn_id: non_empty(fields.get("bankTxnId")),
        payment_mode: non_empty(fields.get("paymentMode")),
        message: non_empty(fields.get("bankMessage")),
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
