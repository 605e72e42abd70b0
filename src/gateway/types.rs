use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Lifecycle states a payment transaction moves through.
///
/// `Success` is terminal: once a transaction reaches it, later notifications
/// may only refresh non-monetary metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnStatus {
    #[default]
    Initiated,
    Pending,
    Success,
    Failed,
    Aborted,
}

impl TxnStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TxnStatus::Initiated => "INITIATED",
            TxnStatus::Pending => "PENDING",
            TxnStatus::Success => "SUCCESS",
            TxnStatus::Failed => "FAILED",
            TxnStatus::Aborted => "ABORTED",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "INITIATED" => Some(TxnStatus::Initiated),
            "PENDING" => Some(TxnStatus::Pending),
            "SUCCESS" => Some(TxnStatus::Success),
            "FAILED" => Some(TxnStatus::Failed),
            "ABORTED" => Some(TxnStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxnStatus::Success)
    }

    /// Still waiting on the gateway for a final answer.
    pub fn is_unsettled(&self) -> bool {
        matches!(self, TxnStatus::Initiated | TxnStatus::Pending)
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// What a payment is for. Drives the ledger side effects that run exactly
/// once, when the transaction first reaches SUCCESS.
///
/// The set is closed on purpose: a tag string arriving from outside is parsed
/// into one of these variants or rejected, so dispatch sites can match
/// exhaustively instead of comparing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentPurpose {
    /// Customer adds gateway money to their marketplace wallet.
    WalletTopup,
    /// Plain gift-card order paid through the gateway. No ledger action on
    /// success; fulfilment is driven off the transaction status downstream.
    GiftCardOrder { order_ref: Option<String> },
    /// Gold plan purchase. Activates the entitlement and credits cashback.
    GoldSubscription { plan_ref: String },
    /// Marketplace settles a seller payout into the merchant wallet.
    MerchantSettlement { merchant_id: String },
}

impl PaymentPurpose {
    pub fn tag(&self) -> &'static str {
        match self {
            PaymentPurpose::WalletTopup => "WALLET_TOPUP",
            PaymentPurpose::GiftCardOrder { .. } => "GIFT_CARD",
            PaymentPurpose::GoldSubscription { .. } => "GOLD_SUBSCRIPTION",
            PaymentPurpose::MerchantSettlement { .. } => "MERCHANT_SETTLEMENT",
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            PaymentPurpose::WalletTopup => None,
            PaymentPurpose::GiftCardOrder { order_ref } => order_ref.as_deref(),
            PaymentPurpose::GoldSubscription { plan_ref } => Some(plan_ref),
            PaymentPurpose::MerchantSettlement { merchant_id } => Some(merchant_id),
        }
    }

    /// Rebuild a purpose from its persisted tag and reference. Returns `None`
    /// for unknown tags or for tags whose required reference is missing.
    pub fn from_tags(tag: &str, reference: Option<&str>) -> Option<Self> {
        match tag {
            "WALLET_TOPUP" => Some(PaymentPurpose::WalletTopup),
            "GIFT_CARD" => Some(PaymentPurpose::GiftCardOrder {
                order_ref: reference.map(str::to_string),
            }),
            "GOLD_SUBSCRIPTION" => reference.map(|plan_ref| PaymentPurpose::GoldSubscription {
                plan_ref: plan_ref.to_string(),
            }),
            "MERCHANT_SETTLEMENT" => {
                reference.map(|merchant_id| PaymentPurpose::MerchantSettlement {
                    merchant_id: merchant_id.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Payer details forwarded to the gateway in the initiation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
}

/// Everything the gateway needs to render its hosted payment page. The udf
/// fields are opaque to the gateway and echoed back in notifications.
#[derive(Debug, Clone)]
pub struct InitiationFields {
    pub client_txn_id: String,
    pub amount: BigDecimal,
    pub payer: PayerInfo,
    pub udf1: Option<String>,
    pub udf2: Option<String>,
}

/// Returned to the frontend so it can form-post the browser to the gateway.
#[derive(Debug, Clone)]
pub struct LaunchParameters {
    pub launch_url: String,
    pub encrypted_payload: String,
    pub client_code: String,
}

/// Decrypted, parsed contents of a gateway notification. Callbacks, webhooks
/// and status-inquiry responses all carry this same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackFields {
    pub client_txn_id: String,
    pub status: String,
    pub status_code: Option<String>,
    pub paid_amount: Option<BigDecimal>,
    pub gateway_txn_id: Option<String>,
    pub bank_txn_id: Option<String>,
    pub payment_mode: Option<String>,
    pub message: Option<String>,
}
