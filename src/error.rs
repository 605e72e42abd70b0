use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::gateway::error::GatewayError;

/// Machine-readable error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "INSUFFICIENT_WALLET_BALANCE")]
    InsufficientWalletBalance,
    #[serde(rename = "REFUND_NOT_ELIGIBLE")]
    RefundNotEligible,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "GATEWAY_UNREACHABLE")]
    GatewayUnreachable,
    #[serde(rename = "AUTH_PROVIDER_UNAVAILABLE")]
    AuthProviderUnavailable,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Application-wide error type carried across handler boundaries.
///
/// Every error knows its HTTP status, wire code, a user-safe message and
/// whether retrying makes sense. Handlers attach the request id before the
/// error is rendered.
#[derive(Debug)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
    Auth(AuthError),
}

/// Business-rule failures. These are expected outcomes, not incidents.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Transaction '{client_txn_id}' not found")]
    TransactionNotFound { client_txn_id: String },

    #[error("Transaction '{client_txn_id}' already exists")]
    DuplicateTransaction { client_txn_id: String },

    #[error("Insufficient wallet balance: available {available_paise} paise, required {required_paise} paise")]
    InsufficientBalance {
        available_paise: i64,
        required_paise: i64,
    },

    #[error("Refund not available for '{client_txn_id}' in status {status}")]
    RefundNotEligible {
        client_txn_id: String,
        status: String,
    },

    #[error("Transaction '{client_txn_id}' belongs to another user")]
    NotTransactionOwner { client_txn_id: String },
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Database error: {message}")]
    Database { message: String, retryable: bool },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("Gateway error: {message}")]
    Gateway { message: String, retryable: bool },

    #[error("Gateway unreachable: {message}")]
    GatewayUnreachable { message: String },

    #[error("Auth provider unavailable: {message}")]
    AuthProvider { message: String },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Unknown payment purpose '{tag}'")]
    UnknownPurpose { tag: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        AppError {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::DuplicateTransaction { .. } => StatusCode::CONFLICT,
                DomainError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DomainError::RefundNotEligible { .. } => StatusCode::CONFLICT,
                DomainError::NotTransactionOwner { .. } => StatusCode::FORBIDDEN,
            },
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => StatusCode::BAD_GATEWAY,
                ExternalError::GatewayUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ExternalError::AuthProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            },
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientWalletBalance,
                DomainError::RefundNotEligible { .. } => ErrorCode::RefundNotEligible,
                DomainError::NotTransactionOwner { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::GatewayUnreachable { .. } => ErrorCode::GatewayUnreachable,
                ExternalError::AuthProvider { .. } => ErrorCode::AuthProviderUnavailable,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken | AuthError::InvalidToken { .. } => {
                    ErrorCode::Unauthorized
                }
                AuthError::Forbidden { .. } => ErrorCode::Forbidden,
            },
        }
    }

    /// Message safe to surface to an end user.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => {
                    "We could not find this payment. Check the transaction id".to_string()
                }
                DomainError::DuplicateTransaction { .. } => {
                    "A payment with this id already exists".to_string()
                }
                DomainError::InsufficientBalance {
                    available_paise,
                    required_paise,
                } => format!(
                    "Insufficient wallet balance: available {}, required {}. Top up your wallet and try again",
                    format_paise(*available_paise),
                    format_paise(*required_paise)
                ),
                DomainError::RefundNotEligible { .. } => {
                    "Only successful payments can be refunded".to_string()
                }
                DomainError::NotTransactionOwner { .. } => {
                    "You do not have access to this payment".to_string()
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => {
                    "A database error occurred. Please try again later".to_string()
                }
                InfrastructureError::Configuration { .. } => {
                    "Payment service is misconfigured. Please contact support".to_string()
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => {
                    "Payment gateway error. Please try again later".to_string()
                }
                ExternalError::GatewayUnreachable { .. } => {
                    "Payment gateway is unreachable. Please try again shortly".to_string()
                }
                ExternalError::AuthProvider { .. } => {
                    "Sign-in service is unavailable. Please try again shortly".to_string()
                }
            },
            AppErrorKind::Validation(err) => err.to_string(),
            AppErrorKind::Auth(err) => match err {
                AuthError::MissingToken => "Authentication required".to_string(),
                AuthError::InvalidToken { .. } => {
                    "Your session is invalid or has expired".to_string()
                }
                AuthError::Forbidden { .. } => {
                    "You do not have access to this resource".to_string()
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Infrastructure(InfrastructureError::Database { retryable, .. }) => {
                *retryable
            }
            AppErrorKind::External(ExternalError::Gateway { retryable, .. }) => *retryable,
            AppErrorKind::External(ExternalError::GatewayUnreachable { .. }) => true,
            AppErrorKind::External(ExternalError::AuthProvider { .. }) => true,
            _ => false,
        }
    }
}

fn format_paise(paise: i64) -> String {
    format!("\u{20b9}{}.{:02}", paise / 100, (paise % 100).abs())
}

impl fmt::Display for AppErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppErrorKind::Domain(err) => write!(f, "{}", err),
            AppErrorKind::Infrastructure(err) => write!(f, "{}", err),
            AppErrorKind::External(err) => write!(f, "{}", err),
            AppErrorKind::Validation(err) => write!(f, "{}", err),
            AppErrorKind::Auth(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(context) = &self.context {
            write!(f, " (context: {})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            retryable,
        }))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match &err {
            GatewayError::CryptoConfig { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                })
            }
            GatewayError::Network { message } => {
                AppErrorKind::External(ExternalError::GatewayUnreachable {
                    message: message.clone(),
                })
            }
            GatewayError::UnexpectedResponse { message } => {
                AppErrorKind::External(ExternalError::Gateway {
                    message: message.clone(),
                    retryable: true,
                })
            }
            GatewayError::Decryption { .. } | GatewayError::PayloadFormat { .. } => {
                AppErrorKind::External(ExternalError::Gateway {
                    message: err.to_string(),
                    retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}
