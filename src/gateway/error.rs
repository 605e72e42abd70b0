use thiserror::Error;

/// Errors raised while talking to the payment gateway or handling its
/// encrypted payloads.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Cipher key or iv does not match what the configured mode requires.
    /// Raised at startup, never while serving traffic.
    #[error("Gateway crypto configuration invalid: {message}")]
    CryptoConfig { message: String },

    /// Inbound payload failed decryption or authentication. The payload is
    /// untrusted and must not reach the transaction store.
    #[error("Gateway payload could not be decrypted: {message}")]
    Decryption { message: String },

    /// Payload decrypted fine but the key-value content is malformed.
    #[error("Gateway payload malformed: {message}")]
    PayloadFormat { message: String },

    /// Could not reach the gateway. The transaction outcome is unknown, not
    /// failed.
    #[error("Gateway unreachable: {message}")]
    Network { message: String },

    /// Gateway answered with something other than the expected envelope.
    #[error("Unexpected gateway response: {message}")]
    UnexpectedResponse { message: String },
}

impl GatewayError {
    pub fn crypto_config(message: impl Into<String>) -> Self {
        GatewayError::CryptoConfig {
            message: message.into(),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        GatewayError::Decryption {
            message: message.into(),
        }
    }

    pub fn payload_format(message: impl Into<String>) -> Self {
        GatewayError::PayloadFormat {
            message: message.into(),
        }
    }

    /// True when the gateway's answer is unknown rather than negative. A
    /// verification that hits this must report PENDING, never FAILED.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, GatewayError::Network { .. })
    }

    /// Safe to show to an end user. Never leaks cipher internals.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::CryptoConfig { .. } => {
                "Payment service is misconfigured. Please contact support".to_string()
            }
            GatewayError::Decryption { .. } | GatewayError::PayloadFormat { .. } => {
                "Payment response could not be verified".to_string()
            }
            GatewayError::Network { .. } => {
                "Payment gateway is unreachable. Please try again shortly".to_string()
            }
            GatewayError::UnexpectedResponse { .. } => {
                "Payment gateway returned an unexpected response".to_string()
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
