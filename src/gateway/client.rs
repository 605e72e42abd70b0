//! Gateway client: the one place that owns the cipher, the payload builder
//! and the HTTP plumbing for the payment gateway.
//!
//! Handlers and services depend on the [`GatewayApi`] trait and receive a
//! concrete client by injection, so tests can swap in a scripted fake.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::gateway::cipher::PayloadCipher;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::payload::{parse_response, PayloadBuilder};
use crate::gateway::types::{CallbackFields, InitiationFields, LaunchParameters};

#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Merchant identifier the gateway knows us by.
    fn client_code(&self) -> &str;

    /// Build the encrypted launch parameters the frontend form-posts to the
    /// gateway's hosted page. No network call happens here.
    fn build_launch(&self, fields: &InitiationFields) -> GatewayResult<LaunchParameters>;

    /// Decrypt and parse an inbound callback or webhook blob. Fails closed on
    /// any cipher or format problem.
    fn decode_notification(&self, enc_response: &str) -> GatewayResult<CallbackFields>;

    /// Ask the gateway for the current state of a transaction. A network
    /// failure is indeterminate, not a payment failure.
    async fn status_inquiry(&self, client_txn_id: &str) -> GatewayResult<CallbackFields>;
}

/// Production [`GatewayApi`] backed by the configured payment gateway.
pub struct SettlementGateway {
    client_code: String,
    launch_url: String,
    inquiry_url: String,
    cipher: PayloadCipher,
    builder: PayloadBuilder,
    http: reqwest::Client,
}

impl SettlementGateway {
    /// Build the client from validated configuration. Cipher key and iv
    /// lengths are checked here, so a bad deployment fails before it binds a
    /// listener.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let cipher = PayloadCipher::new(
            config.cipher_mode,
            &config.auth_key,
            config.auth_iv.as_deref(),
        )?;
        let builder = PayloadBuilder::new(
            config.client_code.clone(),
            config.username.clone(),
            config.password.clone(),
            config.callback_url.clone(),
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(SettlementGateway {
            client_code: config.client_code.clone(),
            launch_url: config.launch_url.clone(),
            inquiry_url: config.inquiry_url.clone(),
            cipher,
            builder,
            http,
        })
    }
}

#[async_trait]
impl GatewayApi for SettlementGateway {
    fn client_code(&self) -> &str {
        &self.client_code
    }

    fn build_launch(&self, fields: &InitiationFields) -> GatewayResult<LaunchParameters> {
        let payload = self.builder.initiation_payload(fields);
        let encrypted_payload = self.cipher.encrypt(&payload)?;
        Ok(LaunchParameters {
            launch_url: self.launch_url.clone(),
            encrypted_payload,
            client_code: self.client_code.clone(),
        })
    }

    fn decode_notification(&self, enc_response: &str) -> GatewayResult<CallbackFields> {
        let plaintext = self.cipher.decrypt(enc_response)?;
        parse_response(&plaintext)
    }

    async fn status_inquiry(&self, client_txn_id: &str) -> GatewayResult<CallbackFields> {
        let payload = self.builder.inquiry_payload(client_txn_id);
        let encrypted = self.cipher.encrypt(&payload)?;

        let response = self
            .http
            .post(&self.inquiry_url)
            .form(&[
                ("clientCode", self.client_code.as_str()),
                ("statusTransEncData", encrypted.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GatewayError::Network {
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(GatewayError::UnexpectedResponse {
                message: format!("status inquiry returned HTTP {}", status),
            });
        }

        let blob = extract_enc_response(&body);
        if blob.is_empty() {
            return Err(GatewayError::UnexpectedResponse {
                message: "status inquiry response carried no encrypted data".to_string(),
            });
        }
        let fields = self.decode_notification(blob)?;
        if fields.client_txn_id != client_txn_id {
            return Err(GatewayError::UnexpectedResponse {
                message: format!(
                    "status inquiry answered for '{}', asked about '{}'",
                    fields.client_txn_id, client_txn_id
                ),
            });
        }
        Ok(fields)
    }
}

// Inquiry responses arrive either as a bare blob or wrapped in a form body.
fn extract_enc_response(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.split_once("encResponse=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(""),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::cipher::CipherMode;
    use crate::gateway::payload::parse_amount;
    use crate::gateway::types::PayerInfo;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            client_code: "GB01".to_string(),
            username: "merchant".to_string(),
            password: "s3cret".to_string(),
            cipher_mode: CipherMode::LegacyCbcHex,
            auth_key: "0123456789abcdef".to_string(),
            auth_iv: Some("fedcba9876543210".to_string()),
            launch_url: "https://gateway.test/pay".to_string(),
            inquiry_url: "https://gateway.test/inquiry".to_string(),
            callback_url: "https://pay.giftbay.in/payment/callback".to_string(),
            frontend_base_url: "https://giftbay.in".to_string(),
            request_timeout_secs: 5,
        }
    }

    fn test_cipher() -> PayloadCipher {
        PayloadCipher::new(
            CipherMode::LegacyCbcHex,
            "0123456789abcdef",
            Some("fedcba9876543210"),
        )
        .expect("cipher")
    }

    #[test]
    fn test_build_launch_encrypts_canonical_payload() {
        let gateway = SettlementGateway::new(&test_config()).expect("gateway");
        let launch = gateway
            .build_launch(&InitiationFields {
                client_txn_id: "T17002000000001234".to_string(),
                amount: parse_amount("500").expect("amount"),
                payer: PayerInfo::default(),
                udf1: Some("WALLET_TOPUP".to_string()),
                udf2: None,
            })
            .expect("launch");

        assert_eq!(launch.launch_url, "https://gateway.test/pay");
        assert_eq!(launch.client_code, "GB01");
        let plaintext = test_cipher()
            .decrypt(&launch.encrypted_payload)
            .expect("decrypt");
        assert!(plaintext.contains("clientTxnId=T17002000000001234"));
        assert!(plaintext.contains("amount=500.00"));
    }

    #[test]
    fn test_decode_notification_round_trip() {
        let gateway = SettlementGateway::new(&test_config()).expect("gateway");
        let blob = test_cipher()
            .encrypt("clientTxnId=T1&status=SUCCESS&paidAmount=500.00")
            .expect("encrypt");
        let fields = gateway.decode_notification(&blob).expect("decode");
        assert_eq!(fields.client_txn_id, "T1");
        assert_eq!(fields.status, "SUCCESS");
    }

    #[test]
    fn test_decode_notification_fails_closed_on_garbage() {
        let gateway = SettlementGateway::new(&test_config()).expect("gateway");
        assert!(matches!(
            gateway.decode_notification("zzzz-not-a-payload"),
            Err(GatewayError::Decryption { .. })
        ));
    }

    #[test]
    fn test_new_rejects_bad_key_length() {
        let mut config = test_config();
        config.auth_key = "short".to_string();
        assert!(matches!(
            SettlementGateway::new(&config),
            Err(GatewayError::CryptoConfig { .. })
        ));
    }

    #[test]
    fn test_extract_enc_response() {
        assert_eq!(extract_enc_response("abcdef0123"), "abcdef0123");
        assert_eq!(
            extract_enc_response("encResponse=abcdef0123&clientCode=GB01"),
            "abcdef0123"
        );
        assert_eq!(extract_enc_response("  abcdef0123\n"), "abcdef0123");
    }
}
