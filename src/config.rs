//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

use crate::gateway::cipher::CipherMode;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Payment gateway configuration. One deployment speaks exactly one cipher
/// mode; key material for the other mode is not even loaded.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub client_code: String,
    pub username: String,
    pub password: String,
    pub cipher_mode: CipherMode,
    pub auth_key: String,
    pub auth_iv: Option<String>,
    pub launch_url: String,
    pub inquiry_url: String,
    pub callback_url: String,
    pub frontend_base_url: String,
    pub request_timeout_secs: u64,
}

/// Auth service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub verify_url: String,
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.gateway.validate()?;
        self.auth.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cipher_mode_raw =
            env::var("GATEWAY_CIPHER_MODE").unwrap_or_else(|_| "aead-cbc-b64".to_string());
        let cipher_mode = CipherMode::parse(&cipher_mode_raw).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "GATEWAY_CIPHER_MODE must be legacy-cbc-hex or aead-cbc-b64, got {}",
                cipher_mode_raw
            ))
        })?;

        Ok(GatewayConfig {
            client_code: env::var("GATEWAY_CLIENT_CODE")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_CLIENT_CODE".to_string()))?,
            username: env::var("GATEWAY_USERNAME")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_USERNAME".to_string()))?,
            password: env::var("GATEWAY_PASSWORD")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_PASSWORD".to_string()))?,
            cipher_mode,
            auth_key: env::var("GATEWAY_AUTH_KEY")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_AUTH_KEY".to_string()))?,
            auth_iv: env::var("GATEWAY_AUTH_IV").ok().filter(|v| !v.is_empty()),
            launch_url: env::var("GATEWAY_LAUNCH_URL")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_LAUNCH_URL".to_string()))?,
            inquiry_url: env::var("GATEWAY_INQUIRY_URL")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_INQUIRY_URL".to_string()))?,
            callback_url: env::var("PAYMENT_CALLBACK_URL")
                .map_err(|_| ConfigError::MissingVariable("PAYMENT_CALLBACK_URL".to_string()))?,
            frontend_base_url: env::var("FRONTEND_BASE_URL")
                .map_err(|_| ConfigError::MissingVariable("FRONTEND_BASE_URL".to_string()))?,
            request_timeout_secs: env::var("GATEWAY_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_REQUEST_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_code.is_empty() {
            return Err(ConfigError::InvalidValue("GATEWAY_CLIENT_CODE".to_string()));
        }

        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_USERNAME and GATEWAY_PASSWORD cannot be empty".to_string(),
            ));
        }

        if self.auth_key.is_empty() {
            return Err(ConfigError::InvalidValue("GATEWAY_AUTH_KEY".to_string()));
        }

        match self.cipher_mode {
            CipherMode::LegacyCbcHex => {
                if self.auth_iv.is_none() {
                    return Err(ConfigError::ValidationFailed(
                        "GATEWAY_AUTH_IV is required in legacy-cbc-hex mode".to_string(),
                    ));
                }
            }
            CipherMode::AeadCbcBase64 => {
                if self.auth_iv.is_some() {
                    return Err(ConfigError::ValidationFailed(
                        "GATEWAY_AUTH_IV must not be set in aead-cbc-b64 mode".to_string(),
                    ));
                }
            }
        }

        for (name, url) in [
            ("GATEWAY_LAUNCH_URL", &self.launch_url),
            ("GATEWAY_INQUIRY_URL", &self.inquiry_url),
            ("PAYMENT_CALLBACK_URL", &self.callback_url),
            ("FRONTEND_BASE_URL", &self.frontend_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a valid URL",
                    name
                )));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_REQUEST_TIMEOUT".to_string(),
            ));
        }

        Ok(())
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            verify_url: env::var("AUTH_VERIFY_URL")
                .map_err(|_| ConfigError::MissingVariable("AUTH_VERIFY_URL".to_string()))?,
            request_timeout_secs: env::var("AUTH_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("AUTH_REQUEST_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.verify_url.starts_with("http://") && !self.verify_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "AUTH_VERIFY_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_config() -> GatewayConfig {
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
            request_timeout_secs: 15,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_validation() {
        assert!(gateway_config().validate().is_ok());
    }

    #[test]
    fn test_legacy_mode_requires_iv() {
        let mut config = gateway_config();
        config.auth_iv = None;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_aead_mode_rejects_iv() {
        let mut config = gateway_config();
        config.cipher_mode = CipherMode::AeadCbcBase64;

        assert!(config.validate().is_err());

        config.auth_iv = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_url_launch_url_rejected() {
        let mut config = gateway_config();
        config.launch_url = "gateway.test/pay".to_string();

        assert!(config.validate().is_err());
    }
}
