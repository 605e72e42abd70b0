//! Bearer-token authentication.
//!
//! Identity lives with the hosted auth service; this middleware only
//! verifies the token and injects the resolved [`AuthUser`] into request
//! extensions. Handlers pull it back out with an extractor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::{AppError, AppErrorKind, AuthError, ExternalError};
use crate::middleware::error::get_request_id_from_headers;

/// The authenticated caller, as vouched for by the auth provider.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<AuthUser, AppError>;
}

/// Verifies tokens against the hosted auth service over HTTP.
pub struct RemoteAuthProvider {
    http: reqwest::Client,
    verify_url: String,
}

impl RemoteAuthProvider {
    pub fn new(config: &AuthConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                AppError::new(AppErrorKind::External(ExternalError::AuthProvider {
                    message: format!("failed to build HTTP client: {}", e),
                }))
            })?;
        Ok(Self {
            http,
            verify_url: config.verify_url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(alias = "id")]
    user_id: String,
}

#[async_trait]
impl AuthProvider for RemoteAuthProvider {
    async fn verify_token(&self, token: &str) -> Result<AuthUser, AppError> {
        let response = self
            .http
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                AppError::new(AppErrorKind::External(ExternalError::AuthProvider {
                    message: e.to_string(),
                }))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AppError::new(AppErrorKind::Auth(AuthError::InvalidToken {
                reason: "auth provider rejected the token".to_string(),
            })));
        }
        if !status.is_success() {
            return Err(AppError::new(AppErrorKind::External(
                ExternalError::AuthProvider {
                    message: format!("token verification returned HTTP {}", status),
                },
            )));
        }

        let verified: VerifyResponse = response.json().await.map_err(|e| {
            AppError::new(AppErrorKind::External(ExternalError::AuthProvider {
                message: format!("malformed verification response: {}", e),
            }))
        })?;
        Ok(AuthUser {
            user_id: verified.user_id,
        })
    }
}

/// Token-to-user map for tests and local development. No network involved.
#[derive(Default)]
pub struct StaticAuthProvider {
    tokens: HashMap<String, String>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn verify_token(&self, token: &str) -> Result<AuthUser, AppError> {
        self.tokens
            .get(token)
            .map(|user_id| AuthUser {
                user_id: user_id.clone(),
            })
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Auth(AuthError::InvalidToken {
                    reason: "unknown token".to_string(),
                }))
            })
    }
}

/// Route layer that rejects unauthenticated requests and stores the caller
/// identity for downstream extractors.
pub async fn require_auth(
    State(provider): State<Arc<dyn AuthProvider>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let request_id = get_request_id_from_headers(request.headers());
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => {
            return Err(attach_request_id(
                AppError::new(AppErrorKind::Auth(AuthError::MissingToken)),
                request_id,
            ));
        }
    };

    let user = provider
        .verify_token(&token)
        .await
        .map_err(|err| attach_request_id(err, request_id))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn attach_request_id(err: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            AppError::new(AppErrorKind::Auth(AuthError::MissingToken))
                .with_context("route reached without auth middleware")
        })
    }
}
