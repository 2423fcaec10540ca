//! Bearer token lifecycle for providers that authenticate with a signed
//! service-account assertion.
//!
//! Each account owns one [`TokenManager`]. The manager is lazy: freshness is
//! checked when a poll asks for a bearer token, and only that poll waits on a
//! refresh. Managers are never shared between accounts.

use crate::error::{CloudProviderError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Yandex Cloud IAM token endpoint; also the `aud` of the signed assertion.
pub const IAM_TOKEN_ENDPOINT: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

/// Lifetime requested for the signed assertion itself.
const ASSERTION_TTL_SECS: i64 = 3600;

/// Service-account key material used to sign token assertions.
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub account_id: String,
    /// Must match the key id registered for the account server-side.
    pub key_id: String,
    /// PEM-encoded RSA private key.
    pub private_key_pem: Vec<u8>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("account_id", &self.account_id)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Uninitialized,
    Valid,
    Expired,
}

/// Claims of the assertion exchanged for a bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Build a PS256-signed assertion for `key`, identified by its key id.
pub fn sign_assertion(
    key: &ServiceAccountKey,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let issued_at = now.timestamp();
    let claims = AssertionClaims {
        iss: key.account_id.clone(),
        aud: audience.to_string(),
        iat: issued_at,
        nbf: issued_at,
        exp: issued_at + ASSERTION_TTL_SECS,
    };

    let mut header = Header::new(Algorithm::PS256);
    header.kid = Some(key.key_id.clone());

    let encoding_key = EncodingKey::from_rsa_pem(&key.private_key_pem)?;
    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

/// Exchanges a service-account key for a short-lived bearer token.
#[async_trait::async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, key: &ServiceAccountKey) -> Result<AccessToken>;
}

/// Exchange against the IAM token endpoint with a signed assertion.
pub struct IamTokenExchange {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    expires_at: DateTime<Utc>,
}

impl IamTokenExchange {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, IAM_TOKEN_ENDPOINT)
    }

    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TokenExchange for IamTokenExchange {
    async fn exchange(&self, key: &ServiceAccountKey) -> Result<AccessToken> {
        // The audience is the fixed public endpoint even when the request is
        // routed elsewhere.
        let assertion = sign_assertion(key, IAM_TOKEN_ENDPOINT, Utc::now())?;

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "jwt": assertion }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CloudProviderError::TokenExchange {
                account: key.account_id.clone(),
                message: format!("status={status}, body={body}"),
            });
        }

        let parsed: IamTokenResponse = serde_json::from_str(&body)?;
        Ok(AccessToken {
            token: parsed.iam_token,
            expires_at: parsed.expires_at,
        })
    }
}

/// Per-account token cache: `Uninitialized -> Valid -> Expired -> Valid ...`.
pub struct TokenManager {
    key: ServiceAccountKey,
    cached: Option<AccessToken>,
    exchange: Box<dyn TokenExchange>,
}

impl TokenManager {
    pub fn new(key: ServiceAccountKey, exchange: Box<dyn TokenExchange>) -> Self {
        Self {
            key,
            cached: None,
            exchange,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.key.account_id
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        match &self.cached {
            None => TokenState::Uninitialized,
            Some(token) if token.is_valid_at(now) => TokenState::Valid,
            Some(_) => TokenState::Expired,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cached.as_ref().map(|t| t.expires_at)
    }

    /// Return a bearer token valid at the time of the call, refreshing first
    /// if the cache is empty or expired.
    pub async fn bearer(&mut self) -> Result<String> {
        self.bearer_at(Utc::now()).await
    }

    pub async fn bearer_at(&mut self, now: DateTime<Utc>) -> Result<String> {
        if self.state_at(now) != TokenState::Valid {
            self.refresh_at(now).await?;
        }
        match &self.cached {
            Some(token) => Ok(token.token.clone()),
            None => Err(self.exchange_error("no token cached after refresh")),
        }
    }

    /// Unconditionally exchange a new token. A failed exchange leaves the
    /// cache untouched.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        tracing::info!(account = %self.key.account_id, "Refreshing access token");
        let token = self.exchange.exchange(&self.key).await?;
        if !token.is_valid_at(now) {
            return Err(self.exchange_error(&format!(
                "token endpoint returned a token expiring at {}",
                token.expires_at
            )));
        }
        tracing::debug!(
            account = %self.key.account_id,
            expires_in_secs = (token.expires_at - now).num_seconds(),
            "Access token refreshed"
        );
        self.cached = Some(token);
        Ok(())
    }

    /// Seed the cache, e.g. with a token obtained out of band.
    pub fn set_cached(&mut self, token: AccessToken) {
        self.cached = Some(token);
    }

    fn exchange_error(&self, message: &str) -> CloudProviderError {
        CloudProviderError::TokenExchange {
            account: self.key.account_id.clone(),
            message: message.to_string(),
        }
    }
}

/// Convenience for tests and static-token providers.
pub fn token_valid_for(token: &str, ttl: Duration) -> AccessToken {
    AccessToken {
        token: token.to_string(),
        expires_at: Utc::now() + ttl,
    }
}
