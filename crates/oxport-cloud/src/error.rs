/// Errors that can occur when interacting with a cloud provider API.
///
/// # Examples
///
/// ```rust
/// use oxport_cloud::error::CloudProviderError;
///
/// let err = CloudProviderError::ConfigError("folder id is empty".to_string());
/// assert!(err.to_string().contains("folder id"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CloudProviderError {
    /// HTTP-level error: non-2xx status code from the provider API.
    #[error("{provider} API HTTP error: status={status}, body={body}")]
    HttpError {
        provider: String,
        status: u16,
        body: String,
    },

    /// The token endpoint rejected the signed assertion or returned an
    /// unusable token. Fatal for that account's cycle only.
    #[error("token exchange failed for account {account}: {message}")]
    TokenExchange { account: String, message: String },

    /// Building or signing the JWT assertion failed (bad PEM, bad key).
    #[error("JWT signing error: {0}")]
    SigningError(#[from] jsonwebtoken::errors::Error),

    /// HMAC signing failed (invalid key length).
    #[error("HMAC signing error: {0}")]
    HmacError(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// XML deserialization failure (AWS query API responses).
    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::DeError),

    /// Account configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CloudProviderError>;
