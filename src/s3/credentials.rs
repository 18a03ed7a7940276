//! S3 Credentials Module
//!
//! Provides credential loading from various sources using a trait-based design.
//!
//! # Design
//!
//! - `CredentialsProvider` trait defines the interface
//! - The client calls the provider before every signed request and fails the
//!   request when the provider fails; there is no fallback to stale values
//!
//! # Implementations
//!
//! - `StaticCredentials` - Credentials from configuration
//! - `EnvironmentCredentials` - Credentials from environment variables
//!
//! # Example
//!
//! ```
//! use mizuchi_s3::s3::{CredentialsProvider, StaticCredentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StaticCredentials::new("access-key", "secret-key");
//!
//! let creds = provider.get_credentials().await?;
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Credentials for AWS authentication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    /// Get the access key ID
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Get the session token (if any)
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref().filter(|t| !t.is_empty())
    }

    /// True when either key is empty; such credentials never sign
    pub fn is_anonymous(&self) -> bool {
        self.access_key_id.is_empty() || self.secret_access_key.is_empty()
    }
}

/// Trait for credential providers
///
/// Implement this trait to plug in custom credential sources (STS, IMDS, ...).
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Fetch the current credentials
    async fn get_credentials(&self) -> Result<Credentials, CredentialsError>;
}

/// Static credentials provider
///
/// Holds credentials directly. Useful for testing or when credentials
/// are known up front.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a new static credentials provider
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(access_key_id, secret_access_key),
        }
    }

    /// Wrap existing credentials
    pub fn from_credentials(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}

/// Environment credentials provider
///
/// Reads the environment on every call so rotated values are picked up.
///
/// Looks for:
/// - `AWS_ACCESS_KEY_ID`
/// - `AWS_SECRET_ACCESS_KEY`
/// - `AWS_SESSION_TOKEN` (optional)
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCredentials;

impl EnvironmentCredentials {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialsProvider for EnvironmentCredentials {
    async fn get_credentials(&self) -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        if access_key.is_empty() || secret_key.is_empty() {
            return Err(CredentialsError::InvalidCredentials(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must not be empty".into(),
            ));
        }

        Ok(match std::env::var("AWS_SESSION_TOKEN").ok() {
            Some(token) if !token.is_empty() => {
                Credentials::with_session_token(access_key, secret_key, token)
            }
            _ => Credentials::new(access_key, secret_key),
        })
    }
}
