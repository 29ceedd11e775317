//! Third-party identity providers.
//!
//! # Responsibilities
//! - Exchange a client-supplied token for a verified profile
//! - Fetch the profile picture bytes
//! - Reject tokens issued for a different application (ID-token variant)
//!
//! # Design Decisions
//! - The expected client id is injected through configuration, never global
//! - Provider internals stay in `ProviderError`; clients only see a generic message

pub mod google;

use async_trait::async_trait;
use thiserror::Error;

pub use google::GoogleClient;

/// Profile resolved from a provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub picture: Vec<u8>,
}

/// Identity provider failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: &'static str,
        source: reqwest::Error,
    },

    #[error("{endpoint} answered with status {status}")]
    Status {
        endpoint: &'static str,
        status: u16,
    },

    #[error("failed to decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },

    #[error("token was issued for another client id: {0}")]
    AudienceMismatch(String),

    #[error("profile is missing an e-mail address")]
    MissingEmail,

    #[error("invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Resolves tokens into user profiles.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_profile(&self, token: &str) -> Result<Profile, ProviderError>;
}
