//! Session authentication.
//!
//! # Data Flow
//! ```text
//! unauthenticated frame
//!     → gate.rs (allow-list: auth.cert | auth.token | auth.google)
//!     → cert.rs   (verified peer certificate → user)
//!     → token.rs  (signed bearer token → user id)
//!     → google.rs (provider profile → find-or-create user → token)
//!     → AuthOutcome → Session::promote or error reply + close
//! ```
//!
//! # Design Decisions
//! - Every failure is reported to the peer with code 666 and a fixed message;
//!   provider and store details only reach the logs
//! - A verified TLS certificate does not authenticate the session until
//!   `auth.cert` is called

pub mod cert;
pub mod gate;
pub mod google;
pub mod session;
pub mod token;

use thiserror::Error;

use crate::identity::ProviderError;
use crate::protocol::AUTH_FAILURE_CODE;
use crate::store::StoreError;

pub use cert::CertLogin;
pub use gate::{AuthGate, AuthOutcome};
pub use google::{GoogleLogin, LoginGrant};
pub use session::{AuthMethod, Session};
pub use token::{Claims, TokenError, TokenService};

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("empty Google token")]
    EmptyGoogleToken,

    #[error("identity provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("empty bearer token")]
    MissingToken,

    #[error("bearer token rejected: {0}")]
    Token(#[source] TokenError),

    #[error("token issuance failed: {0}")]
    Issue(#[source] TokenError),

    #[error("no verified client certificate")]
    NoCertificate,

    #[error("unusable client certificate: {0}")]
    BadCertificate(String),

    #[error("no user for certificate subject {0}")]
    UnknownCertificate(String),

    #[error("user store failed: {0}")]
    Store(#[from] StoreError),

    #[error("connection closed during authentication")]
    Cancelled,
}

impl AuthError {
    /// Error code sent to the peer.
    pub fn code(&self) -> i32 {
        AUTH_FAILURE_CODE
    }

    /// Message sent to the peer. Never includes internal details.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::EmptyGoogleToken => "Malformed or null Google oauth access token was provided.",
            AuthError::Provider(_) | AuthError::Issue(_) => {
                "Failed to authenticate with the given Google oauth access token."
            }
            AuthError::MissingToken => "Malformed or null token was provided.",
            AuthError::Token(_) => "Invalid or expired token.",
            AuthError::NoCertificate => "No client certificate was provided.",
            AuthError::BadCertificate(_) | AuthError::UnknownCertificate(_) => {
                "Client certificate is not associated with a user."
            }
            AuthError::Store(_) | AuthError::Cancelled => "Authentication could not be completed.",
        }
    }

    /// Whether the failure came from a collaborator rather than the peer.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AuthError::Provider(_) | AuthError::Store(_) | AuthError::Issue(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_hide_details() {
        let err = AuthError::Store(StoreError::UnknownUser("secret-id".to_string()));
        assert_eq!(err.code(), 666);
        assert!(!err.client_message().contains("secret-id"));
        assert!(err.is_upstream());

        let err = AuthError::Provider(ProviderError::AudienceMismatch("other".to_string()));
        assert!(!err.client_message().contains("other"));
    }

    #[test]
    fn all_failures_share_one_code() {
        let errors = [
            AuthError::EmptyGoogleToken,
            AuthError::MissingToken,
            AuthError::NoCertificate,
            AuthError::UnknownCertificate("cn".to_string()),
        ];
        for err in errors {
            assert_eq!(err.code(), AUTH_FAILURE_CODE);
            assert!(!err.is_upstream());
        }
    }
}
