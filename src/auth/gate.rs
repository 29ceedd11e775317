//! Authentication gate for unauthenticated connections.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::auth::{AuthError, AuthMethod, CertLogin, GoogleLogin, TokenService};
use crate::identity::IdentityProvider;
use crate::net::connection::Connection;
use crate::observability::metrics;
use crate::protocol::Message;
use crate::store::UserStore;

/// Decision for one message received before authentication.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Promote the session and reply with `result`.
    Allow {
        user_id: String,
        method: AuthMethod,
        result: Value,
    },
    /// Send an error reply, then close.
    Reject { code: i32, message: String },
    /// Close without replying.
    ProtocolViolation(&'static str),
    /// The connection closed while the login was in flight; nothing was applied.
    Abandoned,
}

/// Dispatches bootstrap methods to their verifiers.
#[derive(Clone)]
pub struct AuthGate {
    cert: CertLogin,
    tokens: TokenService,
    google: GoogleLogin,
}

impl AuthGate {
    pub fn new(store: Arc<dyn UserStore>, provider: Arc<dyn IdentityProvider>, tokens: TokenService) -> Self {
        Self {
            cert: CertLogin::new(Arc::clone(&store)),
            google: GoogleLogin::new(provider, store, tokens.clone()),
            tokens,
        }
    }

    /// Decide what to do with `message` on an unauthenticated connection.
    pub async fn authenticate(&self, message: &Message, conn: &Connection) -> AuthOutcome {
        let Some(name) = message.method() else {
            return AuthOutcome::ProtocolViolation("missing_method");
        };
        let Some(method) = AuthMethod::from_method_name(name) else {
            tracing::warn!(
                connection_id = %conn.id(),
                method = name,
                "Method called before authentication"
            );
            return AuthOutcome::ProtocolViolation("unauthenticated_method");
        };

        let result = match method {
            AuthMethod::Cert => self
                .cert
                .login(conn.peer_certificates())
                .await
                .map(|user_id| (user_id, json!("ACK"))),
            AuthMethod::Token => self.token_login(message).map(|user_id| (user_id, json!("ACK"))),
            AuthMethod::Google => {
                let token = message.string_param("token").unwrap_or_default();
                self.google
                    .login(token, conn.cancellation())
                    .await
                    .map(|grant| (grant.user_id, json!({ "token": grant.token })))
            }
        };

        match result {
            Ok((user_id, result)) => {
                metrics::record_auth(method.as_str(), "success");
                tracing::info!(
                    connection_id = %conn.id(),
                    method = %method,
                    user_id = %user_id,
                    "Session authenticated"
                );
                AuthOutcome::Allow {
                    user_id,
                    method,
                    result,
                }
            }
            Err(AuthError::Cancelled) => {
                metrics::record_auth(method.as_str(), "cancelled");
                tracing::debug!(connection_id = %conn.id(), method = %method, "Authentication abandoned");
                AuthOutcome::Abandoned
            }
            Err(e) => {
                metrics::record_auth(method.as_str(), "rejected");
                if e.is_upstream() {
                    tracing::warn!(connection_id = %conn.id(), method = %method, error = %e, "Authentication failed upstream");
                } else {
                    tracing::info!(connection_id = %conn.id(), method = %method, error = %e, "Authentication rejected");
                }
                AuthOutcome::Reject {
                    code: e.code(),
                    message: e.client_message().to_string(),
                }
            }
        }
    }

    fn token_login(&self, message: &Message) -> Result<String, AuthError> {
        let token = message
            .string_param("token")
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let claims = self.tokens.verify(token).map_err(AuthError::Token)?;
        Ok(claims.userid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Profile, ProviderError};
    use crate::net::connection::ConnectionOptions;
    use crate::protocol::AUTH_FAILURE_CODE;
    use crate::store::InMemoryUserStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StaticProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn resolve_profile(&self, token: &str) -> Result<Profile, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == "bad" {
                return Err(ProviderError::Status {
                    endpoint: "google profile",
                    status: 401,
                });
            }
            Ok(Profile {
                name: "Carol".to_string(),
                email: "carol@example.com".to_string(),
                picture: Vec::new(),
            })
        }
    }

    struct Fixture {
        gate: AuthGate,
        tokens: TokenService,
        provider: Arc<StaticProvider>,
        conn: Arc<Connection>,
        _peer: tokio::io::DuplexStream,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryUserStore::new(None));
        let provider = Arc::new(StaticProvider::default());
        let tokens = TokenService::new(b"gate-secret", None);
        let gate = AuthGate::new(store, provider.clone(), tokens.clone());
        let (local, peer) = tokio::io::duplex(4096);
        let (conn, _reader) = Connection::new(
            local,
            "127.0.0.1:9".parse().unwrap(),
            Vec::new(),
            ConnectionOptions::default(),
        );
        Fixture {
            gate,
            tokens,
            provider,
            conn,
            _peer: peer,
        }
    }

    fn request(method: &str, params: Option<Value>) -> Message {
        Message::request("1", method, params)
    }

    #[tokio::test]
    async fn valid_token_is_allowed() {
        let f = fixture();
        let token = f.tokens.issue("user-42").unwrap();
        let outcome = f
            .gate
            .authenticate(&request("auth.token", Some(json!({ "token": token }))), &f.conn)
            .await;
        assert_eq!(
            outcome,
            AuthOutcome::Allow {
                user_id: "user-42".to_string(),
                method: AuthMethod::Token,
                result: json!("ACK"),
            }
        );
    }

    #[tokio::test]
    async fn bad_tokens_are_rejected() {
        let f = fixture();
        for params in [None, Some(json!({ "token": "" })), Some(json!({ "token": "nope" }))] {
            let outcome = f.gate.authenticate(&request("auth.token", params), &f.conn).await;
            assert!(matches!(outcome, AuthOutcome::Reject { code: AUTH_FAILURE_CODE, .. }));
        }
    }

    #[tokio::test]
    async fn non_bootstrap_method_is_a_violation() {
        let f = fixture();
        let outcome = f.gate.authenticate(&request("echo", None), &f.conn).await;
        assert_eq!(outcome, AuthOutcome::ProtocolViolation("unauthenticated_method"));

        let outcome = f.gate.authenticate(&Message::default(), &f.conn).await;
        assert_eq!(outcome, AuthOutcome::ProtocolViolation("missing_method"));
    }

    #[tokio::test]
    async fn cert_without_peer_certificate_is_rejected() {
        let f = fixture();
        let outcome = f.gate.authenticate(&request("auth.cert", None), &f.conn).await;
        assert_eq!(
            outcome,
            AuthOutcome::Reject {
                code: AUTH_FAILURE_CODE,
                message: "No client certificate was provided.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn google_login_returns_token() {
        let f = fixture();
        let outcome = f
            .gate
            .authenticate(&request("auth.google", Some(json!({ "token": "good" }))), &f.conn)
            .await;
        let AuthOutcome::Allow { user_id, result, .. } = outcome else {
            panic!("expected allow, got {:?}", outcome);
        };
        let token = result["token"].as_str().unwrap();
        assert_eq!(f.tokens.verify(token).unwrap().userid, user_id);
    }

    #[tokio::test]
    async fn closed_connection_abandons_google_login() {
        let f = fixture();
        f.conn.close();
        let outcome = f
            .gate
            .authenticate(&request("auth.google", Some(json!({ "token": "good" }))), &f.conn)
            .await;
        assert_eq!(outcome, AuthOutcome::Abandoned);
    }

    #[tokio::test]
    async fn google_failures_use_generic_messages() {
        let f = fixture();
        let outcome = f.gate.authenticate(&request("auth.google", None), &f.conn).await;
        assert_eq!(
            outcome,
            AuthOutcome::Reject {
                code: AUTH_FAILURE_CODE,
                message: "Malformed or null Google oauth access token was provided.".to_string(),
            }
        );
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);

        let outcome = f
            .gate
            .authenticate(&request("auth.google", Some(json!({ "token": "bad" }))), &f.conn)
            .await;
        assert_eq!(
            outcome,
            AuthOutcome::Reject {
                code: AUTH_FAILURE_CODE,
                message: "Failed to authenticate with the given Google oauth access token.".to_string(),
            }
        );
    }
}
