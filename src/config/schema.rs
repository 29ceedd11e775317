//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::net::connection::ConnectionOptions;

/// Root configuration for the titan server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TitanConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Frame protocol limits and timeouts.
    pub protocol: ProtocolConfig,

    /// Authentication settings.
    pub auth: AuthConfig,

    /// User store settings.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3001").
    pub bind_address: String,

    /// TLS configuration. Plain TCP is not supported.
    pub tls: TlsConfig,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Time allowed for the TLS handshake in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            tls: TlsConfig::default(),
            max_connections: 10_000,
            handshake_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Whether the TLS layer asks for client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// Never request a client certificate.
    Off,
    /// Request and verify a certificate, but accept clients without one.
    #[default]
    Optional,
    /// Refuse the handshake without a verified client certificate.
    Required,
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// CA bundle used to verify client certificates (PEM).
    pub client_ca_path: Option<String>,

    /// Client certificate policy.
    pub client_auth: ClientAuthMode,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
            client_ca_path: None,
            client_auth: ClientAuthMode::Optional,
        }
    }
}

/// Frame protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,

    /// Outbound write timeout in seconds.
    pub write_timeout_secs: u64,

    /// Close connections silent for this many seconds (0 disables).
    pub idle_timeout_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout_secs: 10,
            idle_timeout_secs: 0,
        }
    }
}

impl ProtocolConfig {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_frame_size: self.max_frame_size,
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing bearer tokens.
    pub token_secret: String,

    /// Token lifetime in seconds. Tokens never expire when unset.
    pub token_ttl_secs: Option<u64>,

    /// Google federated login.
    pub google: GoogleConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            token_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            token_ttl_secs: None,
            google: GoogleConfig::default(),
        }
    }
}

/// Which kind of Google token clients present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoogleTokenKind {
    /// OAuth 2.0 access token with `profile` and `email` scopes.
    #[default]
    AccessToken,
    /// OpenID Connect ID token, checked against `client_id`.
    IdToken,
}

/// Google identity provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// OAuth client id this server is registered under (expected `aud`).
    pub client_id: String,

    /// Token kind accepted by `auth.google`.
    pub token_kind: GoogleTokenKind,

    /// Profile endpoint for access tokens.
    pub profile_url: String,

    /// Token info endpoint for ID tokens.
    pub tokeninfo_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            token_kind: GoogleTokenKind::AccessToken,
            profile_url: "https://www.googleapis.com/plus/v1/people/me".to_string(),
            tokeninfo_url: "https://www.googleapis.com/oauth2/v3/tokeninfo".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// User store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file the in-memory store is loaded from and flushed to.
    pub users_path: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for connections to drain, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accept_large_frames() {
        let config = TitanConfig::default();
        assert!(config.protocol.max_frame_size >= 500_000);
        assert_eq!(config.listener.tls.client_auth, ClientAuthMode::Optional);
        assert!(config.protocol.connection_options().idle_timeout.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let config: TitanConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:4000"

            [listener.tls]
            cert_path = "/etc/titan/cert.pem"
            key_path = "/etc/titan/key.pem"
            client_ca_path = "/etc/titan/ca.pem"
            client_auth = "required"

            [protocol]
            idle_timeout_secs = 30

            [auth.google]
            client_id = "1234.apps.googleusercontent.com"
            token_kind = "id_token"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.listener.tls.client_auth, ClientAuthMode::Required);
        assert_eq!(config.auth.google.token_kind, GoogleTokenKind::IdToken);
        assert_eq!(
            config.protocol.connection_options().idle_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.protocol.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }
}
