//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0)
//! - Check addresses and URLs parse
//! - Check settings that depend on each other (client auth needs a CA)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TitanConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ClientAuthMode, GoogleTokenKind, TitanConfig};

/// Placeholder secret shipped in the defaults.
pub const PLACEHOLDER_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a log level name (case-insensitive). Returns it lowercased.
pub fn validate_log_level(level: &str) -> Result<String, ValidationError> {
    let lowered = level.to_lowercase();
    if LOG_LEVELS.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {}", level, LOG_LEVELS.join(", ")),
        ))
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &TitanConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", listener.bind_address),
        ));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if listener.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.handshake_timeout_secs", "must be greater than 0"));
    }
    if listener.tls.cert_path.is_empty() {
        errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
    }
    if listener.tls.key_path.is_empty() {
        errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
    }
    if listener.tls.client_auth == ClientAuthMode::Required && listener.tls.client_ca_path.is_none() {
        errors.push(ValidationError::new(
            "listener.tls.client_ca_path",
            "required when client_auth = \"required\"",
        ));
    }

    if config.protocol.max_frame_size == 0 {
        errors.push(ValidationError::new("protocol.max_frame_size", "must be greater than 0"));
    }
    if config.protocol.write_timeout_secs == 0 {
        errors.push(ValidationError::new("protocol.write_timeout_secs", "must be greater than 0"));
    }

    let auth = &config.auth;
    if auth.token_secret.is_empty() || auth.token_secret == PLACEHOLDER_SECRET {
        errors.push(ValidationError::new("auth.token_secret", "must be set to a real secret"));
    }
    if auth.token_ttl_secs == Some(0) {
        errors.push(ValidationError::new("auth.token_ttl_secs", "must be greater than 0 when set"));
    }
    let google = &auth.google;
    if google.token_kind == GoogleTokenKind::IdToken && google.client_id.is_empty() {
        errors.push(ValidationError::new(
            "auth.google.client_id",
            "required when token_kind = \"id_token\"",
        ));
    }
    for (field, value) in [
        ("auth.google.profile_url", &google.profile_url),
        ("auth.google.tokeninfo_url", &google.tokeninfo_url),
    ] {
        if let Err(e) = url::Url::parse(value) {
            errors.push(ValidationError::new(field, format!("'{}' is not a URL: {}", value, e)));
        }
    }
    if google.request_timeout_secs == 0 {
        errors.push(ValidationError::new("auth.google.request_timeout_secs", "must be greater than 0"));
    }

    let observability = &config.observability;
    if let Err(e) = validate_log_level(&observability.log_level) {
        errors.push(e);
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TitanConfig {
        let mut config = TitanConfig::default();
        config.auth.token_secret = "test-secret".to_string();
        config
    }

    fn fields(config: &TitanConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn defaults_with_secret_are_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert_eq!(fields(&TitanConfig::default()), vec!["auth.token_secret"]);
    }

    #[test]
    fn reports_every_error() {
        let mut config = valid();
        config.listener.bind_address = "nowhere".to_string();
        config.listener.max_connections = 0;
        config.protocol.max_frame_size = 0;
        config.observability.log_level = "loud".to_string();

        assert_eq!(
            fields(&config),
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "protocol.max_frame_size",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn required_client_auth_needs_ca() {
        let mut config = valid();
        config.listener.tls.client_auth = ClientAuthMode::Required;
        assert_eq!(fields(&config), vec!["listener.tls.client_ca_path"]);

        config.listener.tls.client_ca_path = Some("ca.pem".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn id_tokens_need_client_id() {
        let mut config = valid();
        config.auth.google.token_kind = GoogleTokenKind::IdToken;
        assert_eq!(fields(&config), vec!["auth.google.client_id"]);
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = valid();
        config.observability.metrics_address = "bad".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(fields(&config), vec!["observability.metrics_address"]);
    }

    #[test]
    fn log_level_override_is_checked() {
        assert_eq!(validate_log_level("DEBUG").unwrap(), "debug");
        let err = validate_log_level("loud").unwrap_err();
        assert_eq!(err.field, "observability.log_level");
        assert!(err.message.contains("'loud'"));
    }
}
