//! Startup orchestration.
//!
//! Builds every collaborator from a validated config in dependency order and
//! binds the listener last, so traffic only arrives once everything is ready.

use std::sync::Arc;

use crate::config::TitanConfig;
use crate::identity::GoogleClient;
use crate::net::tls::load_tls_config;
use crate::server::{ServerError, TitanServer};
use crate::store::InMemoryUserStore;

/// A bound server and the store it writes to.
pub struct Started {
    pub server: TitanServer,
    pub store: Arc<InMemoryUserStore>,
}

/// Initialize subsystems and bind the server.
pub async fn start(config: &TitanConfig) -> Result<Started, ServerError> {
    let tls = load_tls_config(&config.listener.tls)?;
    tracing::info!(
        cert_path = %config.listener.tls.cert_path,
        client_auth = ?config.listener.tls.client_auth,
        "TLS configured"
    );

    let store = Arc::new(match &config.store.users_path {
        Some(path) => InMemoryUserStore::load_from_file(path)?,
        None => InMemoryUserStore::new(None),
    });

    let provider = Arc::new(GoogleClient::new(&config.auth.google)?);
    tracing::info!(
        token_kind = ?config.auth.google.token_kind,
        client_id = %provider.client_id(),
        "Google identity provider configured"
    );

    let server = TitanServer::bind(config, tls, store.clone(), provider).await?;
    Ok(Started { server, store })
}
