//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tokio::task::JoinHandle;

use titan::auth::{Session, TokenService};
use titan::client::Client;
use titan::config::{ClientAuthMode, TitanConfig};
use titan::identity::{IdentityProvider, Profile, ProviderError};
use titan::lifecycle::Shutdown;
use titan::net::connection::{CloseReason, Connection, ConnectionEvents};
use titan::net::tls;
use titan::server::{ServerError, TitanServer};
use titan::store::{InMemoryUserStore, User, UserStore};

pub const TOKEN_SECRET: &str = "integration-test-secret";

/// Test CA plus a server leaf for `localhost`.
pub struct Pki {
    ca_cert: Certificate,
    ca_key: KeyPair,
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
}

impl Pki {
    pub fn new() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "titan test ca");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params.distinguished_name.push(DnType::CommonName, "localhost");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server_key = KeyPair::generate().unwrap();
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
            ca_cert,
            ca_key,
        }
    }

    /// Client leaf signed by the CA with subject CN `common_name`.
    /// Returns (cert PEM, key PEM).
    pub fn client_identity(&self, common_name: &str) -> (String, String) {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        (cert.pem(), key.serialize_pem())
    }
}

/// Provider answering from a fixed token → profile table.
#[derive(Default)]
pub struct StaticProvider {
    profiles: HashMap<String, Profile>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn with(mut self, token: &str, name: &str, email: &str) -> Self {
        self.profiles.insert(
            token.to_string(),
            Profile {
                name: name.to_string(),
                email: email.to_string(),
                picture: vec![0x89, 0x50, 0x4e, 0x47],
            },
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    async fn resolve_profile(&self, token: &str) -> Result<Profile, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.profiles.get(token).cloned().ok_or(ProviderError::Status {
            endpoint: "google profile",
            status: 401,
        })
    }
}

/// Records connection lifecycle callbacks.
#[derive(Default)]
pub struct RecordingEvents {
    connected: AtomicUsize,
    disconnected: Mutex<Vec<CloseReason>>,
}

impl RecordingEvents {
    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> Vec<CloseReason> {
        self.disconnected.lock().unwrap().clone()
    }
}

impl ConnectionEvents for RecordingEvents {
    fn connected(&self, _conn: &Connection, _session: &Session) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnected(&self, _conn: &Connection, _session: &Session, reason: CloseReason) {
        self.disconnected.lock().unwrap().push(reason);
    }
}

/// A running server and handles to its collaborators.
pub struct TestServer {
    pub addr: SocketAddr,
    pub pki: Pki,
    pub store: Arc<InMemoryUserStore>,
    pub provider: Arc<StaticProvider>,
    pub events: Arc<RecordingEvents>,
    pub tokens: TokenService,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn start(provider: StaticProvider, client_auth: ClientAuthMode) -> Self {
        let pki = Pki::new();
        let mut config = TitanConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();
        config.auth.token_secret = TOKEN_SECRET.to_string();
        config.shutdown.drain_timeout_secs = 2;

        let ca = (client_auth != ClientAuthMode::Off).then_some(pki.ca_pem.as_bytes());
        let tls_config = tls::server_config(
            pki.server_cert_pem.as_bytes(),
            pki.server_key_pem.as_bytes(),
            ca,
            client_auth,
        )
        .unwrap();

        let store = Arc::new(InMemoryUserStore::new(None));
        let provider = Arc::new(provider);
        let events = Arc::new(RecordingEvents::default());

        let server = TitanServer::bind(&config, tls_config, store.clone(), provider.clone())
            .await
            .unwrap()
            .with_events(events.clone());
        let addr = server.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(server.run(shutdown.subscribe()));

        Self {
            addr,
            pki,
            store,
            provider,
            events,
            tokens: TokenService::new(TOKEN_SECRET.as_bytes(), None),
            shutdown,
            handle,
        }
    }

    /// Connect without a client certificate.
    pub async fn connect(&self) -> Client {
        let config = tls::client_config(self.pki.ca_pem.as_bytes(), None).unwrap();
        Client::connect(self.addr, "localhost", config).await.unwrap()
    }

    /// Connect presenting a CA-signed certificate for `common_name`.
    pub async fn connect_as(&self, common_name: &str) -> Client {
        let (cert, key) = self.pki.client_identity(common_name);
        let config =
            tls::client_config(self.pki.ca_pem.as_bytes(), Some((cert.as_bytes(), key.as_bytes()))).unwrap();
        Client::connect(self.addr, "localhost", config).await.unwrap()
    }

    /// Register a user with a fixed id.
    pub async fn add_user(&self, id: &str, email: &str) -> User {
        let mut user = User::new(email, id, Vec::new());
        user.id = id.to_string();
        self.store.save_user(&mut user).await.unwrap();
        user
    }

    /// Stop accepting, close connections and wait for the server task.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.handle.await.unwrap()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Run `fut` with a deadline so a hung connection fails the test instead of stalling it.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}
