//! TLS configuration and certificate loading.
//!
//! Server and client configurations are built on rustls with the `ring`
//! provider. Client certificates are verified against the configured CA roots;
//! whether one is required is a listener policy (see [`ClientAuthMode`]).

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::schema::{ClientAuthMode, TlsConfig};

/// Errors while loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid PEM data: {0}")]
    Pem(std::io::Error),

    #[error("no certificates found in PEM data")]
    NoCertificates,

    #[error("no private key found in PEM data")]
    NoPrivateKey,

    #[error("client_auth = {0:?} needs a client CA bundle")]
    MissingClientCa(ClientAuthMode),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Parse every certificate in a PEM bundle.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM bundle.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)
}

fn root_store(pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(pem)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Build a server configuration from PEM material.
pub fn server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: Option<&[u8]>,
    client_auth: ClientAuthMode,
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;
    let builder = ServerConfig::builder_with_provider(provider()).with_safe_default_protocol_versions()?;

    let builder = match (client_auth, client_ca_pem) {
        (ClientAuthMode::Off, _) => builder.with_no_client_auth(),
        (mode, None) => return Err(TlsError::MissingClientCa(mode)),
        (mode, Some(ca_pem)) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(
                Arc::new(root_store(ca_pem)?),
                provider(),
            );
            let verifier = if mode == ClientAuthMode::Optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

/// Load the listener's TLS configuration from disk.
///
/// `client_auth = optional` without a CA bundle degrades to no client auth.
pub fn load_tls_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = read_file(Path::new(&config.cert_path))?;
    let key_pem = read_file(Path::new(&config.key_path))?;
    let ca_pem = config
        .client_ca_path
        .as_deref()
        .map(|p| read_file(Path::new(p)))
        .transpose()?;

    let client_auth = match (config.client_auth, &ca_pem) {
        (ClientAuthMode::Optional, None) => {
            tracing::warn!("No client CA configured, client certificates will not be requested");
            ClientAuthMode::Off
        }
        (mode, _) => mode,
    };

    server_config(&cert_pem, &key_pem, ca_pem.as_deref(), client_auth)
}

/// Build a client configuration trusting `root_pem`, optionally presenting a
/// client certificate.
pub fn client_config(
    root_pem: &[u8],
    identity: Option<(&[u8], &[u8])>,
) -> Result<Arc<ClientConfig>, TlsError> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store(root_pem)?);

    let config = match identity {
        Some((cert_pem, key_pem)) => {
            builder.with_client_auth_cert(parse_certificates(cert_pem)?, parse_private_key(key_pem)?)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn builds_server_config_without_client_auth() {
        let (cert, key) = self_signed();
        assert!(server_config(cert.as_bytes(), key.as_bytes(), None, ClientAuthMode::Off).is_ok());
    }

    #[test]
    fn client_auth_requires_ca() {
        let (cert, key) = self_signed();
        let err = server_config(cert.as_bytes(), key.as_bytes(), None, ClientAuthMode::Required)
            .unwrap_err();
        assert!(matches!(err, TlsError::MissingClientCa(ClientAuthMode::Required)));
    }

    #[test]
    fn builds_mutual_tls_config() {
        let (cert, key) = self_signed();
        let (ca, _) = self_signed();
        for mode in [ClientAuthMode::Optional, ClientAuthMode::Required] {
            assert!(server_config(cert.as_bytes(), key.as_bytes(), Some(ca.as_bytes()), mode).is_ok());
        }
    }

    #[test]
    fn rejects_empty_pem() {
        assert!(matches!(parse_certificates(b""), Err(TlsError::NoCertificates)));
        assert!(matches!(parse_private_key(b""), Err(TlsError::NoPrivateKey)));
    }

    #[test]
    fn missing_files_are_reported() {
        let config = TlsConfig {
            cert_path: "/nonexistent/cert.pem".to_string(),
            ..TlsConfig::default()
        };
        match load_tls_config(&config) {
            Err(TlsError::Io { path, .. }) => assert_eq!(path, "/nonexistent/cert.pem"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn builds_client_config() {
        let (ca, _) = self_signed();
        let (cert, key) = self_signed();
        assert!(client_config(ca.as_bytes(), None).is_ok());
        assert!(client_config(ca.as_bytes(), Some((cert.as_bytes(), key.as_bytes()))).is_ok());
    }
}
