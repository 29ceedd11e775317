//! `auth.cert`: certificate-backed login.
//!
//! The TLS layer has already verified the chain against the configured CA.
//! Here the leaf's subject common name is taken as a user id and must name
//! an existing user.

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

use crate::auth::AuthError;
use crate::store::UserStore;

/// Subject common name of a DER certificate.
pub fn subject_common_name(cert: &CertificateDer<'_>) -> Result<String, AuthError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| AuthError::BadCertificate(e.to_string()))?;

    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .ok_or_else(|| AuthError::BadCertificate("subject has no common name".to_string()))?
        .as_str()
        .map_err(|e| AuthError::BadCertificate(e.to_string()))?;

    if cn.is_empty() {
        return Err(AuthError::BadCertificate("empty common name".to_string()));
    }
    Ok(cn.to_string())
}

/// Maps verified client certificates to users.
#[derive(Clone)]
pub struct CertLogin {
    store: Arc<dyn UserStore>,
}

impl CertLogin {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Resolve the user behind the leaf certificate of `chain`.
    pub async fn login(&self, chain: &[CertificateDer<'static>]) -> Result<String, AuthError> {
        let leaf = chain.first().ok_or(AuthError::NoCertificate)?;
        let subject = subject_common_name(leaf)?;

        match self.store.get_by_id(&subject).await? {
            Some(user) => Ok(user.id),
            None => Err(AuthError::UnknownCertificate(subject)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryUserStore, User};
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn cert_with_cn(cn: &str) -> CertificateDer<'static> {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    async fn store_with(id: &str) -> Arc<InMemoryUserStore> {
        let store = Arc::new(InMemoryUserStore::new(None));
        let mut user = User::new(format!("{}@example.com", id), "Device", Vec::new());
        user.id = id.to_string();
        store.save_user(&mut user).await.unwrap();
        store
    }

    #[test]
    fn reads_common_name() {
        assert_eq!(subject_common_name(&cert_with_cn("device-7")).unwrap(), "device-7");
    }

    #[test]
    fn garbage_is_a_bad_certificate() {
        let der = CertificateDer::from(vec![0u8, 1, 2, 3]);
        assert!(matches!(subject_common_name(&der), Err(AuthError::BadCertificate(_))));
    }

    #[tokio::test]
    async fn known_subject_logs_in() {
        let login = CertLogin::new(store_with("device-7").await);
        let user_id = login.login(&[cert_with_cn("device-7")]).await.unwrap();
        assert_eq!(user_id, "device-7");
    }

    #[tokio::test]
    async fn unknown_subject_is_rejected() {
        let login = CertLogin::new(store_with("device-7").await);
        let err = login.login(&[cert_with_cn("device-8")]).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownCertificate(cn) if cn == "device-8"));
    }

    #[tokio::test]
    async fn no_certificate_is_rejected() {
        let login = CertLogin::new(store_with("device-7").await);
        assert!(matches!(login.login(&[]).await, Err(AuthError::NoCertificate)));
    }
}
