//! Signed bearer tokens.
//!
//! Tokens are HS256 JWTs carrying the user id (`userid`) and the issuance
//! time (`created`, unix seconds). An `exp` claim is added only when a
//! lifetime is configured.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims embedded in a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Id of the user the token was issued to.
    pub userid: String,
    /// Issuance time as a unix timestamp.
    pub created: i64,
    /// Expiration time as a unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Token signing and verification errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),

    #[error("token carries no user id")]
    MissingUser,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Signs and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Option<Duration>,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(TokenError::Signing)
    }

    /// Mint a token for `user_id` issued now.
    pub fn issue(&self, user_id: &str) -> Result<String, TokenError> {
        let now = unix_now();
        let claims = Claims {
            userid: user_id.to_string(),
            created: now as i64,
            exp: self.ttl.map(|ttl| now + ttl.as_secs()),
        };
        self.sign(&claims)
    }

    /// Check signature and expiry and return the embedded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        if self.ttl.is_some() {
            validation.set_required_spec_claims(&["exp"]);
        }
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e),
        })?;

        if data.claims.userid.is_empty() {
            return Err(TokenError::MissingUser);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let tokens = TokenService::new(b"secret", None);
        let token = tokens.issue("user-1").unwrap();
        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.userid, "user-1");
        assert!(claims.created > 0);
        assert!(claims.exp.is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = TokenService::new(b"secret", None).issue("user-1").unwrap();
        let other = TokenService::new(b"another", None);
        assert!(matches!(other.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        let tokens = TokenService::new(b"secret", None);
        assert!(matches!(tokens.verify("not.a.jwt"), Err(TokenError::Invalid(_))));
        assert!(matches!(tokens.verify(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new(b"secret", Some(Duration::from_secs(60)));
        let now = unix_now();
        let token = tokens
            .sign(&Claims {
                userid: "user-1".to_string(),
                created: (now - 7200) as i64,
                exp: Some(now - 3600),
            })
            .unwrap();
        assert!(matches!(tokens.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn ttl_adds_expiry() {
        let tokens = TokenService::new(b"secret", Some(Duration::from_secs(60)));
        let claims = tokens.verify(&tokens.issue("user-1").unwrap()).unwrap();
        let exp = claims.exp.unwrap();
        assert!(exp >= claims.created as u64 + 60);
    }

    #[test]
    fn ttl_requires_expiry_claim() {
        let unlimited = TokenService::new(b"secret", None);
        let limited = TokenService::new(b"secret", Some(Duration::from_secs(60)));
        let token = unlimited.issue("user-1").unwrap();
        assert!(matches!(limited.verify(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn empty_user_is_rejected() {
        let tokens = TokenService::new(b"secret", None);
        let token = tokens
            .sign(&Claims {
                userid: String::new(),
                created: 1,
                exp: None,
            })
            .unwrap();
        assert!(matches!(tokens.verify(&token), Err(TokenError::MissingUser)));
    }
}
