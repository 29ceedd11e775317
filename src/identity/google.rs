//! Google identity provider client.
//!
//! Two token kinds are supported:
//! - OAuth access tokens: the profile API returns display name, e-mails and
//!   an image URL.
//! - ID tokens: the tokeninfo endpoint returns the decoded claims; the `aud`
//!   claim must equal the configured client id.
//!
//! In both cases the profile picture is downloaded and returned as bytes.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::config::schema::{GoogleConfig, GoogleTokenKind};
use crate::identity::{IdentityProvider, Profile, ProviderError};

const PROFILE_ENDPOINT: &str = "google profile";
const TOKENINFO_ENDPOINT: &str = "google tokeninfo";
const PICTURE_ENDPOINT: &str = "google profile picture";

// Response from the profile API (scopes `profile` and `email`); fields of
// interest only.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlusProfile {
    #[serde(default)]
    emails: Vec<PlusEmail>,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    image: Option<PlusImage>,
}

#[derive(Debug, Deserialize)]
struct PlusEmail {
    value: String,
}

#[derive(Debug, Deserialize)]
struct PlusImage {
    url: String,
}

// Response from the tokeninfo endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenInfo {
    aud: String,
    email: String,
    name: String,
    picture: String,
    given_name: String,
    family_name: String,
}

impl TokenInfo {
    fn display_name(&self) -> String {
        if self.given_name.is_empty() && self.family_name.is_empty() {
            return self.name.clone();
        }
        format!("{} {}", self.given_name, self.family_name).trim().to_string()
    }
}

/// HTTP client for Google's profile and tokeninfo endpoints.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    client_id: String,
    token_kind: GoogleTokenKind,
    profile_url: Url,
    tokeninfo_url: Url,
}

impl GoogleClient {
    pub fn new(config: &GoogleConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| ProviderError::Request {
                endpoint: "http client",
                source,
            })?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            token_kind: config.token_kind,
            profile_url: Url::parse(&config.profile_url)?,
            tokeninfo_url: Url::parse(&config.tokeninfo_url)?,
        })
    }

    /// Client id ID tokens must be issued for.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn get(&self, endpoint: &'static str, url: Url) -> Result<reqwest::Response, ProviderError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ProviderError::Request { endpoint, source })?;

        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ProviderError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(res)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &'static str, url: Url) -> Result<T, ProviderError> {
        let body = self
            .get(endpoint, url)
            .await?
            .bytes()
            .await
            .map_err(|source| ProviderError::Request { endpoint, source })?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }

    async fn fetch_picture(&self, picture_url: &str) -> Result<Vec<u8>, ProviderError> {
        if picture_url.is_empty() {
            return Ok(Vec::new());
        }
        let url = Url::parse(picture_url)?;
        let bytes = self
            .get(PICTURE_ENDPOINT, url)
            .await?
            .bytes()
            .await
            .map_err(|source| ProviderError::Request {
                endpoint: PICTURE_ENDPOINT,
                source,
            })?;
        Ok(bytes.to_vec())
    }

    async fn access_token_profile(&self, token: &str) -> Result<Profile, ProviderError> {
        let mut url = self.profile_url.clone();
        url.query_pairs_mut().append_pair("access_token", token);
        let profile: PlusProfile = self.get_json(PROFILE_ENDPOINT, url).await?;

        let email = profile
            .emails
            .into_iter()
            .next()
            .map(|e| e.value)
            .filter(|e| !e.is_empty())
            .ok_or(ProviderError::MissingEmail)?;
        let picture_url = profile.image.map(|i| i.url).unwrap_or_default();
        let picture = self.fetch_picture(&picture_url).await?;

        Ok(Profile {
            name: profile.display_name,
            email,
            picture,
        })
    }

    async fn id_token_profile(&self, token: &str) -> Result<Profile, ProviderError> {
        let mut url = self.tokeninfo_url.clone();
        url.query_pairs_mut().append_pair("id_token", token);
        let info: TokenInfo = self.get_json(TOKENINFO_ENDPOINT, url).await?;

        if info.aud != self.client_id {
            return Err(ProviderError::AudienceMismatch(info.aud));
        }
        if info.email.is_empty() {
            return Err(ProviderError::MissingEmail);
        }
        let picture = self.fetch_picture(&info.picture).await?;

        Ok(Profile {
            name: info.display_name(),
            email: info.email,
            picture,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleClient {
    async fn resolve_profile(&self, token: &str) -> Result<Profile, ProviderError> {
        match self.token_kind {
            GoogleTokenKind::AccessToken => self.access_token_profile(token).await,
            GoogleTokenKind::IdToken => self.id_token_profile(token).await,
        }
    }
}
