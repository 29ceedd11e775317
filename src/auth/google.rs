//! `auth.google`: federated login.
//!
//! Resolves the provider token into a profile, then finds the user by e-mail
//! or registers them. New users get a bearer token minted and stored; known
//! users get their stored token back unchanged.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, TokenService};
use crate::identity::{IdentityProvider, Profile};
use crate::store::{StoreError, User, UserStore};

/// Result of a successful federated login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub user_id: String,
    /// Bearer token for later `auth.token` logins.
    pub token: String,
    /// Whether this login created the user.
    pub registered: bool,
}

/// Runs the federated login flow against a provider and a user store.
#[derive(Clone)]
pub struct GoogleLogin {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn UserStore>,
    tokens: TokenService,
}

// Run `fut` unless the connection closes first.
async fn unless_cancelled<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        out = fut => Ok(out),
    }
}

impl GoogleLogin {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn UserStore>, tokens: TokenService) -> Self {
        Self {
            provider,
            store,
            tokens,
        }
    }

    /// Exchange a provider token for a user and bearer token.
    ///
    /// Store mutations only start while `cancel` is still live; once started
    /// they run to completion.
    pub async fn login(&self, token: &str, cancel: &CancellationToken) -> Result<LoginGrant, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::EmptyGoogleToken);
        }

        let profile = unless_cancelled(cancel, self.provider.resolve_profile(token)).await??;
        let existing = unless_cancelled(cancel, self.store.get_by_email(&profile.email)).await??;

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        match existing {
            Some(user) => self.existing_user(user).await,
            None => self.register(profile).await,
        }
    }

    async fn existing_user(&self, mut user: User) -> Result<LoginGrant, AuthError> {
        if let Some(token) = user.token.clone() {
            return Ok(LoginGrant {
                user_id: user.id,
                token,
                registered: false,
            });
        }

        // Record saved without a token: mint one now.
        let token = self.tokens.issue(&user.id).map_err(AuthError::Issue)?;
        user.token = Some(token.clone());
        self.store.save_user(&mut user).await?;
        tracing::info!(user_id = %user.id, "Issued missing token for existing user");

        Ok(LoginGrant {
            user_id: user.id,
            token,
            registered: false,
        })
    }

    async fn register(&self, profile: Profile) -> Result<LoginGrant, AuthError> {
        let email = profile.email.clone();
        let mut user = User::new(profile.email, profile.name, profile.picture);

        match self.store.save_user(&mut user).await {
            Ok(()) => {}
            Err(StoreError::DuplicateEmail(_)) => {
                // Lost a race with a concurrent first login for the same address.
                return match self.store.get_by_email(&email).await? {
                    Some(winner) if winner.token.is_some() => self.existing_user(winner).await,
                    _ => Err(AuthError::Store(StoreError::DuplicateEmail(email))),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let token = self.tokens.issue(&user.id).map_err(AuthError::Issue)?;
        user.token = Some(token.clone());
        self.store.save_user(&mut user).await?;
        tracing::info!(user_id = %user.id, "Registered new user");

        Ok(LoginGrant {
            user_id: user.id,
            token,
            registered: true,
        })
    }
}
