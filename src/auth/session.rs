//! Per-connection authentication state.
//!
//! A `Session` lives on its connection's task and is only ever handed out as
//! `&mut` to that task's frame handler, so no other connection can reach it.

use std::fmt;
use std::time::SystemTime;

/// How a session was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// TLS client certificate confirmed by `auth.cert`.
    Cert,
    /// Signed bearer token presented with `auth.token`.
    Token,
    /// Google federated login via `auth.google`.
    Google,
}

impl AuthMethod {
    /// All bootstrap methods, in the order they are documented.
    pub const ALL: [AuthMethod; 3] = [AuthMethod::Cert, AuthMethod::Token, AuthMethod::Google];

    /// Envelope method name that invokes this handshake.
    pub fn method_name(&self) -> &'static str {
        match self {
            AuthMethod::Cert => "auth.cert",
            AuthMethod::Token => "auth.token",
            AuthMethod::Google => "auth.google",
        }
    }

    /// Resolve an envelope method name to a bootstrap method.
    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.method_name() == name)
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Cert => "cert",
            AuthMethod::Token => "token",
            AuthMethod::Google => "google",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication state of one connection.
#[derive(Debug)]
pub struct Session {
    authenticated: bool,
    user_id: Option<String>,
    auth_method: Option<AuthMethod>,
    created_at: SystemTime,
}

impl Session {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            user_id: None,
            auth_method: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn auth_method(&self) -> Option<AuthMethod> {
        self.auth_method
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Mark the session authenticated as `user_id`.
    ///
    /// Returns `false` and leaves the session untouched if it is already
    /// authenticated: identity never changes within a connection.
    pub fn promote(&mut self, user_id: impl Into<String>, method: AuthMethod) -> bool {
        if self.authenticated {
            return false;
        }
        self.authenticated = true;
        self.user_id = Some(user_id.into());
        self.auth_method = Some(method);
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_anonymous() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert!(session.user_id().is_none());
        assert!(session.auth_method().is_none());
    }

    #[test]
    fn promote_is_one_way() {
        let mut session = Session::new();
        assert!(session.promote("u-1", AuthMethod::Token));
        assert!(session.is_authenticated());
        assert_eq!(session.user_id(), Some("u-1"));

        assert!(!session.promote("u-2", AuthMethod::Google));
        assert_eq!(session.user_id(), Some("u-1"));
        assert_eq!(session.auth_method(), Some(AuthMethod::Token));
    }

    #[test]
    fn method_names_round_trip() {
        for method in AuthMethod::ALL {
            assert_eq!(AuthMethod::from_method_name(method.method_name()), Some(method));
        }
        assert_eq!(AuthMethod::from_method_name("auth.password"), None);
        assert_eq!(AuthMethod::from_method_name("close"), None);
    }
}
