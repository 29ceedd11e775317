//! User store contract.
//!
//! # Data Flow
//! ```text
//! auth::google  → get_by_email / save_user (first-time registration)
//! auth::cert    → get_by_id (certificate subject → user)
//! main          → memory.rs (InMemoryUserStore, optional JSON persistence)
//! ```
//!
//! # Design Decisions
//! - E-mail is the natural key for federated upsert
//! - Ids are assigned by the store on first save and never change
//! - Implementations must be safe to call from any number of connection tasks

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryUserStore;

/// A registered user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned id. Empty until the first save.
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Vec<u8>,
    /// Bearer token issued on registration.
    #[serde(default)]
    pub token: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>, name: impl Into<String>, picture: Vec<u8>) -> Self {
        Self {
            id: String::new(),
            email: email.into(),
            name: name.into(),
            picture,
            token: None,
        }
    }
}

/// Errors reported by user stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("e-mail {0} already belongs to another user")]
    DuplicateEmail(String),

    #[error("user {0} does not exist")]
    UnknownUser(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable user storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look a user up by e-mail.
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Look a user up by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Insert or update a user. Assigns `user.id` when it is empty.
    async fn save_user(&self, user: &mut User) -> Result<(), StoreError>;
}
