//! In-memory user store with optional JSON persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::store::{StoreError, User, UserStore};

/// A thread-safe user store keyed by id with an e-mail index.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<String, User>>,
    /// e-mail → id
    emails: Arc<DashMap<String, String>>,
    saves: Arc<AtomicUsize>,
    persistence_path: Option<String>,
}

impl InMemoryUserStore {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<String>) -> Self {
        Self {
            persistence_path,
            ..Default::default()
        }
    }

    /// Load from file if it exists; later `save_to_file` calls write back to it.
    pub fn load_from_file(path: &str) -> Result<Self, StoreError> {
        let store = Self::new(Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let users: Vec<User> = serde_json::from_reader(reader)?;
            for user in users {
                store.emails.insert(user.email.clone(), user.id.clone());
                store.users.insert(user.id.clone(), user);
            }
            tracing::info!(path, users = store.users.len(), "Loaded user store");
        }
        Ok(store)
    }

    /// Write all users to the persistence path, if one is configured.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.persistence_path {
            let mut users: Vec<User> = self.users.iter().map(|r| r.value().clone()).collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(writer, &users)?;
            tracing::info!(path = %path, users = users.len(), "Saved user store");
        }
        Ok(())
    }

    /// Number of stored users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of successful `save_user` calls since creation.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let Some(id) = self.emails.get(email).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|r| r.value().clone()))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|r| r.value().clone()))
    }

    async fn save_user(&self, user: &mut User) -> Result<(), StoreError> {
        if user.id.is_empty() {
            // Claim the e-mail before assigning an id so concurrent first logins
            // cannot register the same address twice.
            let id = Uuid::new_v4().to_string();
            match self.emails.entry(user.email.clone()) {
                Entry::Occupied(_) => return Err(StoreError::DuplicateEmail(user.email.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                }
            }
            user.id = id;
        } else {
            match self.users.get(&user.id) {
                Some(existing) if existing.email != user.email => {
                    return Err(StoreError::DuplicateEmail(user.email.clone()));
                }
                Some(_) => {}
                None => {
                    if let Some(owner) = self.emails.get(&user.email) {
                        if owner.value() != &user.id {
                            return Err(StoreError::DuplicateEmail(user.email.clone()));
                        }
                    }
                    self.emails.insert(user.email.clone(), user.id.clone());
                }
            }
        }

        self.users.insert(user.id.clone(), user.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_id_and_indexes_email() {
        let store = InMemoryUserStore::new(None);
        let mut user = User::new("alice@example.com", "Alice", vec![1, 2, 3]);

        store.save_user(&mut user).await.unwrap();
        assert!(!user.id.is_empty());

        let found = store.get_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(found, user);
        assert_eq!(store.get_by_id(&user.id).await.unwrap().unwrap(), user);
        assert!(store.get_by_email("bob@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resave_keeps_id() {
        let store = InMemoryUserStore::new(None);
        let mut user = User::new("alice@example.com", "Alice", Vec::new());
        store.save_user(&mut user).await.unwrap();
        let id = user.id.clone();

        user.token = Some("token".to_string());
        store.save_user(&mut user).await.unwrap();

        assert_eq!(user.id, id);
        assert_eq!(store.len(), 1);
        assert_eq!(store.save_count(), 2);
        let found = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryUserStore::new(None);
        let mut first = User::new("alice@example.com", "Alice", Vec::new());
        let mut second = User::new("alice@example.com", "Impostor", Vec::new());

        store.save_user(&mut first).await.unwrap();
        assert!(matches!(
            store.save_user(&mut second).await,
            Err(StoreError::DuplicateEmail(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn explicit_id_is_kept() {
        let store = InMemoryUserStore::new(None);
        let mut user = User::new("device@example.com", "Device", Vec::new());
        user.id = "device-1".to_string();
        store.save_user(&mut user).await.unwrap();
        assert!(store.get_by_id("device-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let path = path.to_str().unwrap();

        let store = InMemoryUserStore::new(Some(path.to_string()));
        let mut user = User::new("alice@example.com", "Alice", vec![9]);
        store.save_user(&mut user).await.unwrap();
        store.save_to_file().unwrap();

        let loaded = InMemoryUserStore::load_from_file(path).unwrap();
        assert_eq!(loaded.len(), 1);
        let found = loaded.get_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.picture, vec![9]);
    }

    #[test]
    fn missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let store = InMemoryUserStore::load_from_file(path.to_str().unwrap()).unwrap();
        assert!(store.is_empty());
    }
}
