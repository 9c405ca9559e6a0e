//! Sled-backed user and refresh token store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{RefreshTokenRecord, RefreshTokenRepository, StoreError, UserRecord, UserRepository};

/// Users tree: `<id>` → user JSON, `idx:email:<email>` → id.
const USERS_TREE: &str = "users";
/// Refresh tree: `<id>` → record JSON, `idx:hash:<hash>` → id.
const REFRESH_TREE: &str = "refresh_tokens";

fn email_key(email: &str) -> String {
    format!("idx:email:{email}")
}

fn hash_key(token_hash: &str) -> String {
    format!("idx:hash:{token_hash}")
}

fn backend(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}

/// Store backed by an embedded sled database.
///
/// Uniqueness and single-use revocation are enforced with sled
/// compare-and-swap, so no in-process locking is involved.
#[derive(Debug, Clone)]
pub struct SledStore {
    users: sled::Tree,
    refresh_tokens: sled::Tree,
}

impl SledStore {
    /// Open or create a store at the given directory.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| backend("Failed to open identity database", e))?;
        Self::with_db(db)
    }

    /// Create a store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if the trees cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        let users = db
            .open_tree(USERS_TREE)
            .map_err(|e| backend("Failed to open users tree", e))?;
        let refresh_tokens = db
            .open_tree(REFRESH_TREE)
            .map_err(|e| backend("Failed to open refresh token tree", e))?;

        Ok(Self {
            users,
            refresh_tokens,
        })
    }

    async fn flush(tree: &sled::Tree) -> Result<(), StoreError> {
        tree.flush_async()
            .await
            .map(|_| ())
            .map_err(|e| backend("Flush error", e))
    }

    /// Claim a unique index key for `id`. Returns false if already taken.
    fn claim_index(tree: &sled::Tree, key: &str, id: &str) -> Result<bool, StoreError> {
        tree.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(id.as_bytes()))
            .map(|result| result.is_ok())
            .map_err(|e| backend("Index error", e))
    }

    /// Release an index key, but only while it still points at `id`.
    fn release_index(tree: &sled::Tree, key: &str, id: &str) -> Result<(), StoreError> {
        tree.compare_and_swap(key.as_bytes(), Some(id.as_bytes()), None::<&[u8]>)
            .map(|_| ())
            .map_err(|e| backend("Index release error", e))
    }

    fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<T, StoreError> {
        let value = tree
            .get(key)
            .map_err(|e| backend("Get error", e))?
            .ok_or(StoreError::NotFound)?;
        serde_json::from_slice(&value).map_err(|e| backend("Deserialization error", e))
    }

    fn lookup_index(tree: &sled::Tree, key: &str) -> Result<String, StoreError> {
        let id = tree
            .get(key.as_bytes())
            .map_err(|e| backend("Index lookup error", e))?
            .ok_or(StoreError::NotFound)?;
        Ok(String::from_utf8_lossy(&id).into_owned())
    }

    fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(value).map_err(|e| backend("Serialization error", e))
    }
}

#[async_trait]
impl UserRepository for SledStore {
    async fn create_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let value = Self::to_json(user)?;
        let index_key = email_key(&user.email);

        if !Self::claim_index(&self.users, &index_key, &user.id)? {
            return Err(StoreError::EmailTaken);
        }

        if let Err(e) = self.users.insert(user.id.as_bytes(), value) {
            if let Err(release) = Self::release_index(&self.users, &index_key, &user.id) {
                tracing::error!(
                    user_id = %user.id,
                    error = %release,
                    "Failed to release email index; address stays claimed"
                );
            }
            return Err(backend("Insert error", e));
        }

        Self::flush(&self.users).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        let id = Self::lookup_index(&self.users, &email_key(email))?;
        Self::get_json(&self.users, id.as_bytes())
    }

    async fn get_user_by_id(&self, id: &str) -> Result<UserRecord, StoreError> {
        if id.starts_with("idx:") {
            return Err(StoreError::NotFound);
        }
        Self::get_json(&self.users, id.as_bytes())
    }
}

#[async_trait]
impl RefreshTokenRepository for SledStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let value = Self::to_json(record)?;

        if !Self::claim_index(&self.refresh_tokens, &hash_key(&record.token_hash), &record.id)? {
            return Err(StoreError::Backend(
                "Refresh token hash already exists".to_string(),
            ));
        }

        self.refresh_tokens
            .insert(record.id.as_bytes(), value)
            .map_err(|e| backend("Insert error", e))?;

        Self::flush(&self.refresh_tokens).await
    }

    async fn get_valid_refresh_token_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let id = Self::lookup_index(&self.refresh_tokens, &hash_key(token_hash))?;
        let record: RefreshTokenRecord = Self::get_json(&self.refresh_tokens, id.as_bytes())?;

        if record.is_valid(now) {
            Ok(record)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn revoke_refresh_token(
        &self,
        id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        loop {
            let current = self
                .refresh_tokens
                .get(id.as_bytes())
                .map_err(|e| backend("Get error", e))?
                .ok_or(StoreError::NotFound)?;

            let mut record: RefreshTokenRecord = serde_json::from_slice(&current)
                .map_err(|e| backend("Deserialization error", e))?;
            if record.revoked_at.is_some() {
                return Err(StoreError::NotFound);
            }
            record.revoked_at = Some(revoked_at);

            let swapped = self
                .refresh_tokens
                .compare_and_swap(id.as_bytes(), Some(&current), Some(Self::to_json(&record)?))
                .map_err(|e| backend("Revoke error", e))?;

            // Lost a race: re-read, the winner's write is now visible
            if swapped.is_ok() {
                return Self::flush(&self.refresh_tokens).await;
            }
        }
    }
}
