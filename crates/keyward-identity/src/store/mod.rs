//! Persistence contracts for users and refresh tokens.
//!
//! The orchestrator only sees these traits. Anything a backend reports other
//! than `NotFound` or `EmailTaken` is an infrastructure failure.

mod sled_store;

pub use sled_store::SledStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::UserProfile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No matching record (for refresh tokens: none that is still valid).
    #[error("Record not found")]
    NotFound,

    /// Email uniqueness violated.
    #[error("Email already registered")]
    EmailTaken,

    /// Backend failure.
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Stored user account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique user ID.
    pub id: String,
    /// Normalized email, unique across users.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Argon2 PHC string. Never leaves the identity service.
    pub password_hash: String,
    /// Assigned roles, in assignment order.
    pub roles: Vec<String>,
    /// When the user registered.
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Public view of the user.
    #[must_use]
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            roles: self.roles.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// One refresh token issuance.
///
/// Records are never deleted; a used, revoked or expired record stays behind
/// in its terminal state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Record ID.
    pub id: String,
    /// Owner.
    pub user_id: String,
    /// SHA-256 of the raw token, hex.
    pub token_hash: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Set once, when the token is rotated or revoked.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A record is usable while not revoked and not yet expired.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

impl std::fmt::Debug for RefreshTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// User persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EmailTaken` if the email is already registered.
    async fn create_user(&self, user: &UserRecord) -> Result<(), StoreError>;

    /// Look up a user by normalized email.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no user has that email.
    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord, StoreError>;

    /// Look up a user by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user does not exist.
    async fn get_user_by_id(&self, id: &str) -> Result<UserRecord, StoreError>;
}

/// Refresh token persistence.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Persist a newly issued refresh token.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on failure, including a hash collision.
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Find the record for `token_hash` if it is still valid at `now`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for unknown, revoked or expired tokens.
    async fn get_valid_refresh_token_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError>;

    /// Mark a record revoked.
    ///
    /// This is a conditional update: of several concurrent callers for the
    /// same record, exactly one succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record is unknown or already revoked.
    async fn revoke_refresh_token(
        &self,
        id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
