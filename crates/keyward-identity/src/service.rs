//! Identity service orchestrator.
//!
//! Every operation ends in one of three ways: a success payload, a classified
//! [`DomainError`], or an opaque "dependency unavailable" failure. Only the
//! last one is logged as an error.

use std::sync::Arc;
use std::time::Duration;

use keyward_core::rpc::AuthResult;
use keyward_core::validation::{self, limits};
use keyward_core::{
    AuthTokens, DomainError, Identity, IdentityConfig, MAX_TOKEN_TTL_SECS, SharedClock,
    UserProfile, system_clock,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::{
    AccessTokenCodec, Argon2Hasher, AuthError, JwtManager, PasswordHasher, hash_token, new_id,
    new_refresh_token,
};
use crate::store::{
    RefreshTokenRecord, RefreshTokenRepository, StoreError, UserRecord, UserRepository,
};

/// Role granted to every newly registered user.
pub const DEFAULT_ROLE: &str = "customer";

/// Random bytes in user and refresh-record IDs.
const ID_BYTES: usize = 16;

/// Plaintext behind the dummy hash used to equalize login timing.
const DUMMY_PASSWORD: &str = "keyward-timing-equalization";

/// Outcome of a failed service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Expected, classified failure to report to the caller.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A dependency failed. Details are logged, never returned.
    #[error("{operation}: dependency unavailable")]
    Unavailable {
        /// Operation that failed.
        operation: &'static str,
        /// Internal reason, for logs only.
        reason: String,
    },
}

impl ServiceError {
    fn unavailable(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        let reason = reason.to_string();
        error!(operation, reason = %reason, "Dependency failure");
        Self::Unavailable { operation, reason }
    }

    /// The domain error, if this is one.
    #[must_use]
    pub const fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(err) => Some(err),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Identity service: register, login, refresh, logout, profile and validate.
pub struct IdentityService {
    users: Arc<dyn UserRepository>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    hasher: Arc<dyn PasswordHasher>,
    codec: Arc<dyn AccessTokenCodec>,
    clock: SharedClock,
    access_ttl: Duration,
    refresh_ttl: Duration,
    default_roles: Vec<String>,
    dummy_hash: String,
}

impl IdentityService {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> IdentityServiceBuilder {
        IdentityServiceBuilder::default()
    }

    /// Wire a service from configuration on top of a store.
    ///
    /// # Errors
    ///
    /// Returns error if the secret, issuer, TTLs or hash cost are unusable.
    pub fn from_config<S>(config: &IdentityConfig, store: Arc<S>) -> Result<Self, AuthError>
    where
        S: UserRepository + RefreshTokenRepository + 'static,
    {
        let clock = system_clock();
        let secret = config
            .signing_secret()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let codec = JwtManager::new(&secret, config.token_issuer.clone(), clock.clone())?;
        let hasher = Argon2Hasher::new(config.password_hash)?;

        Self::builder()
            .users(store.clone())
            .refresh_tokens(store)
            .hasher(Arc::new(hasher))
            .codec(Arc::new(codec))
            .clock(clock)
            .access_ttl(config.access_token_ttl())
            .refresh_ttl(config.refresh_token_ttl())
            .build()
    }

    /// Register a new user and issue their first token pair.
    ///
    /// # Errors
    ///
    /// `AUTH_INVALID_CREDENTIALS` for empty or oversize input,
    /// `AUTH_EMAIL_TAKEN` for a duplicate email, otherwise unavailable.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthResult, ServiceError> {
        const OP: &str = "register";

        let (email, name) = match (
            validation::normalize_email(email),
            validation::validate_password(password),
            validation::sanitize_name(name),
        ) {
            (Ok(email), Ok(()), Ok(name)) => (email, name),
            (e, p, n) => {
                debug!(
                    email_ok = e.is_ok(),
                    password_ok = p.is_ok(),
                    name_ok = n.is_ok(),
                    "Rejected registration input"
                );
                return Err(DomainError::invalid_credentials().into());
            }
        };

        let password_hash = self
            .hash_password(password.to_string())
            .await
            .map_err(|e| ServiceError::unavailable(OP, e))?;

        let user = UserRecord {
            id: new_id(ID_BYTES).map_err(|e| ServiceError::unavailable(OP, e))?,
            email,
            name,
            password_hash,
            roles: self.default_roles.clone(),
            created_at: self.clock.now(),
        };

        match self.users.create_user(&user).await {
            Ok(()) => {}
            Err(StoreError::EmailTaken) => {
                debug!("Registration for an existing email");
                return Err(DomainError::email_taken().into());
            }
            Err(e) => return Err(ServiceError::unavailable(OP, e)),
        }

        let tokens = self.issue_tokens(&user, OP).await?;
        info!(user_id = %user.id, "User registered");

        Ok(AuthResult {
            user: user.to_profile(),
            tokens,
        })
    }

    /// Authenticate with email and password.
    ///
    /// # Errors
    ///
    /// `AUTH_INVALID_CREDENTIALS` for unknown email and wrong password alike,
    /// otherwise unavailable.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResult, ServiceError> {
        const OP: &str = "login";

        let Ok(email) = validation::normalize_email(email) else {
            return Err(DomainError::invalid_credentials().into());
        };
        if validation::validate_password(password).is_err() {
            return Err(DomainError::invalid_credentials().into());
        }

        let user = match self.users.get_user_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                // Pay the same hashing cost as a real check
                let _ = self
                    .verify_password(self.dummy_hash.clone(), password.to_string())
                    .await;
                debug!("Login for unknown email");
                return Err(DomainError::invalid_credentials().into());
            }
            Err(e) => return Err(ServiceError::unavailable(OP, e)),
        };

        match self
            .verify_password(user.password_hash.clone(), password.to_string())
            .await
        {
            Ok(()) => {}
            Err(AuthError::InvalidCredentials) => {
                debug!(user_id = %user.id, "Login with wrong password");
                return Err(DomainError::invalid_credentials().into());
            }
            Err(e) => return Err(ServiceError::unavailable(OP, e)),
        }

        let tokens = self.issue_tokens(&user, OP).await?;
        info!(user_id = %user.id, "User logged in");

        Ok(AuthResult {
            user: user.to_profile(),
            tokens,
        })
    }

    /// Rotate a refresh token: the presented token is consumed and a new,
    /// independent pair is issued.
    ///
    /// The old record is revoked before the new one is inserted, in two
    /// separate store calls. If the insert fails the old token stays
    /// consumed and the client has to log in again.
    ///
    /// # Errors
    ///
    /// `AUTH_INVALID_REFRESH_TOKEN` for an empty, unknown, expired, revoked
    /// or reused token, or one whose owner no longer exists; otherwise
    /// unavailable.
    pub async fn refresh(&self, raw_token: &str) -> Result<AuthTokens, ServiceError> {
        const OP: &str = "refresh";

        let record = self.find_refresh_token(raw_token, OP).await?;

        let user = match self.users.get_user_by_id(&record.user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                warn!(user_id = %record.user_id, "Refresh token owner no longer exists");
                return Err(DomainError::invalid_refresh_token().into());
            }
            Err(e) => return Err(ServiceError::unavailable(OP, e)),
        };

        self.revoke(&record, OP).await?;

        let tokens = self.issue_tokens(&user, OP).await.inspect_err(|_| {
            warn!(user_id = %user.id, "Refresh token consumed without a successor");
        })?;
        debug!(user_id = %user.id, "Refresh token rotated");

        Ok(tokens)
    }

    /// Revoke a refresh token without issuing a successor.
    ///
    /// # Errors
    ///
    /// `AUTH_INVALID_REFRESH_TOKEN` if the token is not currently valid,
    /// otherwise unavailable.
    pub async fn logout(&self, raw_token: &str) -> Result<(), ServiceError> {
        const OP: &str = "logout";

        let record = self.find_refresh_token(raw_token, OP).await?;
        self.revoke(&record, OP).await?;
        info!(user_id = %record.user_id, "Refresh token revoked");
        Ok(())
    }

    /// Fetch a user's public profile.
    ///
    /// # Errors
    ///
    /// `AUTH_INVALID_CREDENTIALS` for an empty or unknown user ID, otherwise
    /// unavailable.
    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile, ServiceError> {
        const OP: &str = "get_profile";

        if user_id.trim().is_empty() {
            return Err(DomainError::invalid_credentials().into());
        }

        match self.users.get_user_by_id(user_id).await {
            Ok(user) => Ok(user.to_profile()),
            Err(StoreError::NotFound) => Err(DomainError::invalid_credentials().into()),
            Err(e) => Err(ServiceError::unavailable(OP, e)),
        }
    }

    /// Verify an access token.
    ///
    /// Never reports unavailability: the codec has no dependencies, and
    /// anything unexpected from it is treated as an invalid token.
    ///
    /// # Errors
    ///
    /// `AUTH_EXPIRED_TOKEN` for a genuine but expired token,
    /// `AUTH_INVALID_TOKEN` for anything else.
    pub fn validate_access_token(&self, token: &str) -> Result<Identity, DomainError> {
        if token.is_empty() || token.len() > limits::MAX_TOKEN_LENGTH {
            return Err(DomainError::invalid_token());
        }

        match self.codec.verify(token) {
            Ok(identity) => Ok(identity),
            Err(AuthError::ExpiredToken) => Err(DomainError::expired_token()),
            Err(AuthError::InvalidToken(reason)) => {
                debug!(reason = %reason, "Rejected access token");
                Err(DomainError::invalid_token())
            }
            Err(e) => {
                warn!(error = %e, "Unexpected token verification failure");
                Err(DomainError::invalid_token())
            }
        }
    }

    async fn find_refresh_token(
        &self,
        raw_token: &str,
        operation: &'static str,
    ) -> Result<RefreshTokenRecord, ServiceError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() || raw_token.len() > limits::MAX_TOKEN_LENGTH {
            return Err(DomainError::invalid_refresh_token().into());
        }

        let token_hash = hash_token(raw_token);
        match self
            .refresh_tokens
            .get_valid_refresh_token_by_hash(&token_hash, self.clock.now())
            .await
        {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound) => {
                debug!(operation, "Refresh token not valid");
                Err(DomainError::invalid_refresh_token().into())
            }
            Err(e) => Err(ServiceError::unavailable(operation, e)),
        }
    }

    async fn revoke(
        &self,
        record: &RefreshTokenRecord,
        operation: &'static str,
    ) -> Result<(), ServiceError> {
        match self
            .refresh_tokens
            .revoke_refresh_token(&record.id, self.clock.now())
            .await
        {
            Ok(()) => Ok(()),
            // Another request consumed it between lookup and revoke
            Err(StoreError::NotFound) => {
                debug!(operation, "Refresh token already consumed");
                Err(DomainError::invalid_refresh_token().into())
            }
            Err(e) => Err(ServiceError::unavailable(operation, e)),
        }
    }

    async fn issue_tokens(
        &self,
        user: &UserRecord,
        operation: &'static str,
    ) -> Result<AuthTokens, ServiceError> {
        let (access_token, _) = self
            .codec
            .sign(&user.id, &user.roles, self.access_ttl)
            .map_err(|e| ServiceError::unavailable(operation, e))?;

        let refresh_token =
            new_refresh_token().map_err(|e| ServiceError::unavailable(operation, e))?;
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(self.refresh_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                ServiceError::unavailable(operation, "refresh token expiry out of range")
            })?;

        let record = RefreshTokenRecord {
            id: new_id(ID_BYTES).map_err(|e| ServiceError::unavailable(operation, e))?,
            user_id: user.id.clone(),
            token_hash: hash_token(&refresh_token),
            expires_at,
            revoked_at: None,
            created_at: now,
        };
        self.refresh_tokens
            .insert_refresh_token(&record)
            .await
            .map_err(|e| ServiceError::unavailable(operation, e))?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            access_expires_in: secs(self.access_ttl),
            refresh_expires_in: secs(self.refresh_ttl),
            token_type: "Bearer".to_string(),
        })
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Crypto(format!("Hashing task failed: {e}")))?
    }

    async fn verify_password(&self, hash: String, candidate: String) -> Result<(), AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &candidate))
            .await
            .map_err(|e| AuthError::Crypto(format!("Verification task failed: {e}")))?
    }
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("default_roles", &self.default_roles)
            .finish_non_exhaustive()
    }
}

fn secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

/// Builder for [`IdentityService`].
#[derive(Default)]
pub struct IdentityServiceBuilder {
    users: Option<Arc<dyn UserRepository>>,
    refresh_tokens: Option<Arc<dyn RefreshTokenRepository>>,
    hasher: Option<Arc<dyn PasswordHasher>>,
    codec: Option<Arc<dyn AccessTokenCodec>>,
    clock: Option<SharedClock>,
    access_ttl: Option<Duration>,
    refresh_ttl: Option<Duration>,
}

impl IdentityServiceBuilder {
    /// Set the user repository.
    #[must_use]
    pub fn users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    /// Set the refresh token repository.
    #[must_use]
    pub fn refresh_tokens(mut self, refresh_tokens: Arc<dyn RefreshTokenRepository>) -> Self {
        self.refresh_tokens = Some(refresh_tokens);
        self
    }

    /// Set the password hasher.
    #[must_use]
    pub fn hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Set the access token codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn AccessTokenCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the clock. Defaults to wall-clock time.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the access token TTL. Defaults to 15 minutes.
    #[must_use]
    pub const fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = Some(ttl);
        self
    }

    /// Set the refresh token TTL. Defaults to 30 days.
    #[must_use]
    pub const fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = Some(ttl);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if a dependency is missing or a TTL is
    /// under one second, or a hasher error if the dummy hash cannot be made.
    pub fn build(self) -> Result<IdentityService, AuthError> {
        let missing = |what: &str| AuthError::Config(format!("{what} is required"));

        let users = self.users.ok_or_else(|| missing("User repository"))?;
        let refresh_tokens = self
            .refresh_tokens
            .ok_or_else(|| missing("Refresh token repository"))?;
        let hasher = self.hasher.ok_or_else(|| missing("Password hasher"))?;
        let codec = self.codec.ok_or_else(|| missing("Token codec"))?;

        let access_ttl = self.access_ttl.unwrap_or(Duration::from_secs(15 * 60));
        let refresh_ttl = self
            .refresh_ttl
            .unwrap_or(Duration::from_secs(30 * 24 * 3600));
        let valid = |ttl: Duration| (1..=MAX_TOKEN_TTL_SECS).contains(&ttl.as_secs());
        if !valid(access_ttl) || !valid(refresh_ttl) {
            return Err(AuthError::Config(format!(
                "Token TTLs must be between 1 and {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }

        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?;

        Ok(IdentityService {
            users,
            refresh_tokens,
            hasher,
            codec,
            clock: self.clock.unwrap_or_else(system_clock),
            access_ttl,
            refresh_ttl,
            default_roles: vec![DEFAULT_ROLE.to_string()],
            dummy_hash,
        })
    }
}
