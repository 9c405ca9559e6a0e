//! # Keyward Identity
//!
//! Identity service: authenticates users, issues access and refresh tokens,
//! rotates refresh tokens and validates access tokens for the gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Password hashing, access token codec and refresh token primitives.
pub mod auth;
mod server;
pub mod service;
/// User and refresh token persistence.
pub mod store;

use std::future::Future;
use std::sync::Arc;

use keyward_core::{ConfigError, IdentityConfig};

pub use auth::{AccessTokenCodec, Argon2Hasher, AuthError, JwtManager, PasswordHasher};
pub use server::IdentityServer;
pub use service::{IdentityService, IdentityServiceBuilder, ServiceError};
pub use store::{RefreshTokenRepository, SledStore, StoreError, UserRepository};

/// Start the identity service and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns error if configuration is invalid, storage cannot be opened, or
/// the server fails to start.
pub async fn start<F>(config: IdentityConfig, shutdown: F) -> Result<(), IdentityError>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| IdentityError::Config(format!("Failed to create data dir: {e}")))?;

    let store = Arc::new(SledStore::open(&data_dir)?);
    let service = IdentityService::from_config(&config, store)?;
    tracing::info!(
        issuer = %config.token_issuer,
        access_ttl_secs = config.access_token_ttl_secs,
        refresh_ttl_secs = config.refresh_token_ttl_secs,
        data_dir = %data_dir.display(),
        "Identity service initialized"
    );

    IdentityServer::new(Arc::new(service), config.request_timeout())
        .run(&config.bind_address, config.port, shutdown)
        .await
}

/// Identity service startup errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid configuration file or environment.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// Credential primitive could not be constructed.
    #[error("Auth init failed: {0}")]
    Auth(#[from] AuthError),

    /// Storage could not be opened.
    #[error("Storage init failed: {0}")]
    Store(#[from] StoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
