//! # Keyward Gateway
//!
//! Edge gateway: extracts bearer tokens, validates them against the identity
//! service under a deadline, and maps the outcome to 401 or 503.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identity service client.
pub mod client;
/// Request correlation and bearer auth middleware.
pub mod middleware;
mod server;

use std::future::Future;

use keyward_core::{ConfigError, GatewayConfig};

pub use client::{IdentityClient, TokenValidator, ValidateError};
pub use middleware::{AuthContext, AuthRejection, AuthState};
pub use server::{Gateway, GatewayBuilder};

/// Start the gateway and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns error if configuration is invalid or the server fails to start.
pub async fn start<F>(config: GatewayConfig, shutdown: F) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let gateway = Gateway::builder().with_config(config).build()?;
    gateway.run(shutdown).await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid configuration file or environment.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
