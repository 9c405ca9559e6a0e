//! Credential primitives for the identity service.
//!
//! This module provides:
//! - Password hashing and verification (Argon2id)
//! - Access token signing and verification (HS256 JWT)
//! - Opaque refresh token generation and hashing

mod jwt;
mod password;
mod refresh;

pub use jwt::{AccessTokenCodec, Claims, JwtManager};
pub use password::{Argon2Hasher, PasswordHasher};
pub use refresh::{hash_token, new_id, new_refresh_token};

use thiserror::Error;

/// Authentication primitive errors.
///
/// Only `InvalidCredentials`, `InvalidToken` and `ExpiredToken` describe the
/// caller's input. The rest are failures of the primitive itself.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Password did not match the stored hash.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Access token failed verification.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Access token is genuine but past its expiry.
    #[error("Token expired")]
    ExpiredToken,

    /// Caller passed arguments the primitive refuses to work with.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Underlying crypto or randomness failure.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}
