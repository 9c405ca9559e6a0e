//! Opaque refresh token material.
//!
//! The raw token goes to the client only. Storage sees its SHA-256 digest.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::AuthError;

/// Random bytes in a raw refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate `bytes` random bytes from the OS CSPRNG, hex-encoded.
///
/// # Errors
///
/// Returns `AuthError::Crypto` if the OS random source fails.
pub fn new_id(bytes: usize) -> Result<String, AuthError> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| AuthError::Crypto(format!("Random source failed: {e}")))?;
    Ok(hex::encode(buf))
}

/// Generate a new raw refresh token.
///
/// # Errors
///
/// Returns `AuthError::Crypto` if the OS random source fails.
pub fn new_refresh_token() -> Result<String, AuthError> {
    new_id(REFRESH_TOKEN_BYTES)
}

/// Digest of a raw refresh token, as stored and looked up.
#[must_use]
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}
