//! Password hashing.

use argon2::password_hash::{
    self, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    rand_core::OsRng,
};
use argon2::{Algorithm, Argon2, Params, Version};
use keyward_core::PasswordHashConfig;

use super::AuthError;

/// One-way, salted password hashing.
///
/// Implementations are CPU-bound; async callers must run them off the executor.
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into a self-describing string.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    fn hash(&self, plaintext: &str) -> Result<String, AuthError>;

    /// Verify a candidate password against a stored hash.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` on mismatch, or another
    /// variant if the stored hash cannot be processed.
    fn verify(&self, hash: &str, candidate: &str) -> Result<(), AuthError>;
}

/// Argon2id hasher producing PHC strings.
///
/// Verification reads the parameters embedded in the stored hash, so raising
/// the cost does not invalidate existing hashes.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    /// Create a hasher with the given cost.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the cost is outside Argon2's bounds.
    pub fn new(cost: PasswordHashConfig) -> Result<Self, AuthError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| AuthError::Config(format!("Invalid password hash cost: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Crypto(format!("Password hashing failed: {e}")))
    }

    fn verify(&self, hash: &str, candidate: &str) -> Result<(), AuthError> {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| AuthError::Crypto(format!("Invalid hash: {e}")))?;

        // Output comparison inside argon2 is constant-time
        match self.argon2.verify_password(candidate.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(()),
            Err(password_hash::Error::Password) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Crypto(format!("Password verification failed: {e}"))),
        }
    }
}

impl std::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Hasher").finish_non_exhaustive()
    }
}
