//! Access token signing and verification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use keyward_core::{Identity, SharedClock, SigningSecret};
use serde::{Deserialize, Serialize};

use super::AuthError;
use super::refresh::new_id;

/// Random bytes in each token's `jti`.
const JTI_BYTES: usize = 16;

/// Signs and verifies short-lived, stateless identity assertions.
pub trait AccessTokenCodec: Send + Sync {
    /// Sign a token for `user_id` carrying `roles`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidInput` for an empty user ID or a TTL under
    /// one second, or another variant if encoding fails.
    fn sign(
        &self,
        user_id: &str,
        roles: &[String],
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), AuthError>;

    /// Verify a token and return the identity it asserts.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ExpiredToken` for an otherwise valid token past its
    /// expiry and `AuthError::InvalidToken` for every other rejection.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
    /// Roles, in assignment order.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// HS256 JWT codec.
///
/// The key is fixed at construction; there is one signing key per process.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    clock: SharedClock,
}

impl JwtManager {
    /// Create a codec for `issuer` signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the secret or issuer is blank.
    pub fn new(
        secret: &SigningSecret,
        issuer: impl Into<String>,
        clock: SharedClock,
    ) -> Result<Self, AuthError> {
        let issuer = issuer.into();
        if secret.is_blank() {
            return Err(AuthError::Config("JWT secret cannot be empty".to_string()));
        }
        if issuer.trim().is_empty() {
            return Err(AuthError::Config("Token issuer cannot be empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Expiry is checked against the injected clock after the signature
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.expose()),
            decoding_key: DecodingKey::from_secret(secret.expose()),
            validation,
            issuer,
            clock,
        })
    }

    /// Decode and check signature, algorithm and issuer, but not expiry.
    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl AccessTokenCodec for JwtManager {
    fn sign(
        &self,
        user_id: &str,
        roles: &[String],
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        if user_id.is_empty() {
            return Err(AuthError::InvalidInput("user id is required".to_string()));
        }
        let ttl_secs = i64::try_from(ttl.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| AuthError::InvalidInput(format!("invalid token ttl: {ttl:?}")))?;

        let iat = self.clock.now().timestamp();
        let exp = iat
            .checked_add(ttl_secs)
            .ok_or_else(|| AuthError::InvalidInput(format!("invalid token ttl: {ttl:?}")))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| AuthError::InvalidInput(format!("invalid token ttl: {ttl:?}")))?;

        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat,
            exp,
            jti: new_id(JTI_BYTES)?,
            roles: roles.to_vec(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Crypto(format!("Encoding failed: {e}")))?;

        Ok((token, expires_at))
    }

    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode_claims(token)?;

        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::ExpiredToken);
        }

        Ok(Identity {
            user_id: claims.sub,
            roles: claims.roles,
        })
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
