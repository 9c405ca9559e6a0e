//! Core types shared by the identity service and the gateway.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, contract-level error codes.
///
/// These cross service boundaries verbatim, so the serialized form must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Bad email/password, unknown user, or malformed credential input.
    #[serde(rename = "AUTH_INVALID_CREDENTIALS")]
    InvalidCredentials,
    /// Registration attempted with an email that already exists.
    #[serde(rename = "AUTH_EMAIL_TAKEN")]
    EmailTaken,
    /// Access token failed verification for any reason other than expiry.
    #[serde(rename = "AUTH_INVALID_TOKEN")]
    InvalidToken,
    /// Access token is well-formed and correctly signed but past its expiry.
    #[serde(rename = "AUTH_EXPIRED_TOKEN")]
    ExpiredToken,
    /// Refresh token is empty, unknown, expired, revoked, or already used.
    #[serde(rename = "AUTH_INVALID_REFRESH_TOKEN")]
    InvalidRefreshToken,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::EmailTaken => "AUTH_EMAIL_TAKEN",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::ExpiredToken => "AUTH_EXPIRED_TOKEN",
            Self::InvalidRefreshToken => "AUTH_INVALID_REFRESH_TOKEN",
        }
    }

    /// Whether the code belongs to the `AUTH_INVALID_*` family.
    ///
    /// Callers at the edge treat this family as "log in again".
    #[must_use]
    pub fn is_invalid_credential(self) -> bool {
        self.as_str().starts_with("AUTH_INVALID_")
    }

    /// Default user-safe message for the code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid credentials",
            Self::EmailTaken => "email already taken",
            Self::InvalidToken => "invalid token",
            Self::ExpiredToken => "token expired",
            Self::InvalidRefreshToken => "invalid refresh token",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expected, classified business-level failure.
///
/// Returned as data, never through the infrastructure failure channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct DomainError {
    /// Stable error code.
    pub code: ErrorCode,
    /// User-safe message.
    pub message: String,
}

impl DomainError {
    /// Create a domain error with the code's default message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }

    /// Invalid credentials.
    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials)
    }

    /// Email already taken.
    #[must_use]
    pub fn email_taken() -> Self {
        Self::new(ErrorCode::EmailTaken)
    }

    /// Invalid access token.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::InvalidToken)
    }

    /// Expired access token.
    #[must_use]
    pub fn expired_token() -> Self {
        Self::new(ErrorCode::ExpiredToken)
    }

    /// Invalid refresh token.
    #[must_use]
    pub fn invalid_refresh_token() -> Self {
        Self::new(ErrorCode::InvalidRefreshToken)
    }
}

/// Public user representation (never carries the password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique user ID.
    pub id: String,
    /// Normalized (trimmed, lower-cased) email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Assigned roles, in assignment order.
    pub roles: Vec<String>,
    /// When the user registered.
    pub created_at: DateTime<Utc>,
}

/// Access + refresh token pair handed to a client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Signed access token.
    pub access_token: String,
    /// Opaque refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub access_expires_in: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: i64,
    /// Token type (always "Bearer").
    pub token_type: String,
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_expires_in", &self.access_expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Identity asserted by a verified access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject (user ID).
    pub user_id: String,
    /// Roles carried by the token, order preserved.
    pub roles: Vec<String>,
}

/// Request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// HTTP header carrying the request ID.
    pub const HEADER: &'static str = "x-request-id";

    /// Longest caller-supplied ID that is propagated as-is.
    pub const MAX_LEN: usize = 128;

    /// Create a request ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `req-<24 hex>` identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = [0u8; 12];
        if rand::rngs::OsRng.try_fill_bytes(&mut raw).is_err() {
            return Self("req-unknown".to_string());
        }
        Self(format!("req-{}", hex::encode(raw)))
    }

    /// Reuse a caller-supplied ID if it is sane, otherwise generate one.
    ///
    /// Accepted IDs are 1 to 128 visible ASCII characters.
    #[must_use]
    pub fn from_header_or_generate(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id)
                if !id.is_empty()
                    && id.len() <= Self::MAX_LEN
                    && id.bytes().all(|b| b.is_ascii_graphic()) =>
            {
                Self(id.to_string())
            }
            _ => Self::generate(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::InvalidRefreshToken).unwrap();
        assert_eq!(json, "\"AUTH_INVALID_REFRESH_TOKEN\"");

        let parsed: ErrorCode = serde_json::from_str("\"AUTH_EMAIL_TAKEN\"").unwrap();
        assert_eq!(parsed, ErrorCode::EmailTaken);
    }

    #[test]
    fn test_invalid_credential_family() {
        assert!(ErrorCode::InvalidCredentials.is_invalid_credential());
        assert!(ErrorCode::InvalidToken.is_invalid_credential());
        assert!(ErrorCode::InvalidRefreshToken.is_invalid_credential());
        assert!(!ErrorCode::ExpiredToken.is_invalid_credential());
        assert!(!ErrorCode::EmailTaken.is_invalid_credential());
    }

    #[test]
    fn test_domain_error_display() {
        let err = DomainError::email_taken();
        assert_eq!(err.to_string(), "AUTH_EMAIL_TAKEN: email already taken");
    }

    #[test]
    fn test_request_id_generate() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(a.0.starts_with("req-"));
        assert_eq!(a.0.len(), 4 + 24);
    }

    #[test]
    fn test_request_id_from_header() {
        assert_eq!(
            RequestId::from_header_or_generate(Some("abc-123")).0,
            "abc-123"
        );
        assert!(
            RequestId::from_header_or_generate(Some("has space"))
                .0
                .starts_with("req-")
        );
        assert!(
            RequestId::from_header_or_generate(Some(&"x".repeat(200)))
                .0
                .starts_with("req-")
        );
        assert!(RequestId::from_header_or_generate(None).0.starts_with("req-"));
    }

    #[test]
    fn test_tokens_debug_redacts_values() {
        let tokens = AuthTokens {
            access_token: "access-secret".to_string(),
            refresh_token: "refresh-secret".to_string(),
            access_expires_in: 900,
            refresh_expires_in: 3600,
            token_type: "Bearer".to_string(),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
    }
}
