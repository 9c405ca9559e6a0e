//! Input validation and normalization for credential inputs.
//!
//! Everything here is pure and side-effect free: a failure means the request
//! is rejected before any hashing or storage work happens.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty (after trimming).
    #[error("{field} is required")]
    Empty {
        /// Field name.
        field: &'static str,
    },

    /// Input exceeds maximum allowed length.
    #[error("{field} exceeds maximum length ({max} bytes, got {actual})")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
        /// Actual input length.
        actual: usize,
    },
}

/// Size limits per input type.
pub mod limits {
    /// Maximum email length (RFC 5321 path limit).
    pub const MAX_EMAIL_LENGTH: usize = 254;

    /// Maximum password length. Bounds the work a single hash call can be asked to do.
    pub const MAX_PASSWORD_LENGTH: usize = 1024;

    /// Maximum display name length.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Maximum bearer/refresh token length accepted from clients.
    pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            max,
            actual: value.len(),
        });
    }
    Ok(())
}

/// Trim a required field and reject it if empty or oversize.
///
/// # Errors
///
/// Returns `ValidationError::Empty` or `ValidationError::TooLong`.
pub fn require<'a>(
    field: &'static str,
    value: &'a str,
    max: usize,
) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    check_len(field, trimmed, max)?;
    Ok(trimmed)
}

/// Normalize an email for storage and lookup: trimmed and lower-cased.
///
/// # Errors
///
/// Returns error if the email is empty or too long.
pub fn normalize_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = require("email", email, limits::MAX_EMAIL_LENGTH)?;
    Ok(trimmed.to_lowercase())
}

/// Validate a password.
///
/// Passwords are never trimmed or normalized, only checked: whitespace-only
/// passwords are rejected like empty ones.
///
/// # Errors
///
/// Returns error if the password is blank or too long.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.trim().is_empty() {
        return Err(ValidationError::Empty { field: "password" });
    }
    check_len("password", password, limits::MAX_PASSWORD_LENGTH)
}

/// Sanitize a display name.
///
/// Performs:
/// 1. Strip control characters
/// 2. Unicode normalization (NFKC)
/// 3. Trim, then emptiness and length checks
///
/// # Errors
///
/// Returns error if the sanitized name is empty or too long.
pub fn sanitize_name(name: &str) -> Result<String, ValidationError> {
    let sanitized: String = name.chars().filter(|c| !c.is_control()).collect();
    let normalized: String = sanitized.nfkc().collect();
    let trimmed = require("name", &normalized, limits::MAX_NAME_LENGTH)?;
    Ok(trimmed.to_string())
}
