//! Secret handling.
//!
//! - `SigningSecret`: the access-token signing key, redacted in all output
//! - `scrub_secrets`: redact token material from log and error text

use secrecy::{ExposeSecret, SecretBox};

/// Minimum recommended signing secret length in bytes.
pub const RECOMMENDED_SECRET_LEN: usize = 32;

/// HMAC signing secret that prevents accidental logging.
///
/// Constructed once at startup and handed to the token codec; never read
/// from ambient state afterwards.
#[derive(Clone)]
pub struct SigningSecret(SecretBox<str>);

impl SigningSecret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretBox::new(secret.into().into_boxed_str()))
    }

    /// Expose the raw key bytes for HMAC key construction.
    ///
    /// Use sparingly - only when building signing/verification keys.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }

    /// Whether the secret is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }

    /// Secret length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    /// Whether the secret has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret([REDACTED])")
    }
}

impl std::fmt::Display for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Scrub token material from a string.
///
/// Replaces the value following each pattern with `[REDACTED]`.
///
/// # Arguments
///
/// * `text` - Text to scrub
/// * `patterns` - Patterns to look for (e.g., `["refresh_token=", "Bearer "]`)
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut result = text.to_string();

    for pattern in patterns {
        let mut search_start = 0;
        while let Some(start) = result[search_start..].find(pattern) {
            let abs_start = search_start + start + pattern.len();

            // Value ends at whitespace, a quote, or a separator
            let end = result[abs_start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '&' || c == ',')
                .map_or(result.len(), |e| abs_start + e);

            result.replace_range(abs_start..end, "[REDACTED]");

            search_start = abs_start + "[REDACTED]".len();
        }
    }

    result
}

/// Token-bearing patterns to scrub from logs.
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "access_token\":\"",
    "refresh_token\":\"",
    "password\":\"",
    "access_token=",
    "refresh_token=",
    "password=",
    "secret=",
    "Bearer ",
];
