//! Configuration loading and validation.
//!
//! JSON5 file at `$KEYWARD_CONFIG` or `~/.keyward/keyward.json`, overridden by
//! `KEYWARD_*` environment variables. Missing or invalid security settings are
//! fatal at startup, never at request time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::secrets::{RECOMMENDED_SECRET_LEN, SigningSecret};

/// Longest accepted access or refresh token lifetime (ten years).
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Environment override could not be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Identity service configuration.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Edge gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Only syntax is checked here; call [`IdentityConfig::validate`] or
    /// [`GatewayConfig::validate`] for the component being started.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// The signing secret is never written out.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    ///
    /// Uses `KEYWARD_CONFIG` if set.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var("KEYWARD_CONFIG")
            .map_or_else(|_| Self::state_dir().join("keyward.json"), PathBuf::from)
    }

    /// Get the Keyward state directory.
    ///
    /// Uses `KEYWARD_STATE_DIR` env var if set, otherwise `~/.keyward`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("KEYWARD_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".keyward")
        } else {
            PathBuf::from(".keyward")
        }
    }

    /// Apply `KEYWARD_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override does not parse.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override does not parse.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(secret) = get("KEYWARD_JWT_SECRET") {
            self.identity.jwt_secret = Some(secret);
        }
        if let Some(issuer) = get("KEYWARD_TOKEN_ISSUER") {
            self.identity.token_issuer = issuer;
        }
        if let Some(dir) = get("KEYWARD_DATA_DIR") {
            self.identity.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = get("KEYWARD_ACCESS_TOKEN_TTL_SECS") {
            self.identity.access_token_ttl_secs = parse_env("KEYWARD_ACCESS_TOKEN_TTL_SECS", v)?;
        }
        if let Some(v) = get("KEYWARD_REFRESH_TOKEN_TTL_SECS") {
            self.identity.refresh_token_ttl_secs = parse_env("KEYWARD_REFRESH_TOKEN_TTL_SECS", v)?;
        }
        if let Some(v) = get("KEYWARD_IDENTITY_PORT") {
            self.identity.port = parse_env("KEYWARD_IDENTITY_PORT", v)?;
        }
        if let Some(url) = get("KEYWARD_IDENTITY_URL") {
            self.gateway.identity_url = url;
        }
        if let Some(v) = get("KEYWARD_AUTH_TIMEOUT_MS") {
            self.gateway.auth_timeout_ms = parse_env("KEYWARD_AUTH_TIMEOUT_MS", v)?;
        }
        if let Some(v) = get("KEYWARD_GATEWAY_PORT") {
            self.gateway.port = parse_env("KEYWARD_GATEWAY_PORT", v)?;
        }

        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

/// Identity service configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Port to listen on.
    #[serde(default = "default_identity_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Data directory for the user/refresh-token database.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// HMAC signing secret. Required; usually supplied via `KEYWARD_JWT_SECRET`.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<String>,

    /// Issuer claim stamped into and required on every access token.
    #[serde(default = "default_issuer")]
    pub token_issuer: String,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Upper bound on a single RPC, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Password hashing cost.
    #[serde(default)]
    pub password_hash: PasswordHashConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            port: default_identity_port(),
            bind_address: default_bind_address(),
            data_dir: None,
            jwt_secret: None,
            token_issuer: default_issuer(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            request_timeout_ms: default_request_timeout(),
            password_hash: PasswordHashConfig::default(),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("port", &self.port)
            .field("bind_address", &self.bind_address)
            .field("data_dir", &self.data_dir)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_issuer", &self.token_issuer)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("password_hash", &self.password_hash)
            .finish()
    }
}

impl IdentityConfig {
    /// Validate everything the identity service needs before it can start.
    ///
    /// # Errors
    ///
    /// Returns error on a missing secret, empty issuer, a TTL outside
    /// `1..=MAX_TOKEN_TTL_SECS`, or a non-positive cost.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self.signing_secret()?;
        if secret.len() < RECOMMENDED_SECRET_LEN {
            tracing::warn!(
                len = secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "JWT secret is shorter than recommended"
            );
        }

        if self.token_issuer.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Token issuer cannot be empty".to_string(),
            ));
        }
        for (name, ttl) in [
            ("Access", self.access_token_ttl_secs),
            ("Refresh", self.refresh_token_ttl_secs),
        ] {
            if ttl == 0 || ttl > MAX_TOKEN_TTL_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} token TTL must be between 1 and {MAX_TOKEN_TTL_SECS} seconds"
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Request timeout must be > 0".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "Identity port cannot be 0".to_string(),
            ));
        }
        self.password_hash.validate()
    }

    /// The signing secret, wrapped for redaction.
    ///
    /// # Errors
    ///
    /// Returns error if no non-blank secret is configured.
    pub fn signing_secret(&self) -> Result<SigningSecret, ConfigError> {
        let secret = self
            .jwt_secret
            .as_deref()
            .map(SigningSecret::new)
            .ok_or_else(|| ConfigError::MissingField("identity.jwtSecret".to_string()))?;
        if secret.is_blank() {
            return Err(ConfigError::MissingField("identity.jwtSecret".to_string()));
        }
        Ok(secret)
    }

    /// Access token TTL as Duration.
    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    /// Refresh token TTL as Duration.
    #[must_use]
    pub const fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    /// Per-request timeout as Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::state_dir().join("identity"))
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordHashConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl PasswordHashConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_kib == 0 || self.iterations == 0 || self.parallelism == 0 {
            return Err(ConfigError::Validation(
                "Password hash cost parameters must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Edge gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port to listen on.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Base URL of the identity service.
    #[serde(default = "default_identity_url")]
    pub identity_url: String,

    /// Deadline for a single token validation call, in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_ms: u64,

    /// TCP connect timeout towards the identity service, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind_address: default_bind_address(),
            identity_url: default_identity_url(),
            auth_timeout_ms: default_auth_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Validate gateway settings.
    ///
    /// # Errors
    ///
    /// Returns error on an empty identity URL or a zero timeout/port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Identity URL cannot be empty".to_string(),
            ));
        }
        if self.auth_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Auth timeout must be > 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Connect timeout must be > 0".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "Gateway port cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Auth call deadline as Duration.
    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Connect timeout as Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

const fn default_identity_port() -> u16 {
    50051
}

const fn default_gateway_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_identity_url() -> String {
    "http://127.0.0.1:50051".to_string()
}

fn default_issuer() -> String {
    "keyward".to_string()
}

const fn default_access_ttl() -> u64 {
    15 * 60
}

const fn default_refresh_ttl() -> u64 {
    30 * 24 * 3600
}

const fn default_request_timeout() -> u64 {
    5_000
}

const fn default_auth_timeout() -> u64 {
    2_000
}

const fn default_connect_timeout() -> u64 {
    3_000
}

const fn default_memory_kib() -> u32 {
    19 * 1024
}

const fn default_iterations() -> u32 {
    2
}

const fn default_parallelism() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn with_secret() -> Config {
        let mut config = Config::default();
        config.identity.jwt_secret = Some("0123456789abcdef0123456789abcdef".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.identity.port, 50051);
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.identity.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.gateway.auth_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let config = Config::default();
        assert!(matches!(
            config.identity.validate(),
            Err(ConfigError::MissingField(_))
        ));

        let mut blank = Config::default();
        blank.identity.jwt_secret = Some("   ".to_string());
        assert!(blank.identity.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_is_fatal() {
        let mut config = with_secret();
        assert!(config.identity.validate().is_ok());

        config.identity.refresh_token_ttl_secs = 0;
        assert!(matches!(
            config.identity.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_oversized_ttl_is_fatal() {
        let mut config = with_secret();
        config.identity.refresh_token_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.identity.validate().is_ok());

        config.identity.refresh_token_ttl_secs = 10_000_000_000_000;
        assert!(matches!(
            config.identity.validate(),
            Err(ConfigError::Validation(_))
        ));

        config.identity.refresh_token_ttl_secs = 3600;
        config.identity.access_token_ttl_secs = MAX_TOKEN_TTL_SECS + 1;
        assert!(config.identity.validate().is_err());
    }

    #[test]
    fn test_empty_issuer_is_fatal() {
        let mut config = with_secret();
        config.identity.token_issuer = " ".to_string();
        assert!(config.identity.validate().is_err());
    }

    #[test]
    fn test_gateway_validation() {
        let mut config = Config::default();
        assert!(config.gateway.validate().is_ok());

        config.gateway.auth_timeout_ms = 0;
        assert!(config.gateway.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip_omits_secret() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("keyward.json");

        let mut config = with_secret();
        config.identity.token_issuer = "roundtrip".to_string();
        config.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("0123456789abcdef"));

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.identity.token_issuer, "roundtrip");
        assert!(loaded.identity.jwt_secret.is_none());
    }

    #[test]
    fn test_json5_parsing() {
        let json5_content = r#"{
            // identity service
            identity: {
                port: 6000,
                tokenIssuer: "edge",
                accessTokenTtlSecs: 60,
                passwordHash: { iterations: 3 },
            },
            gateway: {
                identityUrl: "http://identity:6000",
            },
        }"#;

        let config: Config = json5::from_str(json5_content).unwrap();
        assert_eq!(config.identity.port, 6000);
        assert_eq!(config.identity.token_issuer, "edge");
        assert_eq!(config.identity.access_token_ttl_secs, 60);
        assert_eq!(config.identity.password_hash.iterations, 3);
        assert_eq!(config.identity.password_hash.parallelism, 1);
        assert_eq!(config.gateway.identity_url, "http://identity:6000");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEYWARD_JWT_SECRET", "from-env"),
            ("KEYWARD_ACCESS_TOKEN_TTL_SECS", "120"),
            ("KEYWARD_AUTH_TIMEOUT_MS", "750"),
            ("KEYWARD_TOKEN_ISSUER", "  "),
        ]);

        let config = Config::default()
            .with_overrides(|var| env.get(var).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.identity.jwt_secret.as_deref(), Some("from-env"));
        assert_eq!(config.identity.access_token_ttl_secs, 120);
        assert_eq!(config.gateway.auth_timeout_ms, 750);
        // Blank overrides are ignored
        assert_eq!(config.identity.token_issuer, "keyward");
    }

    #[test]
    fn test_bad_numeric_override() {
        let result = Config::default().with_overrides(|var| {
            (var == "KEYWARD_REFRESH_TOKEN_TTL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                var: "KEYWARD_REFRESH_TOKEN_TTL_SECS",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = with_secret();
        let debug = format!("{:?}", config.identity);
        assert!(!debug.contains("0123456789abcdef"));
        assert!(debug.contains("[REDACTED]"));
    }
}
