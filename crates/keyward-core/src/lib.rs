//! # Keyward Core
//!
//! Types and plumbing shared by the identity service and the edge gateway.
//!
//! This crate provides:
//! - Configuration loading and validation (JSON5 format)
//! - Domain error codes and user/token payloads
//! - The JSON-RPC wire protocol between gateway and identity service
//! - An injectable clock for token issuance and verification
//! - Secret redaction and credential input validation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod rpc;
pub mod secrets;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{
    Config, ConfigError, GatewayConfig, IdentityConfig, MAX_TOKEN_TTL_SECS, PasswordHashConfig,
};
pub use secrets::{SigningSecret, scrub_secrets};
pub use types::{AuthTokens, DomainError, ErrorCode, Identity, RequestId, UserProfile};
pub use validation::ValidationError;

