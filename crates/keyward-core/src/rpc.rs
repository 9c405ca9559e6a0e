//! JSON-RPC protocol spoken between the gateway and the identity service.
//!
//! Outcomes are split three ways on the wire:
//! - success: `result` carries the method's payload
//! - domain error: `error.code == DOMAIN_ERROR`, `error.data` carries a [`DomainError`]
//! - infrastructure failure: HTTP 503 with `error.code == UNAVAILABLE` and no detail

use serde::{Deserialize, Serialize};

use crate::types::{AuthTokens, DomainError, UserProfile};

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Request ID.
    pub id: Option<String>,
}

impl RpcRequest {
    /// Build a request for `method` with typed params.
    ///
    /// # Errors
    ///
    /// Returns error if params cannot be serialized.
    pub fn new<P: Serialize>(
        method: &str,
        params: &P,
        id: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: VERSION.to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
            id,
        })
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Result (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (if failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Request ID.
    pub id: Option<String>,
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Decode the domain error carried by a `DOMAIN_ERROR` response.
    #[must_use]
    pub fn domain_error(&self) -> Option<DomainError> {
        if self.code != DOMAIN_ERROR {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}

impl RpcResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(id: Option<String>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Create a response carrying a classified domain error.
    #[must_use]
    pub fn domain(id: Option<String>, err: &DomainError) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code: DOMAIN_ERROR,
                message: err.message.clone(),
                data: serde_json::to_value(err).ok(),
            }),
            id,
        }
    }
}

/// Protocol version carried by every request and response.
pub const VERSION: &str = "2.0";

// Standard JSON-RPC error codes
/// Parse error.
pub const PARSE_ERROR: i32 = -32700;
/// Invalid request.
pub const INVALID_REQUEST: i32 = -32600;
/// Method not found.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid params.
pub const INVALID_PARAMS: i32 = -32602;

// Application-specific error codes (using -32000 to -32099 range)
/// Classified domain error; `data` holds `{code, message}`.
pub const DOMAIN_ERROR: i32 = -32010;
/// A dependency of the identity service is unavailable.
pub const UNAVAILABLE: i32 = -32011;

/// Method names.
pub mod methods {
    /// Register a new user.
    pub const REGISTER: &str = "auth.register";
    /// Log in with email and password.
    pub const LOGIN: &str = "auth.login";
    /// Rotate a refresh token.
    pub const REFRESH: &str = "auth.refresh";
    /// Revoke a refresh token.
    pub const LOGOUT: &str = "auth.logout";
    /// Validate an access token.
    pub const VALIDATE: &str = "auth.validate";
    /// Fetch a user profile.
    pub const PROFILE: &str = "users.profile";
}

/// Per-call context propagated from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation ID of the originating request.
    #[serde(default)]
    pub request_id: String,
    /// Authenticated caller, if the edge already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// `auth.register` params.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterParams {
    /// Caller context.
    #[serde(default)]
    pub ctx: RequestContext,
    /// Email address.
    pub email: String,
    /// Plaintext password.
    pub password: String,
    /// Display name.
    pub name: String,
}

/// `auth.login` params.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginParams {
    /// Caller context.
    #[serde(default)]
    pub ctx: RequestContext,
    /// Email address.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// `auth.refresh` and `auth.logout` params.
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshParams {
    /// Caller context.
    #[serde(default)]
    pub ctx: RequestContext,
    /// Raw refresh token.
    pub refresh_token: String,
}

/// `users.profile` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileParams {
    /// Caller context.
    #[serde(default)]
    pub ctx: RequestContext,
    /// User to look up; falls back to `ctx.user_id` when empty.
    #[serde(default)]
    pub user_id: String,
}

/// `auth.validate` params.
#[derive(Clone, Serialize, Deserialize)]
pub struct ValidateParams {
    /// Caller context.
    #[serde(default)]
    pub ctx: RequestContext,
    /// Access token to verify.
    pub access_token: String,
}

/// Result of `auth.register` and `auth.login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// The authenticated user.
    pub user: UserProfile,
    /// Freshly issued tokens.
    pub tokens: AuthTokens,
}

/// Result of `auth.validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResult {
    /// Subject of the token.
    pub user_id: String,
    /// Roles carried by the token.
    pub roles: Vec<String>,
}

macro_rules! redacted_debug {
    ($ty:ident { $($field:ident),* }) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("ctx", &self.ctx)
                    $(.field(stringify!($field), &self.$field))*
                    .finish_non_exhaustive()
            }
        }
    };
}

redacted_debug!(RegisterParams { email, name });
redacted_debug!(LoginParams { email });
redacted_debug!(RefreshParams {});
redacted_debug!(ValidateParams {});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_domain_response_carries_code() {
        let resp = RpcResponse::domain(Some("1".into()), &DomainError::expired_token());
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["error"]["code"], DOMAIN_ERROR);
        assert_eq!(json["error"]["data"]["code"], "AUTH_EXPIRED_TOKEN");
        assert!(json.get("result").is_none());

        let decoded: RpcResponse = serde_json::from_value(json).unwrap();
        let err = decoded.error.unwrap().domain_error().unwrap();
        assert_eq!(err.code, ErrorCode::ExpiredToken);
    }

    #[test]
    fn test_non_domain_error_has_no_domain_payload() {
        let resp = RpcResponse::error(None, UNAVAILABLE, "dependency unavailable");
        assert!(resp.error.unwrap().domain_error().is_none());
    }

    #[test]
    fn test_params_debug_hides_secrets() {
        let params = LoginParams {
            ctx: RequestContext::default(),
            email: "a@x.com".to_string(),
            password: "Secret123!".to_string(),
        };
        let debug = format!("{params:?}");
        assert!(debug.contains("a@x.com"));
        assert!(!debug.contains("Secret123!"));
    }

    #[test]
    fn test_profile_params_defaults() {
        let params: ProfileParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.user_id, "");
        assert_eq!(params.ctx, RequestContext::default());
    }
}
