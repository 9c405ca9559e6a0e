//! Gateway middleware: request correlation and bearer token enforcement.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use keyward_core::validation::limits::MAX_TOKEN_LENGTH;
use keyward_core::{Identity, RequestId};
use serde::Serialize;
use tokio::time::error::Elapsed;
use tracing::Instrument;

use crate::client::{TokenValidator, ValidateError};

/// Shared state for [`require_auth`].
#[derive(Clone)]
pub struct AuthState {
    validator: Arc<dyn TokenValidator>,
    timeout: Duration,
}

impl AuthState {
    /// Create auth state validating through `validator`, bounded by `timeout`.
    #[must_use]
    pub fn new(validator: Arc<dyn TokenValidator>, timeout: Duration) -> Self {
        Self { validator, timeout }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Identity attached to an authenticated request.
///
/// Use this in handler parameters on routes behind [`require_auth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// The authenticated user's ID.
    pub user_id: String,
    /// The user's roles, owned by the request.
    pub roles: Vec<String>,
}

impl From<Identity> for AuthContext {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            roles: identity.roles,
        }
    }
}

/// Edge-visible authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// Log in again.
    Unauthorized,
    /// Retry later.
    Unavailable,
}

#[derive(Serialize)]
struct AuthErrorResponse {
    error: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "auth_unavailable"),
        };
        (status, Json(AuthErrorResponse { error })).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthRejection::Unauthorized)
    }
}

/// Extract the token from a single well-formed `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Anything else (no header,
/// repeated headers, other schemes, missing or extra parts) yields `None`.
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }

    let mut parts = value.to_str().ok()?.split_whitespace();
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    if token.len() > MAX_TOKEN_LENGTH {
        return None;
    }
    Some(token)
}

/// Map a bounded validation attempt to what the edge returns.
///
/// The `AUTH_INVALID_*` family and every unclassified failure mean 401;
/// a missed deadline or an unavailable identity service means 503.
pub fn classify(
    outcome: Result<Result<Identity, ValidateError>, Elapsed>,
) -> Result<Identity, AuthRejection> {
    match outcome {
        Ok(Ok(identity)) => Ok(identity),
        Err(_) => {
            tracing::warn!("Token validation deadline exceeded");
            Err(AuthRejection::Unavailable)
        }
        Ok(Err(ValidateError::Unavailable(reason))) => {
            tracing::warn!(reason = %reason, "Identity service unavailable");
            Err(AuthRejection::Unavailable)
        }
        Ok(Err(ValidateError::Rejected(err))) if err.code.is_invalid_credential() => {
            tracing::debug!(code = %err.code, "Token rejected");
            Err(AuthRejection::Unauthorized)
        }
        Ok(Err(other)) => {
            tracing::debug!(error = %other, "Token not accepted");
            Err(AuthRejection::Unauthorized)
        }
    }
}

/// Read or generate the request ID, expose it to handlers, and echo it back.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = RequestId::from_header_or_generate(
        req.headers()
            .get(RequestId::HEADER)
            .and_then(|v| v.to_str().ok()),
    );
    req.extensions_mut().insert(id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = async {
        tracing::debug!("Request received");
        next.run(req).await
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(id.as_ref()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RequestId::HEADER), value);
    }
    response
}

/// Require a valid bearer token; attach [`AuthContext`] on success.
///
/// A missing or malformed header is rejected without calling the identity
/// service. The remote call is bounded by the configured timeout.
pub async fn require_auth(State(auth): State<AuthState>, mut req: Request, next: Next) -> Response {
    let Some(token) = extract_bearer(req.headers()).map(str::to_string) else {
        tracing::debug!("Missing or malformed bearer token");
        return AuthRejection::Unauthorized.into_response();
    };

    let request_id = req.extensions().get::<RequestId>().cloned().unwrap_or_else(|| {
        RequestId::from_header_or_generate(
            req.headers()
                .get(RequestId::HEADER)
                .and_then(|v| v.to_str().ok()),
        )
    });

    let outcome =
        tokio::time::timeout(auth.timeout, auth.validator.validate(&token, &request_id)).await;

    match classify(outcome) {
        Ok(identity) => {
            tracing::debug!(user_id = %identity.user_id, %request_id, "Authenticated");
            req.extensions_mut().insert(AuthContext::from(identity));
            next.run(req).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::DomainError;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(AUTHORIZATION, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&headers(&["Bearer abc123"])), Some("abc123"));
        assert_eq!(extract_bearer(&headers(&["bearer abc123"])), Some("abc123"));
        assert_eq!(extract_bearer(&headers(&["BEARER  abc123 "])), Some("abc123"));
    }

    #[test]
    fn test_extract_bearer_rejects_malformed() {
        assert_eq!(extract_bearer(&headers(&[])), None);
        assert_eq!(extract_bearer(&headers(&["abc123"])), None);
        assert_eq!(extract_bearer(&headers(&["Bearer"])), None);
        assert_eq!(extract_bearer(&headers(&["Bearer "])), None);
        assert_eq!(extract_bearer(&headers(&["Basic dXNlcjpwYXNz"])), None);
        assert_eq!(extract_bearer(&headers(&["Bearer a b"])), None);
        assert_eq!(extract_bearer(&headers(&["Bearer a", "Bearer b"])), None);

        let long = format!("Bearer {}", "a".repeat(MAX_TOKEN_LENGTH + 1));
        assert_eq!(extract_bearer(&headers(&[&long])), None);
    }

    #[test]
    fn test_classify() {
        let identity = Identity {
            user_id: "u1".to_string(),
            roles: vec!["customer".to_string()],
        };
        assert_eq!(classify(Ok(Ok(identity.clone()))), Ok(identity));

        assert_eq!(
            classify(Ok(Err(ValidateError::Rejected(DomainError::invalid_token())))),
            Err(AuthRejection::Unauthorized)
        );
        assert_eq!(
            classify(Ok(Err(ValidateError::Rejected(DomainError::expired_token())))),
            Err(AuthRejection::Unauthorized)
        );
        assert_eq!(
            classify(Ok(Err(ValidateError::Unavailable("down".to_string())))),
            Err(AuthRejection::Unavailable)
        );
        assert_eq!(
            classify(Ok(Err(ValidateError::Unexpected("garbled".to_string())))),
            Err(AuthRejection::Unauthorized)
        );
    }

    #[test]
    fn test_auth_context_keeps_role_order() {
        let ctx = AuthContext::from(Identity {
            user_id: "u1".to_string(),
            roles: vec!["support".to_string(), "customer".to_string()],
        });
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.roles, vec!["support", "customer"]);
    }
}
