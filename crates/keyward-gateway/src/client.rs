//! Client for the identity service's JSON-RPC endpoint.

use std::time::Duration;

use async_trait::async_trait;
use keyward_core::rpc::{self, RequestContext, RpcRequest, RpcResponse, ValidateParams, ValidateResult};
use keyward_core::secrets::COMMON_SECRET_PATTERNS;
use keyward_core::{DomainError, Identity, RequestId, scrub_secrets};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::GatewayError;

/// Why a token could not be validated.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// The identity service classified the token.
    #[error("Token rejected: {0}")]
    Rejected(DomainError),

    /// The identity service could not be reached or reported itself unavailable.
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),

    /// Anything else, including responses that do not parse.
    #[error("Unexpected identity response: {0}")]
    Unexpected(String),
}

/// Remote access token validation.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`, propagating `request_id` for correlation.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ValidateError`].
    async fn validate(&self, token: &str, request_id: &RequestId) -> Result<Identity, ValidateError>;
}

/// HTTP client for the identity service.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    rpc_url: String,
}

impl IdentityClient {
    /// Create a client for the identity service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            rpc_url: format!("{}/rpc", base_url.trim_end_matches('/')),
        })
    }

    /// Call an identity RPC method.
    async fn call<P, R>(&self, method: &str, params: &P, request_id: &RequestId) -> Result<R, ValidateError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let request = RpcRequest::new(method, params, Some(request_id.to_string()))
            .map_err(|e| ValidateError::Unexpected(format!("Encoding failed: {e}")))?;

        let response = self
            .http
            .post(&self.rpc_url)
            .header(RequestId::HEADER, request_id.as_ref())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    ValidateError::Unexpected(e.to_string())
                } else {
                    ValidateError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ValidateError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ValidateError::Unexpected(format!("HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ValidateError::Unexpected(scrubbed(&format!("Invalid response body: {e}"))))?;

        if let Some(err) = body.error {
            return Err(match err.domain_error() {
                Some(domain) => ValidateError::Rejected(domain),
                None if err.code == rpc::UNAVAILABLE => ValidateError::Unavailable(scrubbed(&err.message)),
                None => ValidateError::Unexpected(format!("RPC error {}: {}", err.code, scrubbed(&err.message))),
            });
        }

        let result = body
            .result
            .ok_or_else(|| ValidateError::Unexpected("Response has no result".to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| ValidateError::Unexpected(scrubbed(&format!("Invalid result: {e}"))))
    }
}

/// Far-side error text may echo token material.
fn scrubbed(text: &str) -> String {
    scrub_secrets(text, COMMON_SECRET_PATTERNS)
}

#[async_trait]
impl TokenValidator for IdentityClient {
    async fn validate(&self, token: &str, request_id: &RequestId) -> Result<Identity, ValidateError> {
        let params = ValidateParams {
            ctx: RequestContext {
                request_id: request_id.to_string(),
                user_id: None,
            },
            access_token: token.to_string(),
        };

        let result: ValidateResult = self.call(rpc::methods::VALIDATE, &params, request_id).await?;
        Ok(Identity {
            user_id: result.user_id,
            roles: result.roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_url() {
        let client = IdentityClient::new("http://identity:50051/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.rpc_url, "http://identity:50051/rpc");
    }

    #[test]
    fn test_scrubbed_hides_bearer() {
        let text = scrubbed("rejected header: Bearer abc.def.ghi from gateway");
        assert_eq!(text, "rejected header: Bearer [REDACTED] from gateway");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = IdentityClient::new(&format!("http://{addr}"), Duration::from_secs(1)).unwrap();
        let result = client.validate("token", &RequestId::new("req-1")).await;
        assert!(matches!(result, Err(ValidateError::Unavailable(_))));
    }
}
