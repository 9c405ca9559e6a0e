//! JSON-RPC server in front of the identity service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use keyward_core::RequestId;
use keyward_core::rpc::{
    self, LoginParams, ProfileParams, RefreshParams, RegisterParams, RequestContext, RpcRequest,
    RpcResponse, ValidateParams, ValidateResult, methods,
};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::IdentityError;
use crate::service::{IdentityService, ServiceError};

/// Shared handler state.
#[derive(Clone)]
struct ServerState {
    service: Arc<IdentityService>,
    request_timeout: Duration,
}

/// Identity JSON-RPC server.
pub struct IdentityServer {
    service: Arc<IdentityService>,
    request_timeout: Duration,
}

impl IdentityServer {
    /// Create a server around a service.
    #[must_use]
    pub const fn new(service: Arc<IdentityService>, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }

    /// Build the router: `POST /rpc` and `GET /health`.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = ServerState {
            service: self.service.clone(),
            request_timeout: self.request_timeout,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/rpc", post(rpc_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the listener fails.
    pub async fn run<F>(self, bind_address: &str, port: u16, shutdown: F) -> Result<(), IdentityError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{bind_address}:{port}")
            .parse()
            .map_err(|e| IdentityError::Config(format!("Invalid address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Identity service listening on http://{}", addr);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), IdentityError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| IdentityError::Server(e.to_string()))?;

        tracing::info!("Identity service stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Why an RPC call did not produce a result.
enum RpcFailure {
    Parse(String),
    InvalidRequest(String),
    InvalidParams(String),
    MethodNotFound(String),
    Service(ServiceError),
    Timeout,
}

impl From<ServiceError> for RpcFailure {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

type RpcResult = Result<serde_json::Value, RpcFailure>;

async fn rpc_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    payload: Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let header_id = headers
        .get(RequestId::HEADER)
        .and_then(|v| v.to_str().ok());

    let (id, method, result, request_id) = match payload {
        Ok(Json(request)) => {
            let ctx_id = request
                .params
                .get("ctx")
                .and_then(|ctx| ctx.get("request_id"))
                .and_then(serde_json::Value::as_str);
            let request_id = RequestId::from_header_or_generate(header_id.or(ctx_id));

            let span = tracing::info_span!(
                "rpc",
                method = %request.method,
                request_id = %request_id,
            );
            let result = async {
                if request.jsonrpc != rpc::VERSION {
                    return Err(RpcFailure::InvalidRequest(format!(
                        "Unsupported jsonrpc version: {}",
                        request.jsonrpc
                    )));
                }
                tokio::time::timeout(
                    state.request_timeout,
                    dispatch_rpc(&state.service, &request.method, request.params),
                )
                .await
                .unwrap_or(Err(RpcFailure::Timeout))
            }
            .instrument(span)
            .await;

            (request.id, request.method, result, request_id)
        }
        Err(rejection) => (
            None,
            String::new(),
            Err(RpcFailure::Parse(rejection.body_text())),
            RequestId::from_header_or_generate(header_id),
        ),
    };

    let (status, response) = match result {
        Ok(value) => (StatusCode::OK, RpcResponse::success(id, value)),
        Err(RpcFailure::Service(ServiceError::Domain(err))) => {
            tracing::debug!(%method, %request_id, code = %err.code, "Domain error");
            (StatusCode::OK, RpcResponse::domain(id, &err))
        }
        Err(RpcFailure::Service(ServiceError::Unavailable { .. })) => (
            StatusCode::SERVICE_UNAVAILABLE,
            RpcResponse::error(id, rpc::UNAVAILABLE, "Dependency unavailable"),
        ),
        Err(RpcFailure::Timeout) => {
            tracing::error!(%method, %request_id, "Request timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                RpcResponse::error(id, rpc::UNAVAILABLE, "Request timed out"),
            )
        }
        Err(RpcFailure::Parse(message)) => (
            StatusCode::BAD_REQUEST,
            RpcResponse::error(id, rpc::PARSE_ERROR, message),
        ),
        Err(RpcFailure::InvalidRequest(message)) => (
            StatusCode::BAD_REQUEST,
            RpcResponse::error(id, rpc::INVALID_REQUEST, message),
        ),
        Err(RpcFailure::InvalidParams(message)) => (
            StatusCode::OK,
            RpcResponse::error(id, rpc::INVALID_PARAMS, message),
        ),
        Err(RpcFailure::MethodNotFound(name)) => (
            StatusCode::OK,
            RpcResponse::error(id, rpc::METHOD_NOT_FOUND, format!("Method not found: {name}")),
        ),
    };

    let mut response = (status, Json(response)).into_response();
    if let Ok(value) = HeaderValue::from_str(request_id.as_ref()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RequestId::HEADER), value);
    }
    response
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcFailure> {
    serde_json::from_value(params).map_err(|e| RpcFailure::InvalidParams(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| {
        RpcFailure::Service(ServiceError::Unavailable {
            operation: "serialize",
            reason: e.to_string(),
        })
    })
}

async fn dispatch_rpc(
    service: &IdentityService,
    method: &str,
    params: serde_json::Value,
) -> RpcResult {
    match method {
        methods::REGISTER => {
            let p: RegisterParams = parse_params(params)?;
            let result = service.register(&p.email, &p.password, &p.name).await?;
            to_value(&result)
        }
        methods::LOGIN => {
            let p: LoginParams = parse_params(params)?;
            let result = service.login(&p.email, &p.password).await?;
            to_value(&result)
        }
        methods::REFRESH => {
            let p: RefreshParams = parse_params(params)?;
            let tokens = service.refresh(&p.refresh_token).await?;
            to_value(&tokens)
        }
        methods::LOGOUT => {
            let p: RefreshParams = parse_params(params)?;
            service.logout(&p.refresh_token).await?;
            Ok(serde_json::json!({ "revoked": true }))
        }
        methods::PROFILE => {
            let p: ProfileParams = parse_params(params)?;
            let user_id = profile_subject(&p.user_id, &p.ctx);
            let profile = service.get_profile(user_id).await?;
            to_value(&profile)
        }
        methods::VALIDATE => {
            let p: ValidateParams = parse_params(params)?;
            let identity = service
                .validate_access_token(&p.access_token)
                .map_err(ServiceError::Domain)?;
            to_value(&ValidateResult {
                user_id: identity.user_id,
                roles: identity.roles,
            })
        }
        other => Err(RpcFailure::MethodNotFound(other.to_string())),
    }
}

/// Explicit user ID, else the caller's own.
fn profile_subject<'a>(user_id: &'a str, ctx: &'a RequestContext) -> &'a str {
    if user_id.trim().is_empty() {
        ctx.user_id.as_deref().unwrap_or_default()
    } else {
        user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::test_service;
    use crate::store::SledStore;
    use axum::body::Body;
    use axum::http::Request;
    use keyward_core::ManualClock;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _dir: TempDir,
        router: Router,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let service = test_service(store, Arc::new(ManualClock::at_timestamp(1_700_000_000)));
        let server = IdentityServer::new(Arc::new(service), Duration::from_secs(5));
        Fixture {
            _dir: dir,
            router: server.router(),
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        params: serde_json::Value,
    ) -> (StatusCode, HeaderMap, RpcResponse) {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": "1",
        });
        let request = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .header(RequestId::HEADER, "req-test")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    fn register_params() -> serde_json::Value {
        serde_json::json!({
            "email": "a@x.com",
            "password": "Secret123!",
            "name": "Ann",
        })
    }

    #[tokio::test]
    async fn test_register_login_validate() {
        let f = fixture();

        let (status, headers, resp) = call(&f.router, methods::REGISTER, register_params()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(RequestId::HEADER).unwrap(), "req-test");
        let result = resp.result.unwrap();
        assert_eq!(result["user"]["email"], "a@x.com");
        assert_eq!(result["tokens"]["token_type"], "Bearer");

        let (_, _, resp) = call(
            &f.router,
            methods::LOGIN,
            serde_json::json!({ "email": "a@x.com", "password": "Secret123!" }),
        )
        .await;
        let access = resp.result.unwrap()["tokens"]["access_token"]
            .as_str()
            .unwrap()
            .to_string();

        let (_, _, resp) = call(
            &f.router,
            methods::VALIDATE,
            serde_json::json!({ "access_token": access }),
        )
        .await;
        let validated: ValidateResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(validated.roles, vec!["customer".to_string()]);
    }

    #[tokio::test]
    async fn test_domain_error_on_wire() {
        let f = fixture();
        call(&f.router, methods::REGISTER, register_params()).await;

        let (status, _, resp) = call(&f.router, methods::REGISTER, register_params()).await;
        assert_eq!(status, StatusCode::OK);
        let err = resp.error.unwrap();
        assert_eq!(err.code, rpc::DOMAIN_ERROR);
        assert_eq!(
            err.domain_error().unwrap().code,
            keyward_core::ErrorCode::EmailTaken
        );
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let f = fixture();
        let (_, _, resp) = call(&f.router, methods::REGISTER, register_params()).await;
        let refresh = resp.result.unwrap()["tokens"]["refresh_token"]
            .as_str()
            .unwrap()
            .to_string();

        let (_, _, resp) = call(
            &f.router,
            methods::REFRESH,
            serde_json::json!({ "refresh_token": refresh }),
        )
        .await;
        let next = resp.result.unwrap()["refresh_token"]
            .as_str()
            .unwrap()
            .to_string();

        let (_, _, resp) = call(
            &f.router,
            methods::LOGOUT,
            serde_json::json!({ "refresh_token": next }),
        )
        .await;
        assert_eq!(resp.result.unwrap()["revoked"], true);

        let (_, _, resp) = call(
            &f.router,
            methods::REFRESH,
            serde_json::json!({ "refresh_token": next }),
        )
        .await;
        assert_eq!(
            resp.error.unwrap().domain_error().unwrap().code,
            keyward_core::ErrorCode::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn test_profile_falls_back_to_ctx_user() {
        let f = fixture();
        let (_, _, resp) = call(&f.router, methods::REGISTER, register_params()).await;
        let user_id = resp.result.unwrap()["user"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (_, _, resp) = call(
            &f.router,
            methods::PROFILE,
            serde_json::json!({ "ctx": { "request_id": "r", "user_id": user_id } }),
        )
        .await;
        assert_eq!(resp.result.unwrap()["id"], user_id.as_str());

        let (_, _, resp) = call(&f.router, methods::PROFILE, serde_json::json!({})).await;
        assert_eq!(resp.error.unwrap().code, rpc::DOMAIN_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let f = fixture();

        let (_, _, resp) = call(&f.router, "auth.teleport", serde_json::json!({})).await;
        assert_eq!(resp.error.unwrap().code, rpc::METHOD_NOT_FOUND);

        let (_, _, resp) = call(&f.router, methods::LOGIN, serde_json::json!({ "email": 7 })).await;
        assert_eq!(resp.error.unwrap().code, rpc::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let f = fixture();
        let request = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(RequestId::HEADER).is_some());
    }

    #[tokio::test]
    async fn test_wrong_jsonrpc_version() {
        let f = fixture();
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "method": methods::LOGIN,
            "params": {},
            "id": "7",
        });
        let request = Request::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let resp: RpcResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(resp.error.unwrap().code, rpc::INVALID_REQUEST);
        assert_eq!(resp.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_profile_subject() {
        let ctx = RequestContext {
            request_id: "r".to_string(),
            user_id: Some("me".to_string()),
        };
        assert_eq!(profile_subject("other", &ctx), "other");
        assert_eq!(profile_subject("", &ctx), "me");
        assert_eq!(profile_subject(" ", &RequestContext::default()), "");
    }
}
