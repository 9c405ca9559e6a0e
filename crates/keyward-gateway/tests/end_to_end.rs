//! Gateway against a live identity service on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use keyward_core::rpc::{RpcRequest, RpcResponse, methods};
use keyward_core::{ErrorCode, GatewayConfig, PasswordHashConfig, SigningSecret, system_clock};
use keyward_gateway::Gateway;
use keyward_identity::{Argon2Hasher, IdentityServer, IdentityService, JwtManager, SledStore};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;

struct LiveIdentity {
    _dir: TempDir,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

async fn spawn_identity() -> LiveIdentity {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let clock = system_clock();

    let service = IdentityService::builder()
        .users(store.clone())
        .refresh_tokens(store)
        .hasher(Arc::new(
            Argon2Hasher::new(PasswordHashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            })
            .unwrap(),
        ))
        .codec(Arc::new(
            JwtManager::new(
                &SigningSecret::new("end-to-end-secret-0123456789abcdef"),
                "keyward-e2e",
                clock.clone(),
            )
            .unwrap(),
        ))
        .clock(clock)
        .build()
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let server = IdentityServer::new(Arc::new(service), Duration::from_secs(5));
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });

    LiveIdentity {
        _dir: dir,
        addr,
        stop,
        handle,
    }
}

async fn rpc(addr: SocketAddr, method: &str, params: serde_json::Value) -> RpcResponse {
    let request = RpcRequest::new(method, &params, Some("1".to_string())).unwrap();
    reqwest::Client::new()
        .post(format!("http://{addr}/rpc"))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn gateway_for(addr: SocketAddr) -> Gateway {
    let config = GatewayConfig {
        identity_url: format!("http://{addr}"),
        auth_timeout_ms: 2_000,
        ..GatewayConfig::default()
    };
    Gateway::builder().with_config(config).build().unwrap()
}

async fn me(gateway: &Gateway, authorization: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .uri("/v1/me")
        .header("authorization", authorization)
        .header("x-request-id", "req-e2e")
        .body(Body::empty())
        .unwrap();
    let response = gateway.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_register_then_call_protected_route() {
    let identity = spawn_identity().await;
    let gateway = gateway_for(identity.addr);

    let registered = rpc(
        identity.addr,
        methods::REGISTER,
        serde_json::json!({ "email": "a@x.com", "password": "Secret123!", "name": "Ann" }),
    )
    .await
    .result
    .unwrap();
    let user_id = registered["user"]["id"].as_str().unwrap();
    let access = registered["tokens"]["access_token"].as_str().unwrap();
    assert!(registered["tokens"]["access_expires_in"].as_i64().unwrap() > 0);
    assert!(registered["tokens"]["refresh_expires_in"].as_i64().unwrap() > 0);

    let (status, body) = me(&gateway, &format!("Bearer {access}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "user_id": user_id, "roles": ["customer"] })
    );

    let (status, body) = me(&gateway, "Bearer not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, serde_json::json!({ "error": "unauthorized" }));
}

#[tokio::test]
async fn test_refresh_token_reuse_rejected() {
    let identity = spawn_identity().await;

    let registered = rpc(
        identity.addr,
        methods::REGISTER,
        serde_json::json!({ "email": "b@x.com", "password": "Secret123!", "name": "Bo" }),
    )
    .await
    .result
    .unwrap();
    let refresh = registered["tokens"]["refresh_token"].as_str().unwrap();

    let rotated = rpc(
        identity.addr,
        methods::REFRESH,
        serde_json::json!({ "refresh_token": refresh }),
    )
    .await;
    assert!(rotated.result.is_some());

    let reused = rpc(
        identity.addr,
        methods::REFRESH,
        serde_json::json!({ "refresh_token": refresh }),
    )
    .await;
    assert_eq!(
        reused.error.unwrap().domain_error().unwrap().code,
        ErrorCode::InvalidRefreshToken
    );
}

#[tokio::test]
async fn test_identity_down_is_unavailable() {
    let identity = spawn_identity().await;
    let gateway = gateway_for(identity.addr);

    let registered = rpc(
        identity.addr,
        methods::REGISTER,
        serde_json::json!({ "email": "c@x.com", "password": "Secret123!", "name": "Cy" }),
    )
    .await
    .result
    .unwrap();
    let access = registered["tokens"]["access_token"].as_str().unwrap().to_string();

    identity.stop.send(()).unwrap();
    identity.handle.await.unwrap();

    let (status, body) = me(&gateway, &format!("Bearer {access}")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, serde_json::json!({ "error": "auth_unavailable" }));
}
