//! Gateway server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use keyward_core::GatewayConfig;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::GatewayError;
use crate::client::{IdentityClient, TokenValidator};
use crate::middleware::{AuthContext, AuthState, request_id, require_auth};

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    auth: AuthState,
    ready: Arc<AtomicBool>,
}

/// Builder for constructing a Gateway with its dependencies.
#[derive(Default)]
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    validator: Option<Arc<dyn TokenValidator>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific token validator instead of the HTTP identity client.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the identity client
    /// cannot be created.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let validator: Arc<dyn TokenValidator> = match self.validator {
            Some(validator) => validator,
            None => Arc::new(IdentityClient::new(
                &config.identity_url,
                config.connect_timeout(),
            )?),
        };

        Ok(Gateway {
            auth: AuthState::new(validator, config.auth_timeout()),
            config,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Gateway {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build the router.
    ///
    /// `/healthz` and `/readyz` are public; everything under `/v1` requires a
    /// bearer token.
    #[must_use]
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/v1/me", get(me_handler))
            .route_layer(middleware::from_fn_with_state(self.auth.clone(), require_auth));

        Router::new()
            .route("/healthz", get(health_handler))
            .route("/readyz", get(ready_handler))
            .with_state(self.ready.clone())
            .merge(protected)
            .layer(middleware::from_fn(request_id))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the server fails.
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            identity_url = %self.config.identity_url,
            "Gateway listening on http://{}",
            addr
        );
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Readiness flips to not-ready as soon as shutdown begins.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ready = self.ready.clone();
        let signal = async move {
            shutdown.await;
            ready.store(false, Ordering::SeqCst);
            tracing::info!("Gateway shutting down");
        };

        let app = self.router();
        self.ready.store(true, Ordering::SeqCst);

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ready_handler(State(ready): State<Arc<AtomicBool>>) -> impl IntoResponse {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready" })),
        )
    }
}

async fn me_handler(auth: AuthContext) -> Json<AuthContext> {
    Json(auth)
}
