use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use vmimport_vcenter::{
    InventoryNode, InventoryService, TraversalControl, VcenterCredentials, VcenterError,
    VcenterErrorKind,
};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct ApiService {
    pub inventory_service: InventoryService,
    pub inventory_timeout: Duration,
}

impl ApiService {
    pub fn new(inventory_service: InventoryService, inventory_timeout: Duration) -> Self {
        Self {
            inventory_service,
            inventory_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            InventoryService::new(config.session_options()).with_mock_data(config.use_mock_data),
            config.inventory_timeout(),
        )
    }

    pub async fn start_server(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("REST API server listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_check))
            // vCenter
            .route("/api/v1/vcenter/inventory", post(fetch_inventory))
            .with_state(self)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vmimport-ui API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Error body returned by every failing endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<VcenterError> for ApiError {
    fn from(e: VcenterError) -> Self {
        let status = match e.kind {
            VcenterErrorKind::Cancelled | VcenterErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            VcenterErrorKind::ConnectionError
            | VcenterErrorKind::NoDatacenter
            | VcenterErrorKind::PropertyRetrieval
            | VcenterErrorKind::PoolResolution
            | VcenterErrorKind::ParseError => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

// vCenter handlers
async fn fetch_inventory(
    State(services): State<Arc<ApiService>>,
    payload: Result<Json<VcenterCredentials>, JsonRejection>,
) -> Result<Json<InventoryNode>, ApiError> {
    let Json(credentials) = payload?;
    let control = TraversalControl::new().with_timeout(services.inventory_timeout);

    match services
        .inventory_service
        .fetch_inventory(&credentials, control)
        .await
    {
        Ok(tree) => Ok(Json(tree)),
        Err(e) => {
            tracing::error!("Inventory request for {} failed: {}", credentials.endpoint, e);
            Err(e.into())
        }
    }
}
