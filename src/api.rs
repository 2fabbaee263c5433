//! ==============================================================================
//! api.rs - read api web server
//! ==============================================================================
//!
//! routes:
//!     GET /api/live_readings   latest reading
//!     GET /api/statistics      minute samples, oldest first (?limit=N)
//!     GET /api/dashboard       latest reading + chart/table views
//!     GET /api/health          active device sessions, store status
//!
//! handlers are thin: they call into stats.rs on the blocking pool and map
//! the result to json.
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::ApiError;
use crate::registry::ConnectionRegistry;
use crate::stats::{LiveReading, ReadApi, MSG_NO_READINGS};

#[derive(Clone)]
pub struct ApiState {
    pub read_api: ReadApi,
    pub registry: Arc<ConnectionRegistry>,
    /// ingestion address shown on the dashboard
    pub device_endpoint: SocketAddr,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::StoreUnavailable => json!({ "error": self.to_string() }),
            ApiError::Store(e) => {
                error!(error = %e, "read api store failure");
                json!({ "error": "Failed to fetch readings" })
            }
            ApiError::Internal(reason) => {
                error!(%reason, "read api internal failure");
                json!({ "error": "Internal error" })
            }
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/live_readings", get(live_readings_handler))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "read api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// run a store-backed read on the blocking pool
async fn blocking<T, F>(read_api: ReadApi, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ReadApi) -> Result<T, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&read_api)).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "read api task failed");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

async fn live_readings_handler(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let live = blocking(state.read_api, |api| api.get_live_reading()).await?;
    Ok(match live {
        LiveReading::Latest(reading) => Json(reading).into_response(),
        LiveReading::NoReadings => Json(json!({ "message": MSG_NO_READINGS })).into_response(),
    })
}

#[derive(Deserialize)]
struct StatisticsParams {
    limit: Option<usize>,
}

async fn statistics_handler(
    State(state): State<ApiState>,
    Query(params): Query<StatisticsParams>,
) -> Result<Response, ApiError> {
    let report = blocking(state.read_api, move |api| api.get_statistics(params.limit)).await?;
    Ok(Json(report).into_response())
}

async fn dashboard_handler(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let endpoint = state.device_endpoint;
    let snapshot = blocking(state.read_api, move |api| api.dashboard(endpoint)).await?;
    Ok(Json(snapshot).into_response())
}

async fn health_handler(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_connections": state.registry.current(),
        "store_connected": state.read_api.store_connected(),
    }))
}
