//! 网关路由

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::proxy::UpstreamProxy;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<UpstreamProxy>,
    pub metrics: Option<PrometheusHandle>,
}

/// 本地端点 + 其余请求转发上游
pub fn gateway_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .fallback(forward_upstream)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn forward_upstream(State(state): State<AppState>, request: Request) -> Response {
    state.proxy.forward(request).await
}
