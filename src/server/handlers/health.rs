use crate::server::AppState;
use axum::{extract::State, response::Json};
use serde::Serialize;

use super::ApiResponse;

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// 调度器是否正在处理队列
    pub uploading: bool,
    /// 当前 WebSocket 订阅数
    pub subscribers: usize,
}

/// GET /health
pub async fn health_check(State(app_state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: app_state.started_at.elapsed().as_secs(),
        uploading: app_state.upload_manager.is_processing(),
        subscribers: app_state.events.subscriber_count(),
    }))
}
