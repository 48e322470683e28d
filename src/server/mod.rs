// Web服务器模块

pub mod events;
pub mod handlers;
pub mod state;
pub mod websocket;

pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// 按配置构建 CORS 层，包含 "*" 时允许任意来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("忽略无效的 CORS 来源: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

/// 构建完整路由
pub fn build_router(app_state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(cors_layer(&app_state.config.server.cors_origins));

    // API 路由
    let api_routes = Router::new()
        .route(
            "/uploads",
            post(handlers::create_uploads).get(handlers::get_all_uploads),
        )
        .route("/uploads/folder", post(handlers::create_folder_upload))
        .route("/uploads/stats", get(handlers::get_upload_stats))
        .route(
            "/uploads/clear/completed",
            post(handlers::clear_completed_uploads),
        )
        .route("/uploads/clear/failed", post(handlers::clear_failed_uploads))
        .route(
            "/uploads/:id",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        .route("/uploads/:id/cancel", post(handlers::cancel_upload))
        .route("/uploads/:id/retry", post(handlers::retry_upload))
        .route("/ws", get(websocket::handle_websocket));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health_check))
        .with_state(app_state)
        .layer(middleware)
}
