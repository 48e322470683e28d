// 上传 API

use crate::server::AppState;
use crate::uploader::{PathUpload, QueueError, UploadItem, UploadStats};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use super::{error_codes, ApiResponse};

/// 单个上传文件
#[derive(Debug, Deserialize)]
pub struct UploadFileRequest {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件夹上传时的相对路径（`<文件夹>/<内部路径>`）
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// 批量上传请求
#[derive(Debug, Deserialize)]
pub struct CreateUploadsRequest {
    pub files: Vec<UploadFileRequest>,
    /// 当前浏览的远端目录
    pub current_dir: String,
}

/// 文件夹上传请求
#[derive(Debug, Deserialize)]
pub struct CreateFolderUploadRequest {
    pub local_folder: PathBuf,
    pub current_dir: String,
}

/// 批量创建响应
#[derive(Debug, Serialize)]
pub struct CreateUploadsResponse {
    pub task_ids: Vec<String>,
    /// 被跳过的文件数（无法读取）
    pub skipped: usize,
}

/// 清除响应
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

fn queue_error_response<T>(err: QueueError) -> Json<ApiResponse<T>> {
    let code = match err {
        QueueError::NotFound(_) => error_codes::TASK_NOT_FOUND,
        QueueError::InvalidState { .. } => error_codes::INVALID_TASK_STATE,
    };
    Json(ApiResponse::error(code, err.to_string()))
}

/// POST /api/v1/uploads
/// 批量创建上传任务
pub async fn create_uploads(
    State(app_state): State<AppState>,
    Json(req): Json<CreateUploadsRequest>,
) -> Json<ApiResponse<CreateUploadsResponse>> {
    if req.files.is_empty() {
        return Json(ApiResponse::error(
            error_codes::INVALID_REQUEST,
            "上传文件列表为空".to_string(),
        ));
    }

    let requested = req.files.len();
    let requests = req
        .files
        .into_iter()
        .map(|file| PathUpload {
            local_path: file.local_path,
            relative_path: file.relative_path,
            content_type: file.content_type,
        })
        .collect();

    let task_ids = app_state
        .upload_manager
        .enqueue_paths(requests, &req.current_dir)
        .await;
    let skipped = requested - task_ids.len();

    info!(
        "批量创建上传任务: 成功 {} 个, 跳过 {} 个, 目录={}",
        task_ids.len(),
        skipped,
        req.current_dir
    );

    Json(ApiResponse::success(CreateUploadsResponse { task_ids, skipped }))
}

/// POST /api/v1/uploads/folder
/// 扫描本地文件夹并创建上传任务
pub async fn create_folder_upload(
    State(app_state): State<AppState>,
    Json(req): Json<CreateFolderUploadRequest>,
) -> Json<ApiResponse<CreateUploadsResponse>> {
    match app_state
        .upload_manager
        .enqueue_folder(&req.local_folder, &req.current_dir)
        .await
    {
        Ok(task_ids) => {
            info!(
                "文件夹上传已入队: {:?} -> {}, {} 个文件",
                req.local_folder,
                req.current_dir,
                task_ids.len()
            );
            Json(ApiResponse::success(CreateUploadsResponse {
                task_ids,
                skipped: 0,
            }))
        }
        Err(e) => {
            warn!("文件夹上传失败: {:?}, 错误: {:#}", req.local_folder, e);
            Json(ApiResponse::error(
                error_codes::FOLDER_SCAN_FAILED,
                format!("{:#}", e),
            ))
        }
    }
}

/// GET /api/v1/uploads
/// 获取所有上传任务（入队顺序）
pub async fn get_all_uploads(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<Vec<UploadItem>>> {
    Json(ApiResponse::success(app_state.upload_manager.get_all()))
}

/// GET /api/v1/uploads/stats
pub async fn get_upload_stats(State(app_state): State<AppState>) -> Json<ApiResponse<UploadStats>> {
    Json(ApiResponse::success(app_state.upload_manager.stats()))
}

/// GET /api/v1/uploads/:id
pub async fn get_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<UploadItem>>, StatusCode> {
    match app_state.upload_manager.get(&task_id) {
        Some(item) => Ok(Json(ApiResponse::success(item))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// POST /api/v1/uploads/:id/cancel
pub async fn cancel_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<ApiResponse<String>> {
    match app_state.upload_manager.cancel(&task_id) {
        Ok(()) => Json(ApiResponse::success("已取消".to_string())),
        Err(e) => {
            warn!("取消上传任务失败: {}", e);
            queue_error_response(e)
        }
    }
}

/// POST /api/v1/uploads/:id/retry
pub async fn retry_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<ApiResponse<String>> {
    match app_state.upload_manager.retry(&task_id) {
        Ok(()) => Json(ApiResponse::success("已重新入队".to_string())),
        Err(e) => {
            warn!("重试上传任务失败: {}", e);
            queue_error_response(e)
        }
    }
}

/// DELETE /api/v1/uploads/:id
/// 移除单个任务（仅终态）
pub async fn delete_upload(
    State(app_state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<ApiResponse<String>> {
    match app_state.upload_manager.remove(&task_id) {
        Ok(()) => Json(ApiResponse::success("已移除".to_string())),
        Err(e) => queue_error_response(e),
    }
}

/// POST /api/v1/uploads/clear/completed
pub async fn clear_completed_uploads(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<ClearResponse>> {
    let cleared = app_state.upload_manager.clear_completed();
    Json(ApiResponse::success(ClearResponse { cleared }))
}

/// POST /api/v1/uploads/clear/failed
pub async fn clear_failed_uploads(
    State(app_state): State<AppState>,
) -> Json<ApiResponse<ClearResponse>> {
    let cleared = app_state.upload_manager.clear_failed();
    Json(ApiResponse::success(ClearResponse { cleared }))
}
