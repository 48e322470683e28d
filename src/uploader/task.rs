// 上传任务定义
//
// 状态机：
//   queued -> uploading -> {completed | failed | cancelled}
//   {failed, cancelled} -> queued（用户重试）
//   completed 为终态

use crate::uploader::source::UploadFile;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadItemStatus {
    /// 排队中
    Queued,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadItemStatus {
    /// 是否为终态（可从列表中清除）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadItemStatus::Completed | UploadItemStatus::Failed | UploadItemStatus::Cancelled
        )
    }

    /// 是否计入活跃数（排队或上传中）
    pub fn is_active(self) -> bool {
        matches!(self, UploadItemStatus::Queued | UploadItemStatus::Uploading)
    }

    /// 是否允许重试
    pub fn is_retryable(self) -> bool {
        matches!(self, UploadItemStatus::Failed | UploadItemStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadItemStatus::Queued => "queued",
            UploadItemStatus::Uploading => "uploading",
            UploadItemStatus::Completed => "completed",
            UploadItemStatus::Failed => "failed",
            UploadItemStatus::Cancelled => "cancelled",
        }
    }
}

/// 上传任务（队列中的一个文件）
#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    /// 任务ID（客户端生成，与内容无关）
    pub id: String,
    /// 文件句柄
    #[serde(skip)]
    pub file: UploadFile,
    /// 文件名
    pub file_name: String,
    /// 文件大小
    pub total_size: u64,
    /// 内容类型
    pub content_type: String,
    /// 文件夹上传时的相对路径，如 "photos/2024/a.jpg"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// 入队时调用方所在目录
    pub current_dir: String,
    /// 任务状态
    pub status: UploadItemStatus,
    /// 进度百分比 (0-100)
    pub progress: u8,
    /// 已上传字节数
    pub uploaded_size: u64,
    /// 错误信息（仅 failed / cancelled）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 远端 multipart 会话 ID（仅分片上传且初始化成功后设置）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_upload_id: Option<String>,
    /// 远端对象 key（与 remote_upload_id 同时设置）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
    /// 上传尝试次数（每次重试 +1）
    pub attempt: u32,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl UploadItem {
    /// 创建新的上传任务
    pub fn new(file: UploadFile, relative_path: Option<String>, current_dir: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file.name.clone(),
            total_size: file.size,
            content_type: file.content_type.clone(),
            file,
            relative_path,
            current_dir,
            status: UploadItemStatus::Queued,
            progress: 0,
            uploaded_size: 0,
            error: None,
            remote_upload_id: None,
            remote_key: None,
            attempt: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.status = UploadItemStatus::Uploading;
        self.started_at = Some(chrono::Utc::now().timestamp());
    }

    /// 更新进度
    ///
    /// 仅在 uploading 状态生效，进度单调不减
    pub fn update_progress(&mut self, uploaded_size: u64, progress: u8) -> bool {
        if self.status != UploadItemStatus::Uploading {
            return false;
        }
        let progress = progress.min(100);
        if progress < self.progress {
            return false;
        }
        self.progress = progress;
        self.uploaded_size = uploaded_size.max(self.uploaded_size);
        true
    }

    /// 记录远端 multipart 会话
    pub fn set_remote_session(&mut self, upload_id: String, key: String) {
        self.remote_upload_id = Some(upload_id);
        self.remote_key = Some(key);
    }

    /// 远端会话（key, upload_id），用于 abort
    pub fn remote_session(&self) -> Option<(String, String)> {
        match (&self.remote_key, &self.remote_upload_id) {
            (Some(key), Some(upload_id)) => Some((key.clone(), upload_id.clone())),
            _ => None,
        }
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.status = UploadItemStatus::Completed;
        self.progress = 100;
        self.uploaded_size = self.total_size;
        self.error = None;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadItemStatus::Failed;
        self.error = Some(error);
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self, reason: String) {
        self.status = UploadItemStatus::Cancelled;
        self.error = Some(reason);
    }

    /// 重置为排队状态（重试）
    ///
    /// 重试是一次全新的上传：清空进度、错误和远端会话
    pub fn reset_for_retry(&mut self) -> bool {
        if !self.status.is_retryable() {
            return false;
        }
        self.status = UploadItemStatus::Queued;
        self.progress = 0;
        self.uploaded_size = 0;
        self.error = None;
        self.remote_upload_id = None;
        self.remote_key = None;
        self.started_at = None;
        self.completed_at = None;
        self.attempt += 1;
        true
    }
}
