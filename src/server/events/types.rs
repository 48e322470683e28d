//! WebSocket 事件类型定义
//!
//! 上传队列的所有事件，用于 WebSocket 实时推送

use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、删除等关键事件
    High = 2,
}

/// 上传任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 任务创建
    Created {
        task_id: String,
        file_name: String,
        total_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relative_path: Option<String>,
    },
    /// 状态变更
    StatusChanged {
        task_id: String,
        old_status: String,
        new_status: String,
    },
    /// 进度更新
    Progress {
        task_id: String,
        uploaded_size: u64,
        total_size: u64,
        progress: u8,
    },
    /// 任务完成
    Completed {
        task_id: String,
        key: String,
        completed_at: i64,
    },
    /// 任务失败
    Failed {
        task_id: String,
        error: String,
        /// 认证失败，前端应跳转重新登录
        #[serde(default)]
        auth_required: bool,
    },
    /// 任务取消
    Cancelled { task_id: String },
    /// 任务重试（重新入队）
    Retried { task_id: String, attempt: u32 },
    /// 任务从列表中清除
    Cleared { task_ids: Vec<String> },
    /// 队列处理完毕，文件列表缓存失效
    ListingInvalidated { directories: Vec<String> },
}

impl UploadEvent {
    /// 获取任务 ID（队列级事件返回 None）
    pub fn task_id(&self) -> Option<&str> {
        match self {
            UploadEvent::Created { task_id, .. }
            | UploadEvent::StatusChanged { task_id, .. }
            | UploadEvent::Progress { task_id, .. }
            | UploadEvent::Completed { task_id, .. }
            | UploadEvent::Failed { task_id, .. }
            | UploadEvent::Cancelled { task_id }
            | UploadEvent::Retried { task_id, .. } => Some(task_id),
            UploadEvent::Cleared { .. } | UploadEvent::ListingInvalidated { .. } => None,
        }
    }

    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            UploadEvent::Progress { .. } => EventPriority::Low,
            UploadEvent::StatusChanged { .. } | UploadEvent::ListingInvalidated { .. } => {
                EventPriority::Medium
            }
            UploadEvent::Created { .. }
            | UploadEvent::Completed { .. }
            | UploadEvent::Failed { .. }
            | UploadEvent::Cancelled { .. }
            | UploadEvent::Retried { .. }
            | UploadEvent::Cleared { .. } => EventPriority::High,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Created { .. } => "created",
            UploadEvent::StatusChanged { .. } => "status_changed",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::Failed { .. } => "failed",
            UploadEvent::Cancelled { .. } => "cancelled",
            UploadEvent::Retried { .. } => "retried",
            UploadEvent::Cleared { .. } => "cleared",
            UploadEvent::ListingInvalidated { .. } => "listing_invalidated",
        }
    }
}

/// 带时间戳和序号的事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    /// 事件序号（单调递增）
    pub event_id: u64,
    /// 时间戳（毫秒）
    pub timestamp: i64,
    /// 事件内容
    #[serde(flatten)]
    pub event: UploadEvent,
}

impl TimestampedEvent {
    pub fn new(event_id: u64, event: UploadEvent) -> Self {
        Self {
            event_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = UploadEvent::Progress {
            task_id: "t1".to_string(),
            uploaded_size: 512,
            total_size: 1024,
            progress: 50,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "progress");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["progress"], 50);
    }

    #[test]
    fn test_timestamped_event_flattens() {
        let event = TimestampedEvent::new(
            7,
            UploadEvent::ListingInvalidated {
                directories: vec!["/docs".to_string()],
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_id"], 7);
        assert_eq!(json["event_type"], "listing_invalidated");
        assert_eq!(json["directories"][0], "/docs");

        let back: TimestampedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.event, event.event);
    }

    #[test]
    fn test_priority_and_task_id() {
        let failed = UploadEvent::Failed {
            task_id: "t1".to_string(),
            error: "x".to_string(),
            auth_required: false,
        };
        assert_eq!(failed.priority(), EventPriority::High);
        assert_eq!(failed.task_id(), Some("t1"));
        assert_eq!(failed.event_type_name(), "failed");

        let cleared = UploadEvent::Cleared { task_ids: vec![] };
        assert_eq!(cleared.task_id(), None);
    }
}
