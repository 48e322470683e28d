// API处理器模块

pub mod health;
pub mod upload;

use serde::Serialize;

pub use health::*;
pub use upload::*;

/// 业务错误码
pub mod error_codes {
    /// 请求参数无效
    pub const INVALID_REQUEST: i32 = 1001;
    /// 任务不存在
    pub const TASK_NOT_FOUND: i32 = 2001;
    /// 当前状态不允许该操作
    pub const INVALID_TASK_STATE: i32 = 2002;
    /// 本地文件夹扫描失败
    pub const FOLDER_SCAN_FAILED: i32 = 2003;
}

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 状态码 (0: 成功, 其他: 错误码)
    pub code: i32,
    /// 消息
    pub message: String,
    /// 数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
        }
    }
}
