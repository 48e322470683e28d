// 上传错误分类
//
// - Network: 连接重置、超时等瞬时错误（不自动重试）
// - Authorization: 凭证过期或无效，调用方需要重新登录
// - RemoteRejected: 远端拒绝（对象不存在、会话无效等），携带远端消息
// - Cancelled: 取消信号触发，唯一会让任务进入 cancelled 状态的错误
// - Integrity: 分片响应缺少完成标签（ETag）

use thiserror::Error;

/// 上传错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// 网络错误（连接重置、超时）
    #[error("网络错误: {0}")]
    Network(String),

    /// 认证失败（不可重试）
    #[error("认证失败: {0}")]
    Authorization(String),

    /// 远端拒绝请求
    #[error("远端拒绝请求 (HTTP {status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// 操作已取消
    #[error("上传已取消")]
    Cancelled,

    /// 完整性错误（分片未返回完成标签）
    #[error("分片 #{part_number} 响应缺少 ETag")]
    Integrity { part_number: u32 },

    /// 本地文件读取失败
    #[error("读取本地文件失败: {0}")]
    Io(String),

    /// 远端响应格式错误
    #[error("解析远端响应失败: {0}")]
    InvalidResponse(String),
}

impl UploadError {
    /// 是否为取消错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// 是否为认证错误
    pub fn is_authorization(&self) -> bool {
        matches!(self, UploadError::Authorization(_))
    }

    /// 根据 HTTP 状态码构造错误
    ///
    /// 401/403 归类为认证错误，其余非 2xx 归类为远端拒绝
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => UploadError::Authorization(message),
            _ => UploadError::RemoteRejected { status, message },
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return UploadError::from_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() {
            return UploadError::InvalidResponse(e.to_string());
        }
        // 超时、连接失败、请求体发送失败均视为瞬时网络错误
        UploadError::Network(e.to_string())
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;
