// 远端上传接口数据类型定义

use serde::{Deserialize, Serialize};

/// 初始化 multipart 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub key: String,
    pub content_type: String,
}

/// 初始化 multipart 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_id: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// 分片预签名请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPartRequest {
    pub key: String,
    pub upload_id: String,
    /// 分片编号（从 1 开始）
    pub part_number: u32,
}

/// 分片预签名响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignPartResponse {
    /// 有时效的分片上传地址
    pub url: String,
}

/// 已完成分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    #[serde(rename = "etag")]
    pub completion_tag: String,
}

/// 完成 multipart 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub key: String,
    pub upload_id: String,
    /// 按分片编号升序
    pub parts: Vec<CompletedPart>,
}

/// 中止 multipart 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub key: String,
    pub upload_id: String,
}

/// 上传完成后的对象元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

/// 远端错误响应体
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// 提取远端错误消息，优先 message
    pub fn into_message(self) -> Option<String> {
        self.message
            .filter(|m| !m.is_empty())
            .or(self.error.filter(|e| !e.is_empty()))
    }
}

/// 规范化完成标签：去除首尾引号和空白
///
/// 对象存储通常返回带引号的 ETag，如 `"9b2cf535f27731c974343645a3985328"`
pub fn normalize_etag(tag: &str) -> String {
    tag.trim_matches(|c: char| c == '"' || c.is_whitespace())
        .to_string()
}
