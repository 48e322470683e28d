// 配置管理模块

use crate::auth::Credential;
use crate::uploader::folder::ScanOptions;
use crate::uploader::manager::DEFAULT_CONTENT_TYPE;
use crate::uploader::strategy::{
    TransferLimits, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_CONCURRENT_PARTS, DEFAULT_PART_SIZE,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 远端上传接口配置
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 认证配置
    #[serde(default)]
    pub auth: AuthConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// CORS允许的源
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18888,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// 远端上传接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 应用服务器地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 单个请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 对象 key 前缀（账户命名空间）
    #[serde(default)]
    pub key_prefix: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            key_prefix: String::new(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小（字节）
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    /// 超过此大小使用分片上传（字节）
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    /// 单文件最大并发分片数
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,
    /// 凭证过期前多少秒主动刷新
    #[serde(default = "default_token_refresh_window_secs")]
    pub token_refresh_window_secs: u64,
    /// 未声明内容类型时使用
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
    /// 上传文件夹时是否跳过隐藏文件（以.开头的文件/文件夹）
    #[serde(default)]
    pub skip_hidden_files: bool,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_chunk_threshold() -> u64 {
    DEFAULT_CHUNK_THRESHOLD
}

fn default_max_concurrent_parts() -> usize {
    DEFAULT_MAX_CONCURRENT_PARTS
}

fn default_token_refresh_window_secs() -> u64 {
    60
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            chunk_threshold: default_chunk_threshold(),
            max_concurrent_parts: default_max_concurrent_parts(),
            token_refresh_window_secs: default_token_refresh_window_secs(),
            default_content_type: default_content_type(),
            skip_hidden_files: false,
        }
    }
}

impl UploadConfig {
    /// 验证上传参数
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            anyhow::bail!("分片大小不能为 0");
        }
        if self.max_concurrent_parts == 0 {
            anyhow::bail!("最大并发分片数不能为 0");
        }
        if self.chunk_threshold < self.part_size {
            anyhow::bail!(
                "分片上传阈值 ({}) 不能小于分片大小 ({})",
                self.chunk_threshold,
                self.part_size
            );
        }
        Ok(())
    }

    pub fn limits(&self) -> TransferLimits {
        TransferLimits {
            part_size: self.part_size,
            chunk_threshold: self.chunk_threshold,
            max_concurrent_parts: self.max_concurrent_parts,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            skip_hidden: self.skip_hidden_files,
            ..Default::default()
        }
    }
}

/// 认证配置（内置固定凭证）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer 令牌
    #[serde(default)]
    pub token: String,
    /// 过期时间
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthConfig {
    pub fn credential(&self) -> Credential {
        Credential::new(self.token.clone(), self.expires_at)
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.remote.base_url.trim().is_empty() {
            anyhow::bail!("远端地址 remote.base_url 不能为空");
        }
        self.upload.validate().context("上传配置无效")
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 配置文件不存在时写入默认配置；存在但无效时保留原文件
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
