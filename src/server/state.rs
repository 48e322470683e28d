// 应用状态

use crate::auth::{AuthSession, StaticCredentials};
use crate::config::AppConfig;
use crate::remote::{HttpRemoteStore, PrefixNamespace};
use crate::server::events::EventBus;
use crate::uploader::UploadManager;
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
    /// 上传管理器
    pub upload_manager: Arc<UploadManager>,
    /// 事件总线
    pub events: Arc<EventBus>,
    /// 启动时间
    pub started_at: Instant,
}

impl AppState {
    /// 按配置组装上传链路
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let credentials = Arc::new(StaticCredentials::new(config.auth.credential()));
        let auth = Arc::new(AuthSession::new(
            credentials,
            config.upload.token_refresh_window_secs,
        ));

        let remote = Arc::new(
            HttpRemoteStore::new(
                &config.remote.base_url,
                Arc::clone(&auth),
                config.remote.request_timeout_secs,
            )
            .context("创建远端客户端失败")?,
        );
        let namespace = Arc::new(PrefixNamespace::new(config.remote.key_prefix.clone()));
        let events = Arc::new(EventBus::default());

        let upload_manager = UploadManager::new(
            remote,
            auth,
            namespace,
            config.upload.limits(),
            Arc::clone(&events),
        )
        .with_scan_options(config.upload.scan_options())
        .with_default_content_type(config.upload.default_content_type.clone());

        Ok(Self {
            config: Arc::new(config),
            upload_manager: Arc::new(upload_manager),
            events,
            started_at: Instant::now(),
        })
    }
}
