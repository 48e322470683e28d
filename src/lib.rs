// S3 File Manager
// 浏览器对象存储文件管理器的上传编排核心库

// 认证模块
pub mod auth;

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// 远端上传接口
pub mod remote;

// Web服务器模块
pub mod server;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use auth::{AuthSession, Credential, CredentialProvider, StaticCredentials};
pub use config::AppConfig;
pub use remote::{HttpRemoteStore, KeyNamespace, PrefixNamespace, RemoteStore};
pub use server::AppState;
pub use uploader::{
    UploadEngine, UploadError, UploadItem, UploadItemStatus, UploadManager, UploadStats,
};
