use anyhow::Context;
use s3_file_manager::{config::AppConfig, logging, server, AppState};
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志系统初始化前读取配置，加载失败的原因在日志就绪后再输出
    let loaded = AppConfig::load_from_file(CONFIG_PATH).await;
    let log_config = loaded
        .as_ref()
        .map(|config| config.log.clone())
        .unwrap_or_default();

    // 🔥 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&log_config);

    info!("S3 File Manager v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            info!("配置文件不可用 ({:#})，使用默认配置", e);
            AppConfig::load_or_default(CONFIG_PATH).await
        }
    };
    config.validate().context("配置校验失败")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        "远端地址: {}, key 前缀: {:?}",
        config.remote.base_url, config.remote.key_prefix
    );

    let app_state = AppState::new(config)?;
    info!("应用状态初始化完成");

    let app = server::build_router(app_state.clone());

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api/v1", addr);
    info!("WebSocket: ws://{}/api/v1/ws", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址失败: {}", addr))?;

    // 使用 select! 监听关闭信号
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    // 中止进行中的上传，让调度器有机会通知远端放弃 multipart 会话
    app_state.upload_manager.shutdown();
    if tokio::time::timeout(
        std::time::Duration::from_secs(5),
        app_state.upload_manager.wait_idle(),
    )
    .await
    .is_err()
    {
        warn!("等待上传任务退出超时，远端 multipart 会话可能未被中止");
    }
    info!("应用已安全退出");

    Ok(())
}
