// 上传管理器
//
// 队列的对外接口：批量入队、取消、重试、清除、查询
// 实际传输由 UploadScheduler 顺序驱动

use crate::auth::AuthSession;
use crate::remote::client::RemoteStore;
use crate::remote::namespace::KeyNamespace;
use crate::server::events::{EventBus, TimestampedEvent, UploadEvent};
use crate::uploader::engine::UploadEngine;
use crate::uploader::folder::{FolderScanner, ScanOptions};
use crate::uploader::progress::UploadStats;
use crate::uploader::scheduler::{
    EventListingRefresher, ListingRefresher, QueueState, UploadScheduler,
};
use crate::uploader::source::UploadFile;
use crate::uploader::strategy::TransferLimits;
use crate::uploader::task::{UploadItem, UploadItemStatus};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 默认内容类型
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 队列操作错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("任务不存在: {0}")]
    NotFound(String),
    #[error("任务状态为 {status}，不允许{action}")]
    InvalidState {
        action: &'static str,
        status: &'static str,
    },
}

/// 待入队的文件
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file: UploadFile,
    /// 文件夹上传时的相对路径
    pub relative_path: Option<String>,
}

impl NewUpload {
    pub fn new(file: UploadFile) -> Self {
        Self {
            file,
            relative_path: None,
        }
    }

    pub fn with_relative_path(file: UploadFile, relative_path: impl Into<String>) -> Self {
        Self {
            file,
            relative_path: Some(relative_path.into()),
        }
    }
}

/// 按本地路径入队的请求
#[derive(Debug, Clone)]
pub struct PathUpload {
    pub local_path: PathBuf,
    pub relative_path: Option<String>,
    pub content_type: Option<String>,
}

/// 上传管理器
pub struct UploadManager {
    queue: Arc<QueueState>,
    scheduler: Arc<UploadScheduler>,
    events: Arc<EventBus>,
    scan_options: ScanOptions,
    default_content_type: String,
}

impl UploadManager {
    /// 创建上传管理器（队列排空时通过事件总线通知刷新列表）
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<AuthSession>,
        namespace: Arc<dyn KeyNamespace>,
        limits: TransferLimits,
        events: Arc<EventBus>,
    ) -> Self {
        let refresher = Arc::new(EventListingRefresher::new(Arc::clone(&events)));
        Self::new_with_refresher(remote, auth, namespace, limits, events, refresher)
    }

    /// 创建上传管理器（自定义列表刷新协作方）
    pub fn new_with_refresher(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<AuthSession>,
        namespace: Arc<dyn KeyNamespace>,
        limits: TransferLimits,
        events: Arc<EventBus>,
        refresher: Arc<dyn ListingRefresher>,
    ) -> Self {
        info!(
            "创建上传管理器: part_size={}, chunk_threshold={}, max_concurrent_parts={}",
            limits.part_size, limits.chunk_threshold, limits.max_concurrent_parts
        );

        let queue = Arc::new(QueueState::new());
        let engine = Arc::new(UploadEngine::new(remote, limits));
        let scheduler = Arc::new(UploadScheduler::new(
            Arc::clone(&queue),
            engine,
            auth,
            namespace,
            refresher,
            Arc::clone(&events),
        ));

        Self {
            queue,
            scheduler,
            events,
            scan_options: ScanOptions::default(),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn with_scan_options(mut self, scan_options: ScanOptions) -> Self {
        self.scan_options = scan_options;
        self
    }

    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// 批量入队
    ///
    /// 新任务追加到队尾；调度器空闲时立即开始处理
    pub fn enqueue_batch(&self, uploads: Vec<NewUpload>, current_dir: &str) -> Vec<String> {
        if uploads.is_empty() {
            return Vec::new();
        }

        let items: Vec<UploadItem> = uploads
            .into_iter()
            .map(|upload| UploadItem::new(upload.file, upload.relative_path, current_dir.to_string()))
            .collect();

        let created: Vec<UploadEvent> = items
            .iter()
            .map(|item| UploadEvent::Created {
                task_id: item.id.clone(),
                file_name: item.file_name.clone(),
                total_size: item.total_size,
                relative_path: item.relative_path.clone(),
            })
            .collect();
        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();

        self.queue.items.write().extend(items);
        info!("批量入队: {} 个文件, 目录={}", ids.len(), current_dir);

        for event in created {
            self.events.publish(event);
        }
        self.scheduler.kick();

        ids
    }

    /// 按本地路径批量入队
    ///
    /// 无法读取的文件跳过并记录警告
    pub async fn enqueue_paths(&self, requests: Vec<PathUpload>, current_dir: &str) -> Vec<String> {
        let mut uploads = Vec::with_capacity(requests.len());

        for request in requests {
            let content_type = request
                .content_type
                .unwrap_or_else(|| self.default_content_type.clone());
            match UploadFile::from_path(&request.local_path, content_type).await {
                Ok(file) => uploads.push(NewUpload {
                    file,
                    relative_path: request.relative_path,
                }),
                Err(e) => warn!("创建上传任务失败: {:?}, 错误: {:#}", request.local_path, e),
            }
        }

        self.enqueue_batch(uploads, current_dir)
    }

    /// 扫描本地文件夹并入队
    ///
    /// 每个文件的相对路径以文件夹名开头，上传后保留目录结构
    pub async fn enqueue_folder(&self, local_folder: &Path, current_dir: &str) -> anyhow::Result<Vec<String>> {
        let scanner = FolderScanner::with_options(self.scan_options.clone());
        let root = local_folder.to_path_buf();
        let scanned = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .context("文件夹扫描任务异常")??;

        if scanned.is_empty() {
            warn!("文件夹为空: {}", local_folder.display());
            return Ok(Vec::new());
        }

        let requests = scanned
            .into_iter()
            .map(|file| PathUpload {
                local_path: file.local_path,
                relative_path: Some(file.relative_path),
                content_type: None,
            })
            .collect();

        Ok(self.enqueue_paths(requests, current_dir).await)
    }

    /// 取消任务
    ///
    /// queued 任务直接翻转为 cancelled（远端会话尚不存在）；
    /// uploading 任务立即翻转并触发取消令牌，由调度器负责中止远端会话
    pub fn cancel(&self, id: &str) -> Result<(), QueueError> {
        let old_status = self
            .queue
            .with_item(id, |item| {
                let old_status = item.status;
                match old_status {
                    UploadItemStatus::Queued | UploadItemStatus::Uploading => {
                        item.mark_cancelled("上传已取消".to_string());
                        if let Some(token) = self.queue.cancel_tokens.get(id) {
                            token.cancel();
                        }
                        Ok(old_status)
                    }
                    status => Err(QueueError::InvalidState {
                        action: "取消",
                        status: status.as_str(),
                    }),
                }
            })
            .ok_or_else(|| QueueError::NotFound(id.to_string()))??;

        info!("取消上传任务: id={}, 原状态={}", id, old_status.as_str());

        self.events.publish(UploadEvent::StatusChanged {
            task_id: id.to_string(),
            old_status: old_status.as_str().to_string(),
            new_status: UploadItemStatus::Cancelled.as_str().to_string(),
        });
        self.events.publish(UploadEvent::Cancelled {
            task_id: id.to_string(),
        });
        Ok(())
    }

    /// 重试失败或已取消的任务
    ///
    /// 进度和错误清零，重新入队；分片上传会重新 initiate
    pub fn retry(&self, id: &str) -> Result<(), QueueError> {
        let (old_status, attempt) = self
            .queue
            .with_item(id, |item| {
                let old_status = item.status;
                if item.reset_for_retry() {
                    Ok((old_status, item.attempt))
                } else {
                    Err(QueueError::InvalidState {
                        action: "重试",
                        status: old_status.as_str(),
                    })
                }
            })
            .ok_or_else(|| QueueError::NotFound(id.to_string()))??;

        info!("重试上传任务: id={}, attempt={}", id, attempt);

        self.events.publish(UploadEvent::StatusChanged {
            task_id: id.to_string(),
            old_status: old_status.as_str().to_string(),
            new_status: UploadItemStatus::Queued.as_str().to_string(),
        });
        self.events.publish(UploadEvent::Retried {
            task_id: id.to_string(),
            attempt,
        });
        self.scheduler.kick();
        Ok(())
    }

    /// 清除所有已完成任务
    pub fn clear_completed(&self) -> usize {
        self.clear_where(|status| status == UploadItemStatus::Completed)
    }

    /// 清除所有失败任务
    pub fn clear_failed(&self) -> usize {
        self.clear_where(|status| status == UploadItemStatus::Failed)
    }

    fn clear_where(&self, predicate: impl Fn(UploadItemStatus) -> bool) -> usize {
        let removed: Vec<String> = {
            let mut items = self.queue.items.write();
            let removed = items
                .iter()
                .filter(|item| item.status.is_terminal() && predicate(item.status))
                .map(|item| item.id.clone())
                .collect();
            items.retain(|item| !(item.status.is_terminal() && predicate(item.status)));
            removed
        };

        if !removed.is_empty() {
            info!("清除 {} 个任务", removed.len());
            let count = removed.len();
            self.events.publish(UploadEvent::Cleared { task_ids: removed });
            return count;
        }
        0
    }

    /// 移除单个任务（仅终态）
    pub fn remove(&self, id: &str) -> Result<(), QueueError> {
        {
            let mut items = self.queue.items.write();
            let index = items
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            let status = items[index].status;
            if !status.is_terminal() {
                return Err(QueueError::InvalidState {
                    action: "移除",
                    status: status.as_str(),
                });
            }
            items.remove(index);
        }

        info!("移除上传任务: id={}", id);
        self.events.publish(UploadEvent::Cleared {
            task_ids: vec![id.to_string()],
        });
        Ok(())
    }

    /// 获取任务
    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.queue
            .items
            .read()
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// 获取所有任务（入队顺序）
    pub fn get_all(&self) -> Vec<UploadItem> {
        self.queue.items.read().clone()
    }

    /// 队列统计
    pub fn stats(&self) -> UploadStats {
        UploadStats::from_items(&self.queue.items.read())
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.scheduler.is_processing()
    }

    /// 等待队列处理完毕
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// 进程退出前取消所有上传中的任务
    pub fn shutdown(&self) {
        info!("关闭上传管理器，取消进行中的上传");
        self.scheduler.cancel_all();
    }
}
