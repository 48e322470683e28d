// 上传调度器
//
// 单飞（single-flight）顺序调度：
// - 同一时刻最多一个任务处于 uploading，由 processing 标志保证
// - 总是取最早入队的 queued 任务，翻转为 uploading 后先让出一次执行权
// - 单个任务内部的分片并发由 UploadEngine 负责
// - 队列排空后通知文件列表刷新
//
// 任务状态只在短暂持锁的临界区内修改，不跨 await 持锁

use crate::auth::AuthSession;
use crate::remote::namespace::KeyNamespace;
use crate::server::events::{EventBus, ProgressThrottler, UploadEvent};
use crate::uploader::chunk::percent;
use crate::uploader::engine::{TransferObserver, UploadEngine};
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::folder::{join_remote_path, resolve_destination_dir};
use crate::uploader::source::UploadFile;
use crate::uploader::task::{UploadItem, UploadItemStatus};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 文件列表刷新协作方
pub trait ListingRefresher: Send + Sync {
    /// 队列排空后调用，directories 为本轮涉及的目标目录
    fn invalidate(&self, directories: &[String]);
}

/// 通过事件总线通知前端刷新文件列表
pub struct EventListingRefresher {
    events: Arc<EventBus>,
}

impl EventListingRefresher {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }
}

impl ListingRefresher for EventListingRefresher {
    fn invalidate(&self, directories: &[String]) {
        self.events.publish(UploadEvent::ListingInvalidated {
            directories: directories.to_vec(),
        });
    }
}

/// 队列共享状态（调度器与管理器共用）
#[derive(Default)]
pub struct QueueState {
    /// 所有任务，按入队顺序
    pub(crate) items: RwLock<Vec<UploadItem>>,
    /// 上传中任务的取消令牌
    pub(crate) cancel_tokens: DashMap<String, CancellationToken>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在写锁内修改指定任务
    pub(crate) fn with_item<R>(&self, id: &str, f: impl FnOnce(&mut UploadItem) -> R) -> Option<R> {
        let mut items = self.items.write();
        items.iter_mut().find(|item| item.id == id).map(f)
    }

    pub fn has_queued(&self) -> bool {
        self.items
            .read()
            .iter()
            .any(|item| item.status == UploadItemStatus::Queued)
    }
}

/// 已出队、待传输的任务
struct UploadJob {
    id: String,
    attempt: u32,
    file: UploadFile,
    key: String,
    destination_dir: String,
    token: CancellationToken,
}

/// 单个任务的传输观察者：把进度和远端会话写回任务
struct ItemObserver {
    queue: Arc<QueueState>,
    events: Arc<EventBus>,
    id: String,
    attempt: u32,
    throttler: ProgressThrottler,
    /// 远端会话（key, upload_id），任务被重试清空后仍用于 abort
    session: Mutex<Option<(String, String)>>,
}

impl ItemObserver {
    fn session(&self) -> Option<(String, String)> {
        self.session.lock().clone()
    }
}

impl TransferObserver for ItemObserver {
    fn session_started(&self, key: &str, upload_id: &str) {
        *self.session.lock() = Some((key.to_string(), upload_id.to_string()));
        self.queue.with_item(&self.id, |item| {
            // 取消可能在 initiate 返回前生效，会话仍需记录在本次尝试上
            if item.attempt == self.attempt {
                item.set_remote_session(upload_id.to_string(), key.to_string());
            }
        });
    }

    fn bytes_transferred(&self, uploaded: u64, total: u64) {
        let pct = percent(uploaded, total);
        let updated = self
            .queue
            .with_item(&self.id, |item| {
                item.attempt == self.attempt && item.update_progress(uploaded, pct)
            })
            .unwrap_or(false);

        if !updated {
            return;
        }

        let emit = if pct >= 100 {
            self.throttler.force_emit()
        } else {
            self.throttler.should_emit()
        };
        if emit {
            self.events.publish(UploadEvent::Progress {
                task_id: self.id.clone(),
                uploaded_size: uploaded,
                total_size: total,
                progress: pct,
            });
        }
    }
}

/// 上传调度器
pub struct UploadScheduler {
    queue: Arc<QueueState>,
    engine: Arc<UploadEngine>,
    auth: Arc<AuthSession>,
    namespace: Arc<dyn KeyNamespace>,
    refresher: Arc<dyn ListingRefresher>,
    events: Arc<EventBus>,
    /// 是否正在处理队列
    processing: AtomicBool,
    /// 进程退出中，不再取新任务
    stopped: AtomicBool,
    /// 队列排空时通知
    idle: Notify,
}

impl UploadScheduler {
    pub fn new(
        queue: Arc<QueueState>,
        engine: Arc<UploadEngine>,
        auth: Arc<AuthSession>,
        namespace: Arc<dyn KeyNamespace>,
        refresher: Arc<dyn ListingRefresher>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            queue,
            engine,
            auth,
            namespace,
            refresher,
            events,
            processing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// 启动调度（空闲时立即开始，忙碌时直接返回）
    pub fn kick(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("调度器已停止，新任务保持排队");
            return;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("调度器忙碌，新任务等待处理");
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run().await;
        });
    }

    /// 等待队列处理完毕
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = self.stopped.load(Ordering::SeqCst) || !self.queue.has_queued();
            if !self.is_processing() && drained {
                return;
            }
            notified.await;
        }
    }

    /// 调度循环
    async fn run(self: Arc<Self>) {
        info!("上传调度器启动");

        loop {
            let mut directories = BTreeSet::new();

            while let Some(job) = self.next_job() {
                directories.insert(job.destination_dir.clone());
                // 让出一次，让前端先观察到 uploading
                tokio::task::yield_now().await;
                self.process(job).await;
            }

            if !directories.is_empty() {
                let directories: Vec<String> = directories.into_iter().collect();
                info!("上传队列已排空，刷新文件列表: {:?}", directories);
                self.refresher.invalidate(&directories);
            }

            self.processing.store(false, Ordering::SeqCst);

            // 清除标志后再检查一次：入队发生在标志清除之前时 kick 会直接返回
            if self.stopped.load(Ordering::SeqCst)
                || !self.queue.has_queued()
                || self
                    .processing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }

        self.idle.notify_waiters();
        info!("上传调度器空闲");
    }

    /// 取出最早的 queued 任务并翻转为 uploading
    fn next_job(&self) -> Option<UploadJob> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let job = {
            let mut items = self.queue.items.write();
            let item = items
                .iter_mut()
                .find(|item| item.status == UploadItemStatus::Queued)?;

            item.mark_uploading();

            let destination_dir =
                resolve_destination_dir(&item.current_dir, item.relative_path.as_deref());
            let logical_key = join_remote_path(&destination_dir, &item.file_name);
            let token = CancellationToken::new();
            self.queue
                .cancel_tokens
                .insert(item.id.clone(), token.clone());

            UploadJob {
                id: item.id.clone(),
                attempt: item.attempt,
                file: item.file.clone(),
                key: self.namespace.namespaced(&logical_key),
                destination_dir,
                token,
            }
        };

        // 与 cancel_all 竞争时令牌可能漏掉取消
        if self.stopped.load(Ordering::SeqCst) {
            job.token.cancel();
        }

        self.events.publish(UploadEvent::StatusChanged {
            task_id: job.id.clone(),
            old_status: UploadItemStatus::Queued.as_str().to_string(),
            new_status: UploadItemStatus::Uploading.as_str().to_string(),
        });

        Some(job)
    }

    /// 传输单个任务并写回终态
    async fn process(&self, job: UploadJob) {
        info!(
            "开始处理上传任务: id={}, key={}, attempt={}",
            job.id, job.key, job.attempt
        );

        let observer = Arc::new(ItemObserver {
            queue: Arc::clone(&self.queue),
            events: Arc::clone(&self.events),
            id: job.id.clone(),
            attempt: job.attempt,
            throttler: ProgressThrottler::default(),
            session: Mutex::new(None),
        });

        let result = self.transfer(&job, observer.clone()).await;
        self.queue.cancel_tokens.remove(&job.id);

        if let Err(e) = &result {
            if let Some((key, upload_id)) = observer.session() {
                info!("上传未完成，中止远端会话: id={}, reason={}", job.id, e);
                self.engine.abort_quietly(&key, &upload_id).await;
            }
        }

        self.finish(&job, result);
    }

    async fn transfer(&self, job: &UploadJob, observer: Arc<ItemObserver>) -> UploadResult<()> {
        if job.token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        // 凭证即将过期时先刷新
        tokio::select! {
            biased;
            _ = job.token.cancelled() => return Err(UploadError::Cancelled),
            result = self.auth.ensure_fresh() => { result?; }
        }

        let report = self
            .engine
            .transfer(&job.file, &job.key, &job.token, observer)
            .await?;
        debug!(
            "传输完成: id={}, strategy={:?}, parts={}",
            job.id, report.strategy, report.part_count
        );
        if let Some(metadata) = report.metadata {
            if metadata.size != 0 && metadata.size != job.file.size {
                warn!(
                    "远端对象大小与本地不一致: id={}, remote={}, local={}",
                    job.id, metadata.size, job.file.size
                );
            }
        }
        Ok(())
    }

    /// 写回终态
    ///
    /// 仅当任务仍处于本次尝试时生效，避免已取消的慢传输覆盖重试后的任务
    fn finish(&self, job: &UploadJob, result: UploadResult<()>) {
        let outcome = self.queue.with_item(&job.id, |item| {
            if item.attempt != job.attempt {
                debug!(
                    "任务已重试，忽略旧结果: id={}, attempt={} (当前 {})",
                    job.id, job.attempt, item.attempt
                );
                return None;
            }

            let old_status = item.status;
            match &result {
                Ok(()) => {
                    if old_status == UploadItemStatus::Cancelled {
                        warn!("任务在取消生效前已上传完成: id={}", job.id);
                    }
                    item.mark_completed();
                }
                Err(e) if e.is_cancelled() => {
                    if old_status == UploadItemStatus::Uploading {
                        item.mark_cancelled(e.to_string());
                    }
                }
                Err(e) => {
                    if old_status == UploadItemStatus::Uploading {
                        item.mark_failed(e.to_string());
                    }
                }
            }
            Some((old_status, item.status, item.completed_at))
        });

        let Some(Some((old_status, new_status, completed_at))) = outcome else {
            if outcome.is_none() {
                warn!("任务已被移除，丢弃结果: id={}", job.id);
            }
            return;
        };

        if old_status != new_status {
            self.events.publish(UploadEvent::StatusChanged {
                task_id: job.id.clone(),
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            });
        }

        match (&result, new_status) {
            (Ok(()), UploadItemStatus::Completed) => {
                info!("上传完成: id={}, key={}", job.id, job.key);
                self.events.publish(UploadEvent::Completed {
                    task_id: job.id.clone(),
                    key: job.key.clone(),
                    completed_at: completed_at.unwrap_or_default(),
                });
            }
            (Err(e), UploadItemStatus::Cancelled) if old_status == UploadItemStatus::Uploading => {
                info!("上传已取消: id={}", job.id);
                debug!("取消原因: {}", e);
                self.events.publish(UploadEvent::Cancelled {
                    task_id: job.id.clone(),
                });
            }
            (Err(e), UploadItemStatus::Failed) => {
                error!("上传失败: id={}, error={}", job.id, e);
                self.events.publish(UploadEvent::Failed {
                    task_id: job.id.clone(),
                    error: e.to_string(),
                    auth_required: e.is_authorization(),
                });
            }
            _ => {}
        }
    }

    /// 停止调度并取消所有上传中的任务（进程退出时调用）
    ///
    /// 排队中的任务保持 queued
    pub fn cancel_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for entry in self.queue.cancel_tokens.iter() {
            entry.value().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observer_for(queue: Arc<QueueState>, item: &UploadItem) -> ItemObserver {
        ItemObserver {
            queue,
            events: Arc::new(EventBus::default()),
            id: item.id.clone(),
            attempt: item.attempt,
            throttler: ProgressThrottler::default(),
            session: Mutex::new(None),
        }
    }

    fn uploading_item() -> UploadItem {
        let file = UploadFile::from_bytes("big.iso", vec![0u8; 16], "application/octet-stream");
        let mut item = UploadItem::new(file, None, "/iso".to_string());
        item.mark_uploading();
        item
    }

    #[test]
    fn test_session_recorded_when_cancel_lands_during_initiate() {
        let queue = Arc::new(QueueState::new());
        let mut item = uploading_item();
        let observer = observer_for(Arc::clone(&queue), &item);
        item.mark_cancelled("上传已取消".to_string());
        let id = item.id.clone();
        queue.items.write().push(item);

        observer.session_started("iso/big.iso", "mpu-1");

        let recorded = queue.with_item(&id, |item| item.remote_session()).unwrap();
        assert_eq!(
            recorded,
            Some(("iso/big.iso".to_string(), "mpu-1".to_string()))
        );
        assert_eq!(
            observer.session(),
            Some(("iso/big.iso".to_string(), "mpu-1".to_string()))
        );
    }

    #[test]
    fn test_session_of_stale_attempt_is_not_recorded() {
        let queue = Arc::new(QueueState::new());
        let mut item = uploading_item();
        let observer = observer_for(Arc::clone(&queue), &item);
        item.mark_cancelled("上传已取消".to_string());
        assert!(item.reset_for_retry());
        let id = item.id.clone();
        queue.items.write().push(item);

        observer.session_started("iso/big.iso", "mpu-old");

        assert!(queue.with_item(&id, |item| item.remote_session()).unwrap().is_none());
        // 旧尝试仍能用自己的副本中止远端会话
        assert!(observer.session().is_some());
    }
}
