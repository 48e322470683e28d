// 上传引擎
//
// 核心功能：
// 1. 直传：单次请求上传整个文件，流式上报进度
// 2. 分片上传：initiate -> 分批并发上传分片 -> 按编号排序标签 -> complete
// 3. 所有网络调用都可被取消令牌打断
//
// 并发上传策略：
// - 分片按并发上限 N 顺序切分为批次
// - 批次内所有分片并发上传，整批结束后才开始下一批
// - 任一分片失败则不再派发后续批次
// - 原子计数器追踪已上传字节数
//
// 引擎不负责中止远端会话：initiate 成功后通过观察者上报会话，
// 失败/取消时由调度器统一 abort

use crate::remote::client::{ProgressCallback, RemoteStore};
use crate::remote::types::{normalize_etag, CompletedPart, ObjectMetadata};
use crate::uploader::chunk::{partition_batches, plan_part_tasks, sorted_completion_tags, PartUploadTask};
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::source::UploadFile;
use crate::uploader::strategy::{TransferLimits, TransferStrategy};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 传输过程观察者（由调度器实现，负责写回任务状态）
pub trait TransferObserver: Send + Sync {
    /// 远端 multipart 会话已建立
    fn session_started(&self, key: &str, upload_id: &str);

    /// 累计已上传字节数
    fn bytes_transferred(&self, uploaded: u64, total: u64);
}

/// 单个文件的传输结果
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub strategy: TransferStrategy,
    /// 分片数（直传为 0）
    pub part_count: usize,
    /// 分片上传完成后远端返回的元数据
    pub metadata: Option<ObjectMetadata>,
}

/// 取消令牌优先：令牌触发时立即放弃正在进行的调用
async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> UploadResult<T>
where
    F: Future<Output = UploadResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(UploadError::Cancelled),
        result = fut => result,
    }
}

/// 上传引擎
pub struct UploadEngine {
    remote: Arc<dyn RemoteStore>,
    limits: TransferLimits,
}

impl UploadEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, limits: TransferLimits) -> Self {
        Self { remote, limits }
    }

    /// 上传一个文件到指定 key
    pub async fn transfer(
        &self,
        file: &UploadFile,
        key: &str,
        token: &CancellationToken,
        observer: Arc<dyn TransferObserver>,
    ) -> UploadResult<TransferReport> {
        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let strategy = self.limits.select(file.size);
        info!(
            "开始上传: key={}, size={}, strategy={:?}",
            key, file.size, strategy
        );

        match strategy {
            TransferStrategy::Direct => {
                self.transfer_direct(file, key, token, observer).await?;
                Ok(TransferReport {
                    strategy,
                    part_count: 0,
                    metadata: None,
                })
            }
            TransferStrategy::Chunked => {
                let (part_count, metadata) =
                    self.transfer_chunked(file, key, token, observer).await?;
                Ok(TransferReport {
                    strategy,
                    part_count,
                    metadata: Some(metadata),
                })
            }
        }
    }

    /// 直传
    async fn transfer_direct(
        &self,
        file: &UploadFile,
        key: &str,
        token: &CancellationToken,
        observer: Arc<dyn TransferObserver>,
    ) -> UploadResult<()> {
        let data = cancellable(token, file.source.read_range(0..file.size)).await?;

        let total = file.size;
        let progress: ProgressCallback =
            Arc::new(move |uploaded| observer.bytes_transferred(uploaded, total));

        cancellable(
            token,
            self.remote
                .upload_direct(key, data, &file.content_type, progress),
        )
        .await?;

        info!("直传完成: key={}", key);
        Ok(())
    }

    /// 分片上传
    async fn transfer_chunked(
        &self,
        file: &UploadFile,
        key: &str,
        token: &CancellationToken,
        observer: Arc<dyn TransferObserver>,
    ) -> UploadResult<(usize, ObjectMetadata)> {
        let upload_id = cancellable(token, self.remote.initiate(key, &file.content_type)).await?;
        observer.session_started(key, &upload_id);

        let parts = self
            .upload_parts(file, key, &upload_id, token, observer.as_ref())
            .await?;
        let part_count = parts.len();

        info!("合并上传分片: key={}, parts={}", key, part_count);
        let metadata = cancellable(token, self.remote.complete(key, &upload_id, &parts)).await?;

        info!("分片上传完成: key={}", key);
        Ok((part_count, metadata))
    }

    /// 分批并发上传所有分片
    ///
    /// 返回按分片编号升序排列的完成标签
    pub async fn upload_parts(
        &self,
        file: &UploadFile,
        key: &str,
        upload_id: &str,
        token: &CancellationToken,
        observer: &dyn TransferObserver,
    ) -> UploadResult<Vec<CompletedPart>> {
        let tasks = plan_part_tasks(file.size, self.limits.part_size);
        let batches = partition_batches(&tasks, self.limits.max_concurrent_parts);
        let uploaded = AtomicU64::new(0);

        info!(
            "[并发上传] 分片数: {}, 批次数: {}, 每批最多 {} 个",
            tasks.len(),
            batches.len(),
            self.limits.max_concurrent_parts
        );

        let mut finished: Vec<PartUploadTask> = Vec::with_capacity(tasks.len());

        for (batch_index, batch) in batches.into_iter().enumerate() {
            if token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            debug!(
                "[并发上传] 批次 #{}: 分片 {:?}",
                batch_index + 1,
                batch.iter().map(|p| p.part_number).collect::<Vec<_>>()
            );

            let results = join_all(batch.into_iter().map(|part| {
                self.upload_part(file, key, upload_id, part, token, &uploaded, observer)
            }))
            .await;

            // 等整批结束后再检查失败，取编号最小的失败分片的错误
            let mut first_error = None;
            for result in results {
                match result {
                    Ok(part) => finished.push(part),
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                warn!(
                    "[并发上传] 批次 #{} 失败，停止后续批次: {}",
                    batch_index + 1,
                    e
                );
                return Err(e);
            }
        }

        let tags = sorted_completion_tags(&finished)
            .into_iter()
            .map(|(part_number, completion_tag)| CompletedPart {
                part_number,
                completion_tag,
            })
            .collect::<Vec<_>>();

        if tags.len() != tasks.len() {
            return Err(UploadError::InvalidResponse(format!(
                "完成标签数量不匹配: {} / {}",
                tags.len(),
                tasks.len()
            )));
        }

        info!("[并发上传] 所有 {} 个分片上传完成", tags.len());
        Ok(tags)
    }

    /// 上传单个分片
    #[allow(clippy::too_many_arguments)]
    async fn upload_part(
        &self,
        file: &UploadFile,
        key: &str,
        upload_id: &str,
        mut part: PartUploadTask,
        token: &CancellationToken,
        uploaded: &AtomicU64,
        observer: &dyn TransferObserver,
    ) -> UploadResult<PartUploadTask> {
        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let part_number = part.part_number;
        let url = cancellable(token, self.remote.presign_part(key, upload_id, part_number)).await?;
        let data = cancellable(token, file.source.read_range(part.range.clone())).await?;
        let size = data.len() as u64;

        let raw_tag = cancellable(
            token,
            self.remote.upload_part_bytes(&url, part_number, data),
        )
        .await?;

        let tag = normalize_etag(&raw_tag);
        if tag.is_empty() {
            return Err(UploadError::Integrity { part_number });
        }

        let total = uploaded.fetch_add(size, Ordering::SeqCst) + size;
        observer.bytes_transferred(total, file.size);

        debug!("分片 #{} 完成: {} / {} bytes", part_number, total, file.size);
        part.completion_tag = Some(tag);
        Ok(part)
    }

    /// 中止远端会话（尽力而为，失败只记录日志）
    pub async fn abort_quietly(&self, key: &str, upload_id: &str) {
        match self.remote.abort(key, upload_id).await {
            Ok(()) => info!("已中止远端会话: key={}", key),
            Err(e) => warn!("中止远端会话失败（忽略）: key={}, error={}", key, e),
        }
    }
}
