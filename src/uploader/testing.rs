// 测试用远端存储替身
//
// 记录所有调用；可让指定分片失败、为分片/直传注入延迟以制造乱序完成

use crate::remote::client::{ProgressCallback, RemoteStore};
use crate::remote::types::{CompletedPart, ObjectMetadata};
use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::source::{ByteSource, UploadFile};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// 远端调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    DirectStarted { key: String, size: usize },
    DirectFinished { key: String },
    Initiate { key: String },
    Presign { part_number: u32 },
    PartStarted { part_number: u32, size: usize },
    PartFinished { part_number: u32 },
    Complete { key: String, parts: Vec<CompletedPart> },
    Abort { key: String, upload_id: String },
}

/// 可编排的远端存储
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<RemoteCall>>,
    /// 该分片上传返回网络错误
    pub fail_part: Option<u32>,
    /// 直传返回的错误
    pub fail_direct: Option<UploadError>,
    /// 中止失败（应被吞掉）
    pub fail_abort: bool,
    /// 该分片返回空的完成标签（`""`）
    pub empty_tag_part: Option<u32>,
    /// 分片上传延迟
    pub part_delays: HashMap<u32, Duration>,
    /// 直传延迟
    pub direct_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn abort_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Abort { .. }))
            .count()
    }

    pub fn started_parts(&self) -> Vec<u32> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                RemoteCall::PartStarted { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    pub fn completed_with(&self) -> Option<Vec<CompletedPart>> {
        self.calls().into_iter().find_map(|c| match c {
            RemoteCall::Complete { parts, .. } => Some(parts),
            _ => None,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn upload_direct(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
        progress: ProgressCallback,
    ) -> UploadResult<()> {
        self.record(RemoteCall::DirectStarted {
            key: key.to_string(),
            size: data.len(),
        });
        if let Some(delay) = self.direct_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_direct.clone() {
            return Err(err);
        }
        progress(data.len() as u64 / 2);
        progress(data.len() as u64);
        self.record(RemoteCall::DirectFinished {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn initiate(&self, key: &str, _content_type: &str) -> UploadResult<String> {
        self.record(RemoteCall::Initiate {
            key: key.to_string(),
        });
        Ok(format!("mpu-{}", key))
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> UploadResult<String> {
        self.record(RemoteCall::Presign { part_number });
        Ok(format!(
            "https://bucket.example.com/{}?uploadId={}&partNumber={}",
            key, upload_id, part_number
        ))
    }

    async fn upload_part_bytes(
        &self,
        _url: &str,
        part_number: u32,
        data: Bytes,
    ) -> UploadResult<String> {
        self.record(RemoteCall::PartStarted {
            part_number,
            size: data.len(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_part == Some(part_number) {
            return Err(UploadError::Network("connection reset by peer".to_string()));
        }
        self.record(RemoteCall::PartFinished { part_number });
        if self.empty_tag_part == Some(part_number) {
            return Ok("\"\"".to_string());
        }
        // 对象存储返回带引号的 ETag
        Ok(format!("\"etag-{}\"", part_number))
    }

    async fn complete(
        &self,
        key: &str,
        _upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectMetadata> {
        self.record(RemoteCall::Complete {
            key: key.to_string(),
            parts: parts.to_vec(),
        });
        Ok(ObjectMetadata {
            key: key.to_string(),
            etag: Some(format!("multipart-{}", parts.len())),
            ..Default::default()
        })
    }

    async fn abort(&self, key: &str, upload_id: &str) -> UploadResult<()> {
        self.record(RemoteCall::Abort {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        });
        if self.fail_abort {
            return Err(UploadError::RemoteRejected {
                status: 404,
                message: "NoSuchUpload".to_string(),
            });
        }
        Ok(())
    }
}

/// 按需生成零字节的数据源，避免大文件测试占用内存
pub struct ZeroSource;

#[async_trait]
impl ByteSource for ZeroSource {
    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes> {
        Ok(Bytes::from(vec![0u8; (range.end - range.start) as usize]))
    }
}

/// 指定大小的测试文件
pub fn sized_file(name: &str, size: u64) -> UploadFile {
    UploadFile::new(Arc::new(ZeroSource), name, size, "application/octet-stream")
}
