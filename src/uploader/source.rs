// 上传数据源
//
// UploadFile 是任务持有的不透明文件句柄：数据源 + 大小 + 声明的内容类型

use crate::uploader::error::{UploadError, UploadResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 可按范围读取的字节源
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// 读取 [start, end) 范围的数据
    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes>;
}

/// 本地文件数据源
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for LocalFile {
    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes> {
        let path = self.path.clone();
        let start = range.start;
        let size = range.end.saturating_sub(range.start) as usize;

        tokio::task::spawn_blocking(move || -> UploadResult<Bytes> {
            let mut file = std::fs::File::open(&path)
                .map_err(|e| UploadError::Io(format!("无法打开文件 {:?}: {}", path, e)))?;
            file.seek(SeekFrom::Start(start))?;

            let mut buffer = vec![0u8; size];
            file.read_exact(&mut buffer)?;

            Ok(Bytes::from(buffer))
        })
        .await
        .map_err(|e| UploadError::Io(format!("读取任务异常: {}", e)))?
    }
}

/// 内存数据源
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_range(&self, range: Range<u64>) -> UploadResult<Bytes> {
        let len = self.data.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(UploadError::Io(format!(
                "读取范围越界: {}-{} (数据大小 {})",
                range.start, range.end, len
            )));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

/// 待上传文件
#[derive(Clone)]
pub struct UploadFile {
    /// 数据源
    pub source: Arc<dyn ByteSource>,
    /// 文件名
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 声明的内容类型
    pub content_type: String,
}

impl UploadFile {
    pub fn new(
        source: Arc<dyn ByteSource>,
        name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            source,
            name: name.into(),
            size,
            content_type: content_type.into(),
        }
    }

    /// 从本地路径创建（读取文件元数据获取大小）
    pub async fn from_path(path: &Path, content_type: impl Into<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("无法获取文件元数据: {:?}", path))?;

        if metadata.is_dir() {
            anyhow::bail!("不支持直接上传目录，请使用文件夹上传: {:?}", path);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("无效的文件路径: {:?}", path))?;

        Ok(Self::new(
            Arc::new(LocalFile::new(path)),
            name,
            metadata.len(),
            content_type,
        ))
    }

    /// 内存文件
    pub fn from_bytes(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        let data: Bytes = data.into();
        let size = data.len() as u64;
        Self::new(Arc::new(MemorySource::new(data)), name, size, content_type)
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish()
    }
}
