// 传输策略选择
//
// 文件 <= 阈值：单次直传
// 文件 > 阈值：分片上传（multipart）

use serde::{Deserialize, Serialize};

/// 分片大小: 10MB
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// 分片上传阈值: 100MB（等于阈值时仍然直传）
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 100 * 1024 * 1024;

/// 单文件最大并发分片数
pub const DEFAULT_MAX_CONCURRENT_PARTS: usize = 3;

/// 传输策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// 单次请求上传整个文件
    Direct,
    /// 分片上传
    Chunked,
}

/// 传输参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// 分片大小（字节）
    pub part_size: u64,
    /// 分片上传阈值（字节）
    pub chunk_threshold: u64,
    /// 单文件最大并发分片数
    pub max_concurrent_parts: usize,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_concurrent_parts: DEFAULT_MAX_CONCURRENT_PARTS,
        }
    }
}

impl TransferLimits {
    /// 按当前阈值选择策略
    pub fn select(&self, file_size: u64) -> TransferStrategy {
        select_strategy(file_size, self.chunk_threshold)
    }
}

/// 根据文件大小选择传输策略
///
/// `file_size <= threshold` 直传，`file_size > threshold` 分片
pub fn select_strategy(file_size: u64, threshold: u64) -> TransferStrategy {
    if file_size > threshold {
        TransferStrategy::Chunked
    } else {
        TransferStrategy::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary_is_direct() {
        let limits = TransferLimits::default();
        assert_eq!(limits.select(100 * 1024 * 1024), TransferStrategy::Direct);
        assert_eq!(
            limits.select(100 * 1024 * 1024 + 1),
            TransferStrategy::Chunked
        );
    }

    #[test]
    fn test_small_and_empty_files_are_direct() {
        assert_eq!(select_strategy(0, DEFAULT_CHUNK_THRESHOLD), TransferStrategy::Direct);
        assert_eq!(
            select_strategy(5 * 1024 * 1024, DEFAULT_CHUNK_THRESHOLD),
            TransferStrategy::Direct
        );
    }

    #[test]
    fn test_default_limits() {
        let limits = TransferLimits::default();
        assert_eq!(limits.part_size, 10 * 1024 * 1024);
        assert_eq!(limits.max_concurrent_parts, 3);
    }
}
