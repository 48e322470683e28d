// 上传分片规划
//
// 分片规则：
// - 分片编号从 1 开始，连续无空洞
// - 分片数 = ceil(文件大小 / 分片大小)
// - 除最后一个分片外，每个分片恰好 part_size 字节
// - 空文件规划为一个 [0, 0) 分片

use std::ops::Range;
use tracing::debug;

/// 单个分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUploadTask {
    /// 分片编号（从 1 开始）
    pub part_number: u32,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
    /// 远端返回的完成标签（已去除引号），仅上传成功后设置
    pub completion_tag: Option<String>,
}

impl PartUploadTask {
    pub fn new(part_number: u32, range: Range<u64>) -> Self {
        Self {
            part_number,
            range,
            completion_tag: None,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 计算分片字节范围
///
/// 纯函数，无 I/O。`part_size` 为 0 时按 1 处理
pub fn plan_parts(file_size: u64, part_size: u64) -> Vec<Range<u64>> {
    let part_size = part_size.max(1);

    if file_size == 0 {
        return vec![0..0];
    }

    let part_count = file_size.div_ceil(part_size);
    (0..part_count)
        .map(|i| {
            let start = i * part_size;
            let end = std::cmp::min(start + part_size, file_size);
            start..end
        })
        .collect()
}

/// 规划分片任务列表（编号从 1 开始）
pub fn plan_part_tasks(file_size: u64, part_size: u64) -> Vec<PartUploadTask> {
    let tasks: Vec<PartUploadTask> = plan_parts(file_size, part_size)
        .into_iter()
        .enumerate()
        .map(|(i, range)| PartUploadTask::new(i as u32 + 1, range))
        .collect();

    debug!(
        "分片规划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
        file_size,
        part_size,
        tasks.len()
    );

    tasks
}

/// 按并发上限将分片顺序切分为批次
///
/// 除最后一批外，每批恰好 `batch_size` 个
pub fn partition_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(|batch| batch.to_vec())
        .collect()
}

/// 已完成分片的标签列表，按分片编号排序
///
/// 分片完成顺序与编号无关，合并前必须重新排序
pub fn sorted_completion_tags(parts: &[PartUploadTask]) -> Vec<(u32, String)> {
    let mut tags: Vec<(u32, String)> = parts
        .iter()
        .filter_map(|p| p.completion_tag.clone().map(|tag| (p.part_number, tag)))
        .collect();
    tags.sort_by_key(|(part_number, _)| *part_number);
    tags
}

/// 计算进度百分比（四舍五入到整数）
pub fn percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (transferred as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
