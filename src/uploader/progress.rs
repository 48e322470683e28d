// 进度与状态汇总

use crate::uploader::folder::first_segment;
use crate::uploader::task::{UploadItem, UploadItemStatus};
use serde::Serialize;

/// 目录分组（文件夹上传时按第一段路径分组）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryGroup {
    /// 分组名（相对路径第一段）
    pub name: String,
    /// 组内任务ID，按入队顺序
    pub item_ids: Vec<String>,
    /// 组内总大小
    pub total_size: u64,
    /// 组内已完成数
    pub completed_count: usize,
    /// 组内平均进度
    pub progress: u8,
}

/// 队列统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    /// 总任务数
    pub total: usize,
    /// 总体进度：所有任务进度的算术平均值（不按文件大小加权）
    pub overall_progress: u8,
    /// 按文件大小加权的进度
    pub weighted_progress: u8,
    /// 排队中 + 上传中
    pub active_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    /// 目录分组
    pub directories: Vec<DirectoryGroup>,
    /// 非文件夹上传的任务ID
    pub standalone: Vec<String>,
}

/// 进度值的算术平均，四舍五入；空集合为 0
pub fn mean_progress<I>(values: I) -> u8
where
    I: IntoIterator<Item = u8>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), p| (sum + p as u64, count + 1));
    if count == 0 {
        return 0;
    }
    (sum as f64 / count as f64).round() as u8
}

/// 按大小加权的进度（已上传字节 / 总字节）
fn weighted_progress(items: &[UploadItem]) -> u8 {
    let total: u64 = items.iter().map(|i| i.total_size).sum();
    if total == 0 {
        return mean_progress(items.iter().map(|i| i.progress));
    }
    let uploaded: u64 = items
        .iter()
        .map(|i| {
            if i.status == UploadItemStatus::Completed {
                i.total_size
            } else {
                i.uploaded_size.min(i.total_size)
            }
        })
        .sum();
    crate::uploader::chunk::percent(uploaded, total)
}

impl UploadStats {
    /// 从任务列表（入队顺序）计算统计
    pub fn from_items(items: &[UploadItem]) -> Self {
        let count = |status: UploadItemStatus| items.iter().filter(|i| i.status == status).count();

        let mut directories: Vec<DirectoryGroup> = Vec::new();
        let mut standalone = Vec::new();

        for item in items {
            match item.relative_path.as_deref().and_then(first_segment) {
                Some(name) => {
                    let group = match directories.iter_mut().position(|g| g.name == name) {
                        Some(idx) => &mut directories[idx],
                        None => {
                            directories.push(DirectoryGroup {
                                name: name.to_string(),
                                item_ids: Vec::new(),
                                total_size: 0,
                                completed_count: 0,
                                progress: 0,
                            });
                            let last = directories.len() - 1;
                            &mut directories[last]
                        }
                    };
                    group.item_ids.push(item.id.clone());
                    group.total_size += item.total_size;
                    if item.status == UploadItemStatus::Completed {
                        group.completed_count += 1;
                    }
                }
                None => standalone.push(item.id.clone()),
            }
        }

        for group in &mut directories {
            group.progress = mean_progress(
                items
                    .iter()
                    .filter(|i| group.item_ids.contains(&i.id))
                    .map(|i| i.progress),
            );
        }

        Self {
            total: items.len(),
            overall_progress: mean_progress(items.iter().map(|i| i.progress)),
            weighted_progress: weighted_progress(items),
            active_count: items.iter().filter(|i| i.status.is_active()).count(),
            completed_count: count(UploadItemStatus::Completed),
            failed_count: count(UploadItemStatus::Failed),
            cancelled_count: count(UploadItemStatus::Cancelled),
            directories,
            standalone,
        }
    }
}
