// 上传模块
//
// - 单飞顺序调度：同一时刻只上传一个文件
// - 小文件直传，大文件分片并发上传（每批最多 N 个分片）
// - 取消、重试、清除与统计

pub mod chunk;
pub mod engine;
pub mod error;
pub mod folder;
pub mod manager;
pub mod progress;
pub mod scheduler;
pub mod source;
pub mod strategy;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{partition_batches, plan_part_tasks, plan_parts, PartUploadTask};
pub use engine::{TransferObserver, TransferReport, UploadEngine};
pub use error::{UploadError, UploadResult};
pub use folder::{resolve_destination_dir, FolderScanner, ScanOptions, ScannedFile};
pub use manager::{NewUpload, PathUpload, QueueError, UploadManager};
pub use progress::{DirectoryGroup, UploadStats};
pub use scheduler::{EventListingRefresher, ListingRefresher, UploadScheduler};
pub use source::{ByteSource, LocalFile, MemorySource, UploadFile};
pub use strategy::{select_strategy, TransferLimits, TransferStrategy};
pub use task::{UploadItem, UploadItemStatus};
