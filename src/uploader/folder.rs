//! 文件夹上传
//!
//! 负责:
//! - 由相对路径计算目标目录（纯函数）
//! - 递归扫描本地文件夹，保留目录结构
//!
//! 相对路径统一使用 `/` 分隔，如 `photos/2024/a.jpg`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 拼接远端目录与子路径
///
/// `join_remote_path("/docs", "a/b")` -> `/docs/a/b`
pub fn join_remote_path(base: &str, child: &str) -> String {
    let child = child.trim_matches('/');
    let base = base.trim_end_matches('/');
    if child.is_empty() {
        return if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        };
    }
    format!("{}/{}", base, child)
}

/// 相对路径中的目录部分（最后一个 `/` 之前）
///
/// 没有目录部分时返回 None
pub fn directory_portion(relative_path: &str) -> Option<&str> {
    relative_path
        .rsplit_once('/')
        .map(|(dir, _)| dir.trim_matches('/'))
        .filter(|dir| !dir.is_empty())
}

/// 计算目标目录
///
/// 相对路径包含目录部分时，目标目录 = 当前目录 + 目录部分；
/// 否则为当前目录本身
pub fn resolve_destination_dir(current_dir: &str, relative_path: Option<&str>) -> String {
    match relative_path.and_then(directory_portion) {
        Some(dir) => join_remote_path(current_dir, dir),
        None => join_remote_path(current_dir, ""),
    }
}

/// 相对路径的第一段（用于目录分组）
///
/// 仅当相对路径包含 `/` 时返回
pub fn first_segment(relative_path: &str) -> Option<&str> {
    relative_path
        .split_once('/')
        .map(|(first, _)| first)
        .filter(|first| !first.is_empty())
}

/// 文件扫描结果
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 本地文件绝对路径
    pub local_path: PathBuf,
    /// 以文件夹名开头的相对路径，如 `photos/2024/a.jpg`
    pub relative_path: String,
    /// 文件大小（字节）
    pub size: u64,
}

/// 文件夹扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
}

/// 文件夹扫描器
#[derive(Debug, Clone, Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 递归扫描文件夹
    ///
    /// 返回的文件按相对路径排序
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<ScannedFile>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }
        if !root_path.is_dir() {
            anyhow::bail!("扫描路径不是文件夹: {}", root_path.display());
        }

        let folder_name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("无法获取文件夹名: {}", root_path.display()))?;

        info!("开始扫描文件夹: {}", root_path.display());

        let skip_hidden = self.options.skip_hidden;
        let walker = WalkDir::new(root_path)
            .follow_links(self.options.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                !(skip_hidden && entry.depth() > 0 && is_hidden(entry.file_name()))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("读取目录条目失败，跳过: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = entry
                .metadata()
                .with_context(|| format!("读取文件元数据失败: {}", entry.path().display()))?;

            let inner = entry
                .path()
                .strip_prefix(root_path)
                .with_context(|| format!("计算相对路径失败: {}", entry.path().display()))?;
            let inner: Vec<String> = inner
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let relative_path = format!("{}/{}", folder_name, inner.join("/"));

            debug!("扫描到文件: {} ({} bytes)", relative_path, metadata.len());

            files.push(ScannedFile {
                local_path: entry.path().to_path_buf(),
                relative_path,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "文件夹扫描完成: {} 个文件，总大小 {} bytes",
            files.len(),
            files.iter().map(|f| f.size).sum::<u64>()
        );

        Ok(files)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_destination_without_separator() {
        assert_eq!(resolve_destination_dir("/docs", Some("a.txt")), "/docs");
        assert_eq!(resolve_destination_dir("/docs", None), "/docs");
        assert_eq!(resolve_destination_dir("/", None), "/");
    }

    #[test]
    fn test_destination_with_one_separator() {
        assert_eq!(
            resolve_destination_dir("/docs", Some("photos/a.jpg")),
            "/docs/photos"
        );
        assert_eq!(resolve_destination_dir("/", Some("photos/a.jpg")), "/photos");
        assert_eq!(resolve_destination_dir("/docs/", Some("photos/a.jpg")), "/docs/photos");
    }

    #[test]
    fn test_destination_deeply_nested() {
        assert_eq!(
            resolve_destination_dir("/docs", Some("photos/2024/trip/day1/a.jpg")),
            "/docs/photos/2024/trip/day1"
        );
    }

    #[test]
    fn test_first_segment() {
        assert_eq!(first_segment("photos/2024/a.jpg"), Some("photos"));
        assert_eq!(first_segment("photos/a.jpg"), Some("photos"));
        assert_eq!(first_segment("a.jpg"), None);
    }

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/docs", "a.txt"), "/docs/a.txt");
        assert_eq!(join_remote_path("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote_path("", "a.txt"), "/a.txt");
    }

    /// 创建测试目录结构:
    /// album/
    /// ├── file1.txt
    /// ├── .hidden.txt
    /// └── sub/
    ///     └── deep/
    ///         └── file2.txt
    fn create_test_folder() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("album");
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::write(root.join("file1.txt"), "content1").unwrap();
        fs::write(root.join(".hidden.txt"), "hidden").unwrap();
        fs::write(root.join("sub/deep/file2.txt"), "content22").unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_scan_prefixes_folder_name() {
        let (_guard, root) = create_test_folder();
        let files = FolderScanner::new().scan(&root).unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["album/.hidden.txt", "album/file1.txt", "album/sub/deep/file2.txt"]
        );
        assert_eq!(files[2].size, 9);
        assert_eq!(files[2].local_path, root.join("sub/deep/file2.txt"));
    }

    #[test]
    fn test_scan_skip_hidden_files() {
        let (_guard, root) = create_test_folder();
        let scanner = FolderScanner::with_options(ScanOptions {
            skip_hidden: true,
            ..Default::default()
        });

        let files = scanner.scan(&root).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.relative_path.contains(".hidden")));
    }

    #[test]
    fn test_scan_rejects_missing_and_plain_file() {
        let scanner = FolderScanner::new();
        let err = scanner.scan("/nonexistent/path").unwrap_err();
        assert!(err.to_string().contains("扫描路径不存在"));

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, "content").unwrap();
        let err = scanner.scan(&file_path).unwrap_err();
        assert!(err.to_string().contains("扫描路径不是文件夹"));
    }
}
