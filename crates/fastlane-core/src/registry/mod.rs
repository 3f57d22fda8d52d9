//! 文件注册表
//!
//! 内存中的已上传文件目录，与上传目录中的文件保持同步：
//! 删除记录会删除文件；文件缺失时记录在下次访问时被惰性移除。

pub mod mime;

use crate::error::{AppError, Result};
use crate::ident;
use crate::logging::ActivityLog;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use mime::{DEFAULT_CONTENT_TYPE, content_type_for};

/// 已注册的文件（创建后不可变）
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    /// 原始文件名
    pub display_name: String,
    /// 磁盘上的文件名 `<前缀>-<原始文件名>`
    pub storage_name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl FileRecord {
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id.clone(),
            name: self.display_name.clone(),
            size: self.size,
            mimetype: self.content_type.clone(),
            uploaded_at: self.uploaded_at,
        }
    }
}

/// 对外暴露的文件元数据（不含磁盘路径）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mimetype: String,
    pub uploaded_at: DateTime<Utc>,
}

/// 传输引擎已写入上传目录、尚未登记的文件
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub display_name: String,
    pub storage_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: String,
}

/// 单个文件处理失败（不影响同批次的其他文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub records: Vec<FileRecord>,
    pub failures: Vec<FileFailure>,
}

struct Entry {
    seq: u64,
    record: FileRecord,
}

#[derive(Default)]
struct Catalogue {
    next_seq: u64,
    files: HashMap<String, Entry>,
}

impl Catalogue {
    fn insert(&mut self, record: FileRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.files.insert(record.id.clone(), Entry { seq, record });
    }
}

pub struct FileRegistry {
    upload_dir: PathBuf,
    catalogue: Mutex<Catalogue>,
    activity: Arc<ActivityLog>,
}

impl FileRegistry {
    pub fn new(upload_dir: impl Into<PathBuf>, activity: Arc<ActivityLog>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            catalogue: Mutex::new(Catalogue::default()),
            activity,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// 启动时扫描上传目录，恢复符合 `<前缀>-<原始文件名>` 约定的文件
    ///
    /// 读取目录失败只记录日志，不影响启动。返回恢复的文件数。
    pub fn bootstrap(&self) -> usize {
        let entries = match std::fs::read_dir(&self.upload_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Failed to scan upload directory {:?}: {}",
                    self.upload_dir, e
                );
                return 0;
            }
        };

        let mut recovered = Vec::new();
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let storage_name = entry.file_name().to_string_lossy().into_owned();
            let Some(display_name) = ident::display_name_from_storage(&storage_name) else {
                debug!("Skipping unmanaged file {:?}", storage_name);
                continue;
            };

            let uploaded_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);

            recovered.push(FileRecord {
                id: ident::new_id(),
                display_name: display_name.to_string(),
                content_type: content_type_for(display_name).to_string(),
                size: metadata.len(),
                uploaded_at,
                path: entry.path(),
                storage_name,
            });
        }

        // 按上传时间恢复插入顺序
        recovered.sort_by_key(|r| r.uploaded_at);
        let count = recovered.len();
        {
            let mut catalogue = self.catalogue.lock();
            for record in recovered {
                catalogue.insert(record);
            }
        }

        if count > 0 {
            self.activity.info(format!(
                "Loaded {count} existing file(s) from uploads directory"
            ));
        }
        count
    }

    /// 登记传输引擎已写入磁盘的文件
    ///
    /// 单个文件失败会记录在 `failures` 中，其余文件照常登记。
    pub async fn ingest(&self, staged: Vec<StagedFile>) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for file in staged {
            let size = match tokio::fs::metadata(&file.path).await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    self.activity
                        .error(format!("Upload error: {}: {}", file.display_name, e));
                    outcome.failures.push(FileFailure {
                        name: file.display_name,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if size != file.size {
                self.activity.warn(format!(
                    "Size mismatch for {}: received {} bytes, {} on disk",
                    file.display_name, file.size, size
                ));
            }

            let record = FileRecord {
                id: ident::new_id(),
                display_name: file.display_name,
                storage_name: file.storage_name,
                size,
                content_type: file.content_type,
                uploaded_at: Utc::now(),
                path: file.path,
            };

            self.catalogue.lock().insert(record.clone());
            self.activity.info(format!(
                "File uploaded: {} ({})",
                record.display_name,
                format_bytes(record.size)
            ));
            outcome.records.push(record);
        }

        outcome
    }

    /// 按插入顺序列出所有文件
    pub fn list(&self) -> Vec<FileSummary> {
        let catalogue = self.catalogue.lock();
        let mut entries: Vec<&Entry> = catalogue.files.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.record.summary()).collect()
    }

    pub fn count(&self) -> usize {
        self.catalogue.lock().files.len()
    }

    /// 查找可供下载的文件；磁盘上的文件已不存在时移除记录
    pub async fn get(&self, id: &str) -> Result<FileRecord> {
        let record = self
            .catalogue
            .lock()
            .files
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| AppError::NotFound("File not found".into()))?;

        if tokio::fs::try_exists(&record.path).await.unwrap_or(false) {
            Ok(record)
        } else {
            self.catalogue.lock().files.remove(id);
            warn!("Evicted {} ({}): backing file is missing", record.id, record.display_name);
            Err(AppError::NotFound("File not found on disk".into()))
        }
    }

    /// 删除文件及其记录；文件已不存在时视为成功
    pub async fn delete(&self, id: &str) -> Result<FileRecord> {
        let record = self
            .catalogue
            .lock()
            .files
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| AppError::NotFound("File not found".into()))?;

        match tokio::fs::remove_file(&record.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                self.activity.error(format!("Delete error: {e}"));
                return Err(AppError::io("Failed to delete file", e));
            }
        }

        self.catalogue.lock().files.remove(id);
        self.activity
            .info(format!("File deleted: {}", record.display_name));
        Ok(record)
    }

    /// 删除所有文件（逐个尽力删除，失败只记录日志）并清空注册表
    pub async fn clear_all(&self) -> usize {
        let removed = self.remove_all_files().await;
        self.activity.info("All files cleared");
        removed
    }

    /// 进程退出前的清理
    pub async fn cleanup(&self) {
        self.activity.info("Cleaning up...");
        self.remove_all_files().await;
    }

    async fn remove_all_files(&self) -> usize {
        let drained: Vec<FileRecord> = {
            let mut catalogue = self.catalogue.lock();
            catalogue.files.drain().map(|(_, e)| e.record).collect()
        };

        let count = drained.len();
        for record in drained {
            match tokio::fs::remove_file(&record.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    self.activity.warn(format!(
                        "Failed to delete {}: {}",
                        record.display_name, e
                    ));
                }
            }
        }
        count
    }
}

/// 以人类可读的方式格式化字节数（1024 进制，最多两位小数）
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> FileRegistry {
        FileRegistry::new(dir.path(), Arc::new(ActivityLog::new()))
    }

    async fn stage(dir: &TempDir, name: &str, content: &[u8]) -> StagedFile {
        let storage_name = ident::storage_name(name);
        let path = dir.path().join(&storage_name);
        tokio::fs::write(&path, content).await.unwrap();
        StagedFile {
            display_name: name.to_string(),
            storage_name,
            path,
            size: content.len() as u64,
            content_type: content_type_for(name).to_string(),
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(5), "5 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1 MB");
        assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10 GB");
    }

    #[test]
    fn test_bootstrap_recovers_display_names() {
        let dir = TempDir::new().unwrap();
        let storage = ident::storage_name("my-notes.txt");
        std::fs::write(dir.path().join(&storage), b"hello").unwrap();
        std::fs::write(dir.path().join("unmanaged"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("abc-subdir")).unwrap();

        let registry = registry(&dir);
        assert_eq!(registry.bootstrap(), 1);

        let files = registry.list();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "my-notes.txt");
        assert_eq!(files[0].size, 5);
        assert_eq!(files[0].mimetype, "text/plain");
    }

    #[test]
    fn test_bootstrap_missing_dir_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::new(
            dir.path().join("does-not-exist"),
            Arc::new(ActivityLog::new()),
        );
        assert_eq!(registry.bootstrap(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_preserves_order_and_logs() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let a = stage(&dir, "a.txt", b"aaa").await;
        let b = stage(&dir, "b.png", b"bb").await;
        let outcome = registry.ingest(vec![a, b]).await;

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.failures.is_empty());

        let names: Vec<String> = registry.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["a.txt", "b.png"]);

        let messages: Vec<String> = registry
            .activity
            .snapshot()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(messages.contains(&"File uploaded: a.txt (3 Bytes)".to_string()));
    }

    #[tokio::test]
    async fn test_ingest_surfaces_per_file_errors() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let good = stage(&dir, "good.txt", b"ok").await;
        let mut missing = stage(&dir, "gone.txt", b"??").await;
        missing.path = dir.path().join("never-written");

        let outcome = registry.ingest(vec![missing, good]).await;
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].name, "gone.txt");
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_warns_on_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let mut short = stage(&dir, "short.txt", b"abc").await;
        short.size = 10;
        let outcome = registry.ingest(vec![short]).await;

        // 以磁盘上的实际大小登记
        assert_eq!(outcome.records[0].size, 3);
        assert!(registry.activity.snapshot().iter().any(|e| {
            matches!(e.level, LogLevel::Warn)
                && e.message == "Size mismatch for short.txt: received 10 bytes, 3 on disk"
        }));
    }

    #[tokio::test]
    async fn test_get_evicts_missing_backing_file() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let staged = stage(&dir, "ghost.txt", b"boo").await;
        let path = staged.path.clone();
        let id = registry.ingest(vec![staged]).await.records[0].id.clone();

        assert!(registry.get(&id).await.is_ok());

        std::fs::remove_file(path).unwrap();
        assert!(matches!(registry.get(&id).await, Err(AppError::NotFound(_))));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let staged = stage(&dir, "x.bin", b"123").await;
        let path = staged.path.clone();
        let id = registry.ingest(vec![staged]).await.records[0].id.clone();

        registry.delete(&id).await.unwrap();
        assert!(!path.exists());
        assert!(matches!(registry.get(&id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            registry.delete(&id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_tolerates_already_missing_file() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let staged = stage(&dir, "x.bin", b"123").await;
        let path = staged.path.clone();
        let id = registry.ingest(vec![staged]).await.records[0].id.clone();

        std::fs::remove_file(path).unwrap();
        assert!(registry.delete(&id).await.is_ok());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_empties_directory() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let files = vec![
            stage(&dir, "1.txt", b"1").await,
            stage(&dir, "2.txt", b"2").await,
        ];
        registry.ingest(files).await;

        assert_eq!(registry.clear_all().await, 2);
        assert!(registry.list().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
