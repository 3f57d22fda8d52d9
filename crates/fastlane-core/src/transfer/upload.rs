//! 上传：把 multipart 请求中的文件流式写入上传目录
//!
//! 每个文件部分直接写到 `<前缀>-<原始文件名>`，写入前检查大小限制，
//! 超限的字节不会落盘。超出任一限制时整批上传失败，已写入的文件会被删除。

use crate::error::{AppError, Result};
use crate::ident;
use crate::logging::ActivityLog;
use crate::registry::{FileFailure, StagedFile, content_type_for};
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// 文件字段名
pub const UPLOAD_FIELD: &str = "files";

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const MAX_FILES: usize = 50;
pub const MAX_FIELDS: usize = 100;
pub const MAX_FIELD_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_FIELD_NAME_SIZE: usize = 1024;

const WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// 单次上传请求的限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: u64,
    pub max_files: usize,
    pub max_fields: usize,
    pub max_field_size: usize,
    pub max_field_name_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_files: MAX_FILES,
            max_fields: MAX_FIELDS,
            max_field_size: MAX_FIELD_SIZE,
            max_field_name_size: MAX_FIELD_NAME_SIZE,
        }
    }
}

/// 一次上传请求的结果
#[derive(Debug, Default)]
pub struct Received {
    /// 已完整写入磁盘的文件
    pub staged: Vec<StagedFile>,
    /// 因磁盘错误未能保存的文件
    pub failures: Vec<FileFailure>,
}

enum PartError {
    /// 超出限制或请求体损坏，整批失败
    Rejected(AppError),
    /// 本文件写入失败，其余文件继续
    Disk(std::io::Error),
}

/// 接收一次 multipart 上传
pub async fn receive(
    multipart: &mut Multipart,
    upload_dir: &Path,
    limits: &UploadLimits,
    activity: &ActivityLog,
) -> Result<Received> {
    let mut received = Received::default();

    if let Err(e) = receive_into(multipart, upload_dir, limits, activity, &mut received).await {
        for file in &received.staged {
            remove_partial(&file.path).await;
        }
        return Err(e);
    }

    Ok(received)
}

async fn receive_into(
    multipart: &mut Multipart,
    upload_dir: &Path,
    limits: &UploadLimits,
    activity: &ActivityLog,
    received: &mut Received,
) -> Result<()> {
    let mut file_count = 0usize;
    let mut field_count = 0usize;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name.len() > limits.max_field_name_size {
            return Err(AppError::PayloadTooLarge("Field name too long".into()));
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            field_count += 1;
            if field_count > limits.max_fields {
                return Err(AppError::PayloadTooLarge("Too many fields".into()));
            }
            skip_field(&mut field, limits.max_field_size).await?;
            continue;
        };

        if field_name != UPLOAD_FIELD {
            return Err(AppError::Validation(format!(
                "Unexpected field: {field_name}"
            )));
        }

        file_count += 1;
        if file_count > limits.max_files {
            return Err(AppError::PayloadTooLarge("Too many files".into()));
        }

        let display_name = sanitize_file_name(&file_name);
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| content_type_for(&display_name).to_string());
        let storage_name = ident::storage_name(&display_name);
        let path = upload_dir.join(&storage_name);

        match write_part(&mut field, &path, limits.max_file_size).await {
            Ok(size) => {
                debug!("Stored {} ({} bytes) as {}", display_name, size, storage_name);
                received.staged.push(StagedFile {
                    display_name,
                    storage_name,
                    path,
                    size,
                    content_type,
                });
            }
            Err(PartError::Rejected(e)) => {
                remove_partial(&path).await;
                return Err(e);
            }
            Err(PartError::Disk(e)) => {
                remove_partial(&path).await;
                activity.error(format!("Upload error: {display_name}: {e}"));
                // 读完剩余内容以便继续处理后续字段
                while let Ok(Some(_)) = field.chunk().await {}
                received.failures.push(FileFailure {
                    name: display_name,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

async fn write_part(
    field: &mut Field<'_>,
    path: &Path,
    max_size: u64,
) -> std::result::Result<u64, PartError> {
    let file = File::create(path).await.map_err(PartError::Disk)?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut written = 0u64;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| PartError::Rejected(multipart_error(e)))?
    {
        written += chunk.len() as u64;
        if written > max_size {
            return Err(PartError::Rejected(AppError::PayloadTooLarge(
                "File too large".into(),
            )));
        }
        writer.write_all(&chunk).await.map_err(PartError::Disk)?;
    }

    writer.flush().await.map_err(PartError::Disk)?;
    Ok(written)
}

async fn skip_field(field: &mut Field<'_>, max_size: usize) -> Result<()> {
    let mut size = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len();
        if size > max_size {
            return Err(AppError::PayloadTooLarge("Field value too large".into()));
        }
    }
    Ok(())
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial upload {:?}: {}", path, e),
    }
}

/// 只保留客户端文件名的最后一段路径
pub fn sanitize_file_name(raw: &str) -> String {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();

    match name.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => name,
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(e.body_text())
    }
}
