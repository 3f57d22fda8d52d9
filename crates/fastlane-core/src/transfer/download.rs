//! 下载：支持 Range 的流式文件发送
//!
//! 先由 [`plan_download`] 决定状态码与区间，响应头确定后才开始读取文件。
//! 响应头发出之后的读取错误只会中断连接。

use super::range::{DownloadPlan, plan_download};
use crate::error::{AppError, Result};
use crate::logging::ActivityLog;
use crate::registry::{DEFAULT_CONTENT_TYPE, FileRecord};
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::{StreamExt, TryStreamExt, stream};
use std::future::ready;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// 读取缓冲区大小
pub const DOWNLOAD_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// 以流的形式发送文件（或其中一段）
pub async fn stream_file(
    record: &FileRecord,
    range: Option<&str>,
    activity: &Arc<ActivityLog>,
) -> Result<Response> {
    let total = tokio::fs::metadata(&record.path)
        .await
        .map_err(|e| download_error(activity, "Failed to read file metadata", e))?
        .len();

    let plan = plan_download(range, total)?;

    let mut file = File::open(&record.path)
        .await
        .map_err(|e| download_error(activity, "Failed to open file", e))?;
    if plan.start > 0 {
        file.seek(SeekFrom::Start(plan.start))
            .await
            .map_err(|e| download_error(activity, "Failed to seek file", e))?;
    }

    let headers = download_headers(record, &plan)?;

    let on_error = Arc::clone(activity);
    let on_complete = Arc::clone(activity);
    let name = record.display_name.clone();

    let body = ReaderStream::with_capacity(file.take(plan.length), DOWNLOAD_BUFFER_SIZE)
        .inspect_err(move |e| on_error.error(format!("Download error: {e}")))
        .chain(
            stream::once(async move {
                on_complete.info(format!("File downloaded: {name}"));
            })
            .filter_map(|()| ready(None::<std::io::Result<Bytes>>)),
        );

    Ok((plan.status, headers, Body::from_stream(body)).into_response())
}

fn download_error(activity: &ActivityLog, context: &str, e: std::io::Error) -> AppError {
    activity.error(format!("Download error: {e}"));
    AppError::io(context, e)
}

fn download_headers(record: &FileRecord, plan: &DownloadPlan) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let content_type = HeaderValue::from_str(&record.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);

    let disposition = format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(&record.display_name)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| AppError::Internal(format!("Invalid Content-Disposition: {e}")))?,
    );

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.length));

    if let Some(range) = plan.content_range() {
        headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&range)
                .map_err(|e| AppError::Internal(format!("Invalid Content-Range: {e}")))?,
        );
    }

    Ok(headers)
}
