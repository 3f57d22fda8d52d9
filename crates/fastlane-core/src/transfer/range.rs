//! `Range` 请求头解析
//!
//! 只支持单一字节范围：`bytes=a-b`、`bytes=a-` 和后缀形式 `bytes=-n`。
//! 多范围、其他单位或越界的范围一律视为无法满足（416）。

use crate::error::{AppError, Result};
use axum::http::StatusCode;

/// 下载计划：响应状态与要发送的字节区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPlan {
    pub status: StatusCode,
    pub start: u64,
    /// 要发送的字节数
    pub length: u64,
    /// 文件总大小
    pub total: u64,
}

impl DownloadPlan {
    fn full(total: u64) -> Self {
        Self {
            status: StatusCode::OK,
            start: 0,
            length: total,
            total,
        }
    }

    fn partial(start: u64, end: u64, total: u64) -> Self {
        Self {
            status: StatusCode::PARTIAL_CONTENT,
            start,
            length: end - start + 1,
            total,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.status == StatusCode::PARTIAL_CONTENT
    }

    /// 最后一个字节的偏移（包含）
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }

    /// 206 响应的 `Content-Range` 值
    pub fn content_range(&self) -> Option<String> {
        self.is_partial()
            .then(|| format!("bytes {}-{}/{}", self.start, self.end(), self.total))
    }
}

/// 根据 `Range` 头和文件大小决定响应方式
pub fn plan_download(range: Option<&str>, total: u64) -> Result<DownloadPlan> {
    let Some(range) = range.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(DownloadPlan::full(total));
    };

    let (start, end) = parse_range(range, total).ok_or(AppError::RangeNotSatisfiable(total))?;
    Ok(DownloadPlan::partial(start, end, total))
}

fn parse_range(range: &str, total: u64) -> Option<(u64, u64)> {
    let spec = range.strip_prefix("bytes=")?.trim();
    if spec.contains(',') || total == 0 {
        return None;
    }

    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // 后缀范围：最后 n 个字节
        let suffix: u64 = last.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some((total.saturating_sub(suffix), total - 1));
    }

    let start: u64 = first.parse().ok()?;
    let end: u64 = if last.is_empty() {
        total - 1
    } else {
        last.parse().ok()?
    };

    (start <= end && end < total).then_some((start, end))
}
