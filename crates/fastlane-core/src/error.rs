//! 控制面错误类型
//!
//! 所有路由处理器返回 `Result<_, AppError>`，错误统一转换为
//! `{"success": false, "error": "..."}` 形式的 JSON 响应。

use axum::{
    Json,
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use log::error;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// 输入缺失或非法（400）
    #[error("{0}")]
    Validation(String),

    /// 未知的文件/请求，或文件已不在磁盘上（404）
    #[error("{0}")]
    NotFound(String),

    /// 启用审批后，未获批准的设备访问文件接口（403）
    #[error("{0}")]
    Forbidden(String),

    /// 对已决定的访问请求做相反的决定（409）
    #[error("{0}")]
    Conflict(String),

    /// 超出上传限制（413）
    #[error("{0}")]
    PayloadTooLarge(String),

    /// 无法满足的字节范围，携带文件总大小（416）
    #[error("Range not satisfiable")]
    RangeNotSatisfiable(u64),

    /// 上传/下载过程中的磁盘或流错误（500）
    #[error("{context}: {source}")]
    TransferIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AppError::TransferIo {
            context: context.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::TransferIo { .. } | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// 请求体提取失败：超出体积限制为 413，其余为 400
fn rejected(status: StatusCode, message: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(message)
    } else {
        AppError::Validation(message)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }

        let body = Json(json!({ "success": false, "error": self.to_string() }));
        let mut response = (status, body).into_response();

        if let AppError::RangeNotSatisfiable(total) = self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }

        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
