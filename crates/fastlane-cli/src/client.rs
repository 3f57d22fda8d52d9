//! HTTP Client - 与运行中的服务器通信

use anyhow::{Context, Result, bail};
use fastlane_core::protocol::{
    AccessStatusResponse, DevicesResponse, ErrorResponse, FilesResponse, HealthResponse,
    InfoResponse, LogsResponse, MessageResponse, PendingRequestsResponse, UploadResponse,
};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub struct FastlaneClient {
    base_url: String,
    http: Client,
}

impl FastlaneClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| connect_hint(&self.base_url))?;
        Ok(check(response).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .send()
            .await
            .with_context(|| connect_hint(&self.base_url))?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_json("/health").await
    }

    pub async fn info(&self) -> Result<InfoResponse> {
        self.get_json("/info").await
    }

    pub async fn files(&self) -> Result<FilesResponse> {
        self.get_json("/files").await
    }

    pub async fn devices(&self) -> Result<DevicesResponse> {
        self.get_json("/devices").await
    }

    pub async fn logs(&self) -> Result<LogsResponse> {
        self.get_json("/logs").await
    }

    pub async fn pending(&self) -> Result<PendingRequestsResponse> {
        self.get_json("/pending-requests").await
    }

    pub async fn check_access(&self, request_id: &str) -> Result<AccessStatusResponse> {
        self.get_json(&format!("/check-access/{request_id}")).await
    }

    pub async fn approve(&self, request_id: &str) -> Result<MessageResponse> {
        self.post_json(&format!("/approve-access/{request_id}"))
            .await
    }

    pub async fn reject(&self, request_id: &str) -> Result<MessageResponse> {
        self.post_json(&format!("/reject-access/{request_id}"))
            .await
    }

    pub async fn clear_all(&self) -> Result<MessageResponse> {
        self.post_json("/clear-all").await
    }

    pub async fn delete(&self, id: &str) -> Result<MessageResponse> {
        let response = self
            .http
            .delete(self.url(&format!("/files/{id}")))
            .send()
            .await
            .with_context(|| connect_hint(&self.base_url))?;
        Ok(check(response).await?.json().await?)
    }

    /// 以流的方式上传文件，不把文件读入内存
    pub async fn upload(&self, paths: &[PathBuf]) -> Result<UploadResponse> {
        let mut form = Form::new();
        for path in paths {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let size = file.metadata().await?.len();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());

            let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), size)
                .file_name(name);
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .with_context(|| connect_hint(&self.base_url))?;
        Ok(check(response).await?.json().await?)
    }

    /// 下载文件到 `output`（目录或文件路径），返回写入的路径
    pub async fn download(&self, id: &str, output: Option<&Path>) -> Result<PathBuf> {
        let response = self
            .http
            .get(self.url(&format!("/download/{id}")))
            .send()
            .await
            .with_context(|| connect_hint(&self.base_url))?;
        let mut response = check(response).await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| id.to_string());

        let target = match output {
            Some(path) if path.is_dir() => path.join(&file_name),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(&file_name),
        };

        let mut file = tokio::fs::File::create(&target)
            .await
            .with_context(|| format!("Failed to create {}", target.display()))?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(target)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    bail!("{} ({})", message, status)
}

fn connect_hint(base_url: &str) -> String {
    format!("无法连接到服务器 {base_url}，请确保 fastlane-daemon 正在运行")
}

/// 从 `attachment; filename="..."` 中取出（百分号解码后的）文件名
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let raw = value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');
    let decoded = urlencoding::decode(raw).ok()?;

    // 只保留最后一段，避免写到目标目录之外
    Path::new(decoded.as_ref())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}
