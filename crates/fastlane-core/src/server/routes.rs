//! HTTP 路由与处理器

use super::AppState;
use super::middleware::{PeerAddr, approval_gate, ensure_approved, host_only, track_devices};
use super::qr;
use crate::error::{AppError, Result};
use crate::protocol::{
    AccessStatusResponse, DevicesResponse, FilesResponse, HealthResponse, InfoResponse,
    LogsResponse, MessageResponse, PendingRequestsResponse, QrCodeQuery, QrCodeResponse,
    RequestAccessBody, RequestAccessResponse, UploadResponse,
};
use crate::registry::FileSummary;
use crate::transfer::{self, upload::MAX_FILE_SIZE};
use axum::{
    Extension, Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, Request, State,
        multipart::MultipartRejection, rejection::JsonRejection,
    },
    http::{HeaderMap, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use std::convert::Infallible;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>FastLane</title>
</head>
<body>
  <h1>📁 Offline File Sharing</h1>
  <p>Server is running! Use the desktop app to manage files.</p>
</body>
</html>
"#;

pub fn router(state: AppState) -> Router {
    let body_ceiling = usize::try_from(MAX_FILE_SIZE).unwrap_or(usize::MAX);

    let file_routes = Router::new()
        .route(
            "/upload",
            post(upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/files", get(list_files))
        .route("/files/:id", delete(delete_file))
        .route("/download/:id", get(download_file))
        .route("/clear-all", post(clear_all))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            approval_gate,
        ));

    let decision_routes = Router::new()
        .route("/pending-requests", get(pending_requests))
        .route("/approve-access/:request_id", post(approve_access))
        .route("/reject-access/:request_id", post(reject_access))
        .route_layer(middleware::from_fn_with_state(state.clone(), host_only));

    Router::new()
        .route("/", get(landing))
        .route("/request-access", post(request_access))
        .route("/check-access/:request_id", get(check_access))
        .route("/devices", get(list_devices))
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/logs", get(logs))
        .route("/clear-logs", post(clear_logs))
        .route("/qrcode", get(qrcode))
        .merge(decision_routes)
        .merge(file_routes)
        .fallback(static_files)
        .layer(DefaultBodyLimit::max(body_ceiling))
        .layer(middleware::from_fn_with_state(state.clone(), track_devices))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

// ---- 访问请求 ----

async fn request_access(
    State(state): State<AppState>,
    Extension(PeerAddr(address)): Extension<PeerAddr>,
    body: std::result::Result<Json<RequestAccessBody>, JsonRejection>,
) -> Result<Json<RequestAccessResponse>> {
    let body = match body {
        Ok(Json(body)) => body,
        // 非 JSON 请求体按空对象处理
        Err(JsonRejection::MissingJsonContentType(_)) => RequestAccessBody::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let request = state.access.submit(&address, &body.device_name)?;
    Ok(Json(RequestAccessResponse {
        success: true,
        request_id: request.id,
        message: "Access request sent. Waiting for approval...".to_string(),
    }))
}

async fn check_access(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<AccessStatusResponse> {
    Json(AccessStatusResponse {
        status: state.access.status(&request_id),
    })
}

async fn pending_requests(State(state): State<AppState>) -> Json<PendingRequestsResponse> {
    Json(PendingRequestsResponse {
        requests: state.access.list_pending(),
    })
}

async fn approve_access(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.access.approve(&request_id)?;
    Ok(Json(MessageResponse::ok("Access approved")))
}

async fn reject_access(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.access.reject(&request_id)?;
    Ok(Json(MessageResponse::ok("Access rejected")))
}

// ---- 设备与状态 ----

async fn list_devices(State(state): State<AppState>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        devices: state.devices.list(),
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        token: state.token.to_string(),
    })
}

async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        token: state.token.to_string(),
        files_count: state.registry.count(),
    })
}

async fn logs(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.activity.snapshot(),
    })
}

async fn clear_logs(State(state): State<AppState>) -> Json<MessageResponse> {
    state.activity.clear();
    state.activity.info("Activity logs cleared");
    Json(MessageResponse::ok("Logs cleared successfully"))
}

async fn qrcode(Query(query): Query<QrCodeQuery>) -> Result<Json<QrCodeResponse>> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::Validation("URL parameter required".into()))?;
    Ok(Json(QrCodeResponse {
        qr_code: qr::render_data_url(&url)?,
    }))
}

// ---- 文件 ----

async fn upload_files(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let mut multipart = multipart?;
    let received = transfer::receive(
        &mut multipart,
        state.registry.upload_dir(),
        &state.limits,
        &state.activity,
    )
    .await
    .inspect_err(|e| state.activity.error(format!("Upload error: {e}")))?;

    let outcome = state.registry.ingest(received.staged).await;
    let mut errors = received.failures;
    errors.extend(outcome.failures);

    if outcome.records.is_empty() && !errors.is_empty() {
        let names: Vec<&str> = errors.iter().map(|f| f.name.as_str()).collect();
        return Err(AppError::Internal(format!(
            "Failed to save {}",
            names.join(", ")
        )));
    }

    let files: Vec<FileSummary> = outcome.records.iter().map(|r| r.summary()).collect();
    Ok(Json(UploadResponse {
        success: errors.is_empty(),
        message: format!("{} file(s) uploaded successfully", files.len()),
        files,
        errors,
    }))
}

async fn list_files(State(state): State<AppState>) -> Json<FilesResponse> {
    Json(FilesResponse {
        files: state.registry.list(),
    })
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let record = state.registry.get(&id).await?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    transfer::stream_file(&record, range, &state.activity).await
}

async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.registry.delete(&id).await?;
    Ok(Json(MessageResponse::ok("File deleted successfully")))
}

async fn clear_all(State(state): State<AppState>) -> Json<MessageResponse> {
    state.registry.clear_all().await;
    Json(MessageResponse::ok("All files cleared"))
}

/// 上传目录以只读静态内容挂载在根路径
async fn static_files(
    State(state): State<AppState>,
    Extension(PeerAddr(address)): Extension<PeerAddr>,
    req: Request,
) -> Response {
    if let Err(e) = ensure_approved(&state, &address) {
        return e.into_response();
    }

    let served: std::result::Result<_, Infallible> =
        ServeDir::new(state.registry.upload_dir()).oneshot(req).await;
    match served {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
