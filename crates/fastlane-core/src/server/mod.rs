//! 嵌入式文件传输服务器
//!
//! [`FileServer`] 拥有所有共享状态（注册表、设备表、访问请求表和活动日志），
//! [`FileServer::start`] 绑定端口并在后台运行接收循环与设备清理任务。

mod listener;
pub mod middleware;
pub mod qr;
pub mod routes;

pub use listener::HEADER_READ_TIMEOUT;
pub use middleware::{ClientAddr, PeerAddr};

use crate::access::AccessRequests;
use crate::config::ServerSettings;
use crate::ident;
use crate::logging::ActivityLog;
use crate::net;
use crate::presence::{DeviceTracker, SWEEP_INTERVAL};
use crate::registry::FileRegistry;
use crate::transfer::UploadLimits;
use anyhow::Context;
use axum::Router;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// 路由处理器共享的状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FileRegistry>,
    pub devices: Arc<DeviceTracker>,
    pub access: Arc<AccessRequests>,
    pub activity: Arc<ActivityLog>,
    pub token: Arc<str>,
    pub limits: UploadLimits,
    pub require_approval: bool,
}

/// 启动后对外公布的连接信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub url: String,
}

pub struct FileServer {
    settings: ServerSettings,
    state: AppState,
}

impl FileServer {
    /// 创建服务器并扫描上传目录中已有的文件
    ///
    /// 上传目录创建失败只记录日志，后续上传会返回错误。
    pub fn new(settings: ServerSettings) -> Self {
        if let Err(e) = std::fs::create_dir_all(&settings.upload_dir) {
            error!(
                "Failed to create upload directory {:?}: {}",
                settings.upload_dir, e
            );
        }

        let activity = Arc::new(ActivityLog::new());
        let registry = Arc::new(FileRegistry::new(
            settings.upload_dir.clone(),
            Arc::clone(&activity),
        ));
        registry.bootstrap();

        let state = AppState {
            registry,
            devices: Arc::new(DeviceTracker::new(Arc::clone(&activity))),
            access: Arc::new(AccessRequests::new(Arc::clone(&activity))),
            token: Arc::from(ident::session_token()),
            limits: UploadLimits::default(),
            require_approval: settings.require_approval,
            activity,
        };

        Self { settings, state }
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.state.limits = limits;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn token(&self) -> &str {
        &self.state.token
    }

    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// 绑定端口并开始服务
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let bind_addr = self.settings.bind_addr();
        let listener = TcpListener::bind(bind_addr.as_str())
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        let local_addr = listener.local_addr()?;

        let host = net::lan_host().to_string();
        let info = ServerInfo {
            url: format!("http://{}:{}", host, local_addr.port()),
            host,
            port: local_addr.port(),
            token: self.state.token.to_string(),
        };

        info!("Listening on {}", local_addr);
        self.state
            .activity
            .info(format!("Server started on port {}", local_addr.port()));
        self.state
            .activity
            .info("Optimized for high-speed transfers - Max file size: 10GB");

        let sweeper = self.state.devices.spawn_sweeper(SWEEP_INTERVAL);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_loop = tokio::spawn(listener::serve(listener, self.router(), shutdown_rx));

        Ok(ServerHandle {
            info,
            local_addr,
            state: self.state,
            shutdown: Some(shutdown_tx),
            tasks: vec![accept_loop, sweeper],
        })
    }
}

/// 运行中的服务器
pub struct ServerHandle {
    info: ServerInfo,
    local_addr: SocketAddr,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// 删除所有已上传文件（进程退出前调用）
    pub async fn cleanup(&self) {
        self.state.registry.cleanup().await;
    }

    /// 停止接收新连接和后台任务
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        let mut tasks = std::mem::take(&mut self.tasks).into_iter();
        if let Some(accept_loop) = tasks.next()
            && let Err(e) = accept_loop.await
        {
            error!("Accept loop ended abnormally: {}", e);
        }
        for task in tasks {
            task.abort();
        }
        info!("Server shut down");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
