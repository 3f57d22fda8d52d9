//! FastLane Core Library
//!
//! 局域网内通过浏览器收发文件的嵌入式传输服务器，不依赖任何云端中转。
//!
//! # 模块
//!
//! - **registry**: 已上传文件的内存目录，与上传目录保持同步
//! - **presence**: 按客户端地址跟踪在线设备
//! - **access**: 设备访问请求的审批流程
//! - **transfer**: multipart 上传和支持 Range 的流式下载
//! - **server**: HTTP 路由、中间件和连接接收循环
//! - **logging**: 有界活动日志
//!
//! # 使用示例
//!
//! ```ignore
//! use fastlane_core::{FileServer, ServerSettings};
//!
//! let server = FileServer::new(ServerSettings::load());
//! let handle = server.start().await?;
//! println!("Open {} on another device", handle.info().url);
//!
//! tokio::signal::ctrl_c().await?;
//! handle.cleanup().await;
//! handle.shutdown().await;
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod ident;
pub mod logging;
pub mod net;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transfer;

pub use access::{AccessRequests, AccessStatus, PendingRequest};
pub use config::ServerSettings;
pub use error::{AppError, Result};
pub use logging::{ActivityLog, LogEntry, LogLevel};
pub use presence::{DeviceSummary, DeviceTracker};
pub use registry::{FileRecord, FileRegistry, FileSummary, format_bytes};
pub use server::{AppState, FileServer, ServerHandle, ServerInfo};
pub use transfer::UploadLimits;
