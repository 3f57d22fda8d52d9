//! 文件传输引擎
//!
//! 包含:
//! - multipart 上传，流式写入上传目录
//! - 支持 Range 的流式下载

pub mod download;
pub mod range;
pub mod upload;

pub use download::{DOWNLOAD_BUFFER_SIZE, stream_file};
pub use range::{DownloadPlan, plan_download};
pub use upload::{Received, UPLOAD_FIELD, UploadLimits, receive};
