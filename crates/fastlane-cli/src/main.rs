//! FastLane CLI
//!
//! 命令行客户端，通过 HTTP 接口与运行中的服务器通信

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::FastlaneClient;
use fastlane_core::format_bytes;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fastlane", version, about = "FastLane - 局域网文件共享工具")]
struct Cli {
    /// 服务器地址
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 查看服务器状态
    Status,
    /// 列出已上传的文件
    Files,
    /// 列出在线设备
    Devices,
    /// 查看活动日志
    Logs,
    /// 列出待审批的访问请求
    Pending,
    /// 查询访问请求状态
    Check { request_id: String },
    /// 批准访问请求
    Approve { request_id: String },
    /// 拒绝访问请求
    Reject { request_id: String },
    /// 删除文件
    Delete { id: String },
    /// 删除所有文件
    ClearAll,
    /// 上传文件
    Upload {
        /// 要上传的文件路径
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// 下载文件
    Download {
        id: String,
        /// 保存位置 (目录或文件路径，默认: 当前目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = FastlaneClient::new(&cli.server);

    match cli.command {
        Commands::Status => {
            let health = client.health().await?;
            let info = client.info().await?;
            println!("状态: {}", health.status);
            println!("令牌: {}", info.token);
            println!("文件: {}", info.files_count);
        }
        Commands::Files => {
            let files = client.files().await?.files;
            if files.is_empty() {
                println!("   没有文件");
            }
            for file in files {
                println!(
                    "   {}  {}  ({}, {})",
                    file.id,
                    file.name,
                    format_bytes(file.size),
                    file.mimetype
                );
            }
        }
        Commands::Devices => {
            let devices = client.devices().await?.devices;
            if devices.is_empty() {
                println!("   没有在线设备");
            }
            for device in devices {
                println!(
                    "   {} ({})  请求数: {}  最后活动: {}",
                    device.device_name,
                    device.ip,
                    device.requests,
                    device.last_seen.format("%H:%M:%S")
                );
            }
        }
        Commands::Logs => {
            for entry in client.logs().await?.logs {
                println!(
                    "[{}] {:5} {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.level.name(),
                    entry.message
                );
            }
        }
        Commands::Pending => {
            let requests = client.pending().await?.requests;
            if requests.is_empty() {
                println!("   没有待审批的请求");
            }
            for request in requests {
                println!(
                    "   {}  {} ({})",
                    request.request_id, request.device_name, request.ip
                );
            }
        }
        Commands::Check { request_id } => {
            let status = client.check_access(&request_id).await?.status;
            let status = serde_json::to_value(status)?;
            println!("状态: {}", status.as_str().unwrap_or("unknown"));
        }
        Commands::Approve { request_id } => {
            println!("✅ {}", client.approve(&request_id).await?.message);
        }
        Commands::Reject { request_id } => {
            println!("⏹️  {}", client.reject(&request_id).await?.message);
        }
        Commands::Delete { id } => {
            println!("🗑️  {}", client.delete(&id).await?.message);
        }
        Commands::ClearAll => {
            println!("🗑️  {}", client.clear_all().await?.message);
        }
        Commands::Upload { paths } => {
            println!("📤 上传 {} 个文件...", paths.len());
            let response = client.upload(&paths).await?;
            for file in &response.files {
                println!("   {}  {} ({})", file.id, file.name, format_bytes(file.size));
            }
            for failure in &response.errors {
                eprintln!("❌ {}: {}", failure.name, failure.error);
            }
            println!("✅ {}", response.message);
        }
        Commands::Download { id, output } => {
            println!("📥 下载 {}...", id);
            let path = client.download(&id, output.as_deref()).await?;
            println!("✅ 已保存到 {}", path.display());
        }
    }

    Ok(())
}
