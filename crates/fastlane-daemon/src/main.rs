//! FastLane Daemon
//!
//! 后台守护进程，负责：
//! - 运行局域网文件传输服务器
//! - 在标准输出公布连接信息 `{host, port, token, url}`
//! - 退出时按设置清理上传目录

mod service;

use anyhow::Result;
use clap::Parser;
use fastlane_core::ServerSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fastlane-daemon", version, about = "FastLane - 局域网文件共享服务器")]
struct Args {
    /// 监听地址
    #[arg(long)]
    host: Option<String>,
    /// 监听端口 (0 表示随机端口)
    #[arg(short, long)]
    port: Option<u16>,
    /// 上传目录 (默认: ~/.fastlane/uploads)
    #[arg(long)]
    upload_dir: Option<PathBuf>,
    /// 退出时保留已上传的文件
    #[arg(long)]
    keep_files: bool,
    /// 文件接口仅对已批准的设备开放
    #[arg(long)]
    require_approval: bool,
    /// 把生效的设置写回配置文件
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    fn apply(&self, settings: &mut ServerSettings) {
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(dir) = &self.upload_dir {
            settings.upload_dir.clone_from(dir);
        }
        if self.keep_files {
            settings.purge_on_exit = false;
        }
        if self.require_approval {
            settings.require_approval = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（fastlane-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fastlane_core=debug")),
        )
        .try_init();

    let args = Args::parse();
    let mut settings = ServerSettings::load();
    args.apply(&mut settings);

    if args.save_settings {
        settings.save()?;
        tracing::info!("Settings saved to {:?}", ServerSettings::config_path());
    }

    tracing::info!("FastLane Daemon starting...");
    service::run(settings).await
}
