//! 服务生命周期：启动、公布连接信息、等待退出信号、清理

use anyhow::{Context, Result};
use fastlane_core::{FileServer, ServerSettings};

pub async fn run(settings: ServerSettings) -> Result<()> {
    let purge_on_exit = settings.purge_on_exit;
    tracing::info!("Upload directory: {:?}", settings.upload_dir);

    let server = FileServer::new(settings);
    let handle = server.start().await?;

    let info = handle.info();
    tracing::info!("Server ready at {} (token {})", info.url, info.token);
    // 供桌面外壳读取的单行 JSON
    println!("{}", serde_json::to_string(info)?);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if purge_on_exit {
        handle.cleanup().await;
    } else {
        tracing::info!("Keeping uploaded files");
    }
    handle.shutdown().await;

    Ok(())
}
