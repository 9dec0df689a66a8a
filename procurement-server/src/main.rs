use anyhow::Context;
use procurement_server::{Server, ServerState, print_banner, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 配置, 日志)
    let config = setup_environment();

    print_banner();
    tracing::info!(
        port = config.http_port,
        database = %config.database_path,
        "Procurement server starting..."
    );

    // 2. 初始化服务器状态 (数据库 + 迁移)
    let state = ServerState::initialize(&config)
        .await
        .context("failed to initialize server state")?;

    // 3. 启动 HTTP 服务器
    let server = Server::with_state(config, state);
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "Server error");
        return Err(anyhow::anyhow!(e).context("server stopped with an error"));
    }

    Ok(())
}
