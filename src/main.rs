//! Coinbridge 主入口
//! SOL 与游戏币兑换结算服务

use std::sync::Arc;

use anyhow::{Context, Result};
use coinbridge::{api, app_state::AppState, config::Config, infrastructure::logging};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量
    dotenvy::dotenv().ok();

    // 2. 加载配置（CONFIG_PATH 指向的 TOML 覆盖环境变量）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;

    // 3. 初始化日志；guard 需持有到进程退出
    let _log_guard = logging::init_logging(&config.logging)?;

    config.validate().context("Invalid configuration")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        custody = ?config.custody.environment,
        "Starting Coinbridge settlement service"
    );

    // 4. 初始化应用状态
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()).await?);

    // 开发环境启动时提示托管钱包余额，生产环境余额不足只告警
    match state.exchange.custody().balance().await {
        Ok(lamports) => tracing::info!(
            game_wallet = %state.exchange.custody().address(),
            lamports,
            "Custodial wallet balance"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read custodial wallet balance"),
    }

    // 5. 构建路由并启动服务器
    let app = api::routes(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    tracing::info!("Server listening on http://{}", config.server.bind_addr);
    tracing::info!("OpenAPI: http://{}/openapi.json", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
