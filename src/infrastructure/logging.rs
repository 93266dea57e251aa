//! 日志系统配置模块
//! 支持结构化日志、日志级别配置和按天轮转的文件日志

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// 返回的 guard 必须在进程生命周期内持有，否则文件日志会丢失
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "coinbridge={},tower_http=info,audit=info",
            config.level
        ))
    });

    let (file_writer, guard) = if config.enable_file_logging {
        let log_dir = config
            .log_file_path
            .as_ref()
            .and_then(|p| Path::new(p).parent())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("./logs"));

        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log dir: {:?}", log_dir))?;

        let file_appender = rolling::daily(log_dir, "coinbridge.log");
        let (writer, guard) = non_blocking(file_appender);
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    if config.format == "json" {
        // 文件与控制台均使用JSON格式
        let file_layer = file_writer.map(|w| {
            fmt::layer()
                .json()
                .with_writer(w)
                .with_timer(ChronoUtc::rfc_3339())
        });
        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
            .try_init()
            .context("Failed to install JSON subscriber")?;
    } else {
        let file_layer = file_writer.map(|w| {
            fmt::layer()
                .with_writer(w)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
        });
        Registry::default()
            .with(filter)
            .with(file_layer)
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true),
            )
            .try_init()
            .context("Failed to install text subscriber")?;
    }

    Ok(guard)
}
