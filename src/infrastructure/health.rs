//! 健康检查模块
//! 检查 Solana RPC 可达性与账本数据目录

use std::{path::Path, time::Instant};

use serde::Serialize;
use utoipa::ToSchema;

use crate::infrastructure::solana_rpc::SolanaRpc;

/// 健康检查结果
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResult {
    pub status: String, // "healthy" | "degraded" | "unhealthy"
    pub components: ComponentHealth,
    pub timestamp: String,
}

/// 组件健康状态
#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub rpc: ComponentStatus,
    pub storage: ComponentStatus,
}

/// 组件状态
#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentStatus {
    pub status: String, // "ok" | "error"
    pub message: String,
    pub latency_ms: Option<u64>,
}

impl ComponentStatus {
    fn ok(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
            latency_ms: Some(latency_ms),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            latency_ms: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// 执行完整健康检查
pub async fn check_health(rpc: &dyn SolanaRpc, data_dir: &Path) -> HealthCheckResult {
    let (rpc_status, storage_status) = tokio::join!(check_rpc(rpc), check_storage(data_dir));

    HealthCheckResult {
        status: determine_overall_status(&rpc_status, &storage_status),
        components: ComponentHealth {
            rpc: rpc_status,
            storage: storage_status,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// 检查 RPC：能取到最新 blockhash 视为可用
async fn check_rpc(rpc: &dyn SolanaRpc) -> ComponentStatus {
    let start = Instant::now();
    match rpc.get_latest_blockhash().await {
        Ok(_) => ComponentStatus::ok(
            format!("RPC {} reachable", rpc.endpoint()),
            start.elapsed().as_millis() as u64,
        ),
        Err(e) => ComponentStatus::error(format!("RPC error: {}", e)),
    }
}

async fn check_storage(data_dir: &Path) -> ComponentStatus {
    let start = Instant::now();
    match tokio::fs::metadata(data_dir).await {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => ComponentStatus::ok(
            "Ledger data dir writable",
            start.elapsed().as_millis() as u64,
        ),
        Ok(_) => ComponentStatus::error(format!("{:?} is not a writable directory", data_dir)),
        Err(e) => ComponentStatus::error(format!("Ledger data dir unavailable: {}", e)),
    }
}

/// 账本不可用时服务不可用；RPC 异常只影响链上流程
fn determine_overall_status(rpc: &ComponentStatus, storage: &ComponentStatus) -> String {
    match (rpc.is_ok(), storage.is_ok()) {
        (true, true) => "healthy".to_string(),
        (false, true) => "degraded".to_string(),
        _ => "unhealthy".to_string(),
    }
}
