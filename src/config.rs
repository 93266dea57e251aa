//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::AccountAddress;

/// 参考实现中充值的收款（销毁）地址
pub const DEFAULT_TREASURY_ADDRESS: &str = "62KxdkaQxddMKwrML2AQka13jgZ6ieVTTWpRWS3itch8";

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub solana: SolanaConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub custody: CustodyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// Solana RPC 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: String,
    pub confirm_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

/// 兑换配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// 充值收款地址
    pub treasury_address: String,
    /// 同一用户并发请求的排队等待上限
    pub operation_lock_timeout_secs: u64,
}

/// 游戏币账本配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub data_dir: String,
    /// 首次读取（无记录）时的初始余额
    pub default_balance: u64,
}

/// 托管环境
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodyEnvironment {
    /// 允许通过水龙头补充托管钱包
    Development,
    /// 托管钱包需预先注资，不请求空投
    Production,
}

impl std::str::FromStr for CustodyEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" | "devnet" => Ok(Self::Development),
            "production" | "prod" | "mainnet" => Ok(Self::Production),
            other => anyhow::bail!("Unknown custody environment: {}", other),
        }
    }
}

/// 托管钱包（游戏钱包）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    pub environment: CustodyEnvironment,
    pub keypair_path: String,
    /// 单次水龙头申请额度
    pub faucet_grant_lamports: u64,
    /// 预留手续费
    pub fee_reserve_lamports: u64,
}

/// 管理接口配置；未设置令牌时 /admin 一律拒绝
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: std::env::var("LOG_FILE_ENABLED")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: std::env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.devnet.solana.com".into()),
            commitment: "confirmed".into(),
            confirm_timeout_secs: std::env::var("SOLANA_CONFIRM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            poll_interval_ms: std::env::var("SOLANA_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            request_timeout_secs: 15,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            treasury_address: std::env::var("TREASURY_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_TREASURY_ADDRESS.into()),
            operation_lock_timeout_secs: std::env::var("OPERATION_LOCK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("LEDGER_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            default_balance: std::env::var("LEDGER_DEFAULT_BALANCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            environment: std::env::var("CUSTODY_ENVIRONMENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(CustodyEnvironment::Development),
            keypair_path: std::env::var("CUSTODY_KEYPAIR_PATH")
                .unwrap_or_else(|_| "./data/custody-keypair.json".into()),
            faucet_grant_lamports: std::env::var("CUSTODY_FAUCET_GRANT_LAMPORTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5 * crate::domain::LAMPORTS_PER_SOL),
            fee_reserve_lamports: 10_000,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}

impl SolanaConfig {
    pub fn confirm_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

impl ExchangeConfig {
    pub fn treasury(&self) -> Result<AccountAddress> {
        self.treasury_address
            .parse()
            .with_context(|| format!("Invalid treasury address: {}", self.treasury_address))
    }
}

impl LedgerConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            solana: SolanaConfig::default(),
            exchange: ExchangeConfig::default(),
            ledger: LedgerConfig::default(),
            custody: CustodyConfig::default(),
            admin: AdminConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件中出现的段覆盖环境变量）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                // 缺失的段由 serde(default) 回落到环境变量
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if !self.solana.rpc_url.starts_with("http://") && !self.solana.rpc_url.starts_with("https://")
        {
            anyhow::bail!("SOLANA_RPC_URL must start with http:// or https://");
        }

        let valid_commitments = ["processed", "confirmed", "finalized"];
        if !valid_commitments.contains(&self.solana.commitment.as_str()) {
            anyhow::bail!("solana.commitment must be one of: {:?}", valid_commitments);
        }

        if self.solana.confirm_timeout_secs == 0 || self.solana.poll_interval_ms == 0 {
            anyhow::bail!("Solana confirmation timeout and poll interval must be positive");
        }

        if self.exchange.operation_lock_timeout_secs == 0 {
            anyhow::bail!("OPERATION_LOCK_TIMEOUT_SECS must be positive");
        }

        self.exchange.treasury()?;

        if self.ledger.data_dir.trim().is_empty() {
            anyhow::bail!("LEDGER_DATA_DIR must not be empty");
        }

        match &self.admin.token {
            Some(token) if token.len() < 16 => {
                anyhow::bail!("ADMIN_TOKEN must be at least 16 characters");
            }
            Some(_) => {}
            None => tracing::warn!("ADMIN_TOKEN not set, admin endpoints are disabled"),
        }

        if self.custody.environment == CustodyEnvironment::Production
            && self.solana.rpc_url.contains("devnet")
        {
            tracing::warn!(
                rpc_url = %self.solana.rpc_url,
                "Production custody environment configured against a devnet RPC endpoint"
            );
        }

        Ok(())
    }
}
