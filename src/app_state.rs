use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::{
    config::Config,
    infrastructure::solana_rpc::{SolanaRpc, SolanaRpcClient},
    service::{
        chain_transfer::ChainTransferExecutor,
        coin_ledger::FileCoinLedger,
        custodial_funding::{load_or_create_keypair, CustodialFundingSource},
        exchange::ExchangeService,
    },
};

/// 应用状态
/// 包含所有共享资源
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rpc: Arc<dyn SolanaRpc>,
    pub exchange: Arc<ExchangeService>,
}

impl AppState {
    /// 使用真实 RPC 客户端创建应用状态
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let rpc: Arc<dyn SolanaRpc> = Arc::new(SolanaRpcClient::new(&config.solana));
        Self::with_rpc(config, rpc).await
    }

    /// 使用给定的 RPC 实现装配所有服务
    pub async fn with_rpc(config: Arc<Config>, rpc: Arc<dyn SolanaRpc>) -> Result<Self> {
        let data_dir = config.ledger.data_path();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data dir: {:?}", data_dir))?;

        let treasury = config.exchange.treasury()?;
        let executor = Arc::new(ChainTransferExecutor::from_config(rpc.clone(), &config.solana));

        let signer = load_or_create_keypair(Path::new(&config.custody.keypair_path)).await?;
        let custody = Arc::new(CustodialFundingSource::new(
            signer,
            executor.clone(),
            &config.custody,
        ));

        let ledger = Arc::new(FileCoinLedger::new(&data_dir, config.ledger.default_balance));

        let exchange = Arc::new(ExchangeService::new(
            ledger,
            executor,
            custody,
            &data_dir,
            treasury,
            Duration::from_secs(config.exchange.operation_lock_timeout_secs),
        ));

        tracing::info!(
            rpc = %rpc.endpoint(),
            treasury = %treasury,
            game_wallet = %exchange.custody().address(),
            environment = ?exchange.custody().environment(),
            data_dir = ?data_dir,
            "Application state initialized"
        );

        Ok(Self {
            config,
            rpc,
            exchange,
        })
    }
}
