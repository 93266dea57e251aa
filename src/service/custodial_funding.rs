//! 托管资金来源（游戏钱包）
//!
//! 提现方向的签名方。密钥持久化到磁盘（solana-keygen 兼容的 64 字节 JSON 数组），
//! 重启后地址不变。开发环境下余额不足时向水龙头申请空投；生产环境只校验余额。

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use zeroize::Zeroize;

use crate::{
    config::{CustodyConfig, CustodyEnvironment},
    domain::AccountAddress,
    infrastructure::atomic_file,
    service::chain_transfer::{ChainError, ChainTransferExecutor, KeypairSigner, TransferSigner},
};

/// 读取或生成托管密钥
pub async fn load_or_create_keypair(path: &Path) -> Result<KeypairSigner> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let signer = parse_keypair_json(&content)
                .with_context(|| format!("Invalid custodial keypair file: {:?}", path))?;
            tracing::info!(address = %signer.address(), "Custodial keypair loaded");
            Ok(signer)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let signer = KeypairSigner::generate();
            let mut json = keypair_to_json(&signer);
            let written = atomic_file::write_atomic(path, json.as_bytes()).await;
            json.zeroize();
            written.with_context(|| format!("Failed to persist custodial keypair: {:?}", path))?;
            restrict_permissions(path);
            tracing::warn!(
                address = %signer.address(),
                path = ?path,
                "Generated new custodial keypair; it must be funded before withdrawals"
            );
            Ok(signer)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read custodial keypair: {:?}", path)),
    }
}

fn parse_keypair_json(content: &str) -> Result<KeypairSigner> {
    let mut bytes: Vec<u8> = serde_json::from_str(content).context("Keypair is not a JSON byte array")?;
    if bytes.len() != 64 {
        let len = bytes.len();
        bytes.zeroize();
        anyhow::bail!("Keypair must contain 64 bytes, got {}", len);
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes[..32]);
    let signer = KeypairSigner::from_seed(&seed);
    seed.zeroize();

    let public_matches = signer.address().as_bytes()[..] == bytes[32..];
    bytes.zeroize();
    if !public_matches {
        anyhow::bail!("Keypair public half does not match its secret half");
    }
    Ok(signer)
}

fn keypair_to_json(signer: &KeypairSigner) -> String {
    let mut bytes = signer.signing_key().to_keypair_bytes().to_vec();
    let json = serde_json::to_string(&bytes).unwrap_or_default();
    bytes.zeroize();
    json
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, path = ?path, "Failed to restrict keypair file permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

pub struct CustodialFundingSource {
    signer: KeypairSigner,
    executor: Arc<ChainTransferExecutor>,
    environment: CustodyEnvironment,
    faucet_grant_lamports: u64,
    fee_reserve_lamports: u64,
    /// 串行化余额检查与空投，避免并发提现重复申请
    funding_lock: Mutex<()>,
}

impl CustodialFundingSource {
    pub fn new(
        signer: KeypairSigner,
        executor: Arc<ChainTransferExecutor>,
        config: &CustodyConfig,
    ) -> Self {
        Self {
            signer,
            executor,
            environment: config.environment,
            faucet_grant_lamports: config.faucet_grant_lamports,
            fee_reserve_lamports: config.fee_reserve_lamports,
            funding_lock: Mutex::new(()),
        }
    }

    pub fn signer(&self) -> &KeypairSigner {
        &self.signer
    }

    pub fn address(&self) -> AccountAddress {
        self.signer.address()
    }

    pub fn environment(&self) -> CustodyEnvironment {
        self.environment
    }

    pub async fn balance(&self) -> Result<u64, ChainError> {
        self.executor
            .rpc()
            .get_balance(&self.address())
            .await
            .map_err(|e| ChainError::FundingUnavailable(format!("failed to read custodial balance: {}", e)))
    }

    /// 确保托管钱包至少持有 `minimum` lamports（另加手续费预留）
    pub async fn ensure_funded(&self, minimum: u64) -> Result<(), ChainError> {
        let _guard = self.funding_lock.lock().await;

        let required = minimum.saturating_add(self.fee_reserve_lamports);
        let balance = self.balance().await?;
        if balance >= required {
            return Ok(());
        }

        match self.environment {
            CustodyEnvironment::Production => {
                tracing::error!(
                    address = %self.address(),
                    balance,
                    required,
                    "Custodial wallet underfunded"
                );
                Err(ChainError::FundingUnavailable(format!(
                    "custodial balance {} below required {}",
                    balance, required
                )))
            }
            CustodyEnvironment::Development => {
                let grant = self.faucet_grant_lamports.max(required - balance);
                self.airdrop(grant).await.map(|_| ())
            }
        }
    }

    /// 显式注资（审计日志）；仅开发环境可用
    pub async fn request_funding(&self, lamports: u64) -> Result<String, ChainError> {
        if lamports == 0 {
            return Err(ChainError::InvalidTransfer("lamports must be positive".into()));
        }
        if self.environment == CustodyEnvironment::Production {
            return Err(ChainError::FundingUnavailable(
                "faucet funding is disabled in production".into(),
            ));
        }
        let _guard = self.funding_lock.lock().await;
        self.airdrop(lamports).await
    }

    async fn airdrop(&self, lamports: u64) -> Result<String, ChainError> {
        let address = self.address();
        tracing::info!(target: "audit", address = %address, lamports, "Requesting faucet grant for custodial wallet");

        let signature = self
            .executor
            .rpc()
            .request_airdrop(&address, lamports)
            .await
            .map_err(|e| ChainError::FundingUnavailable(format!("faucet request failed: {}", e)))?;

        self.executor
            .wait_for_confirmation(&signature)
            .await
            .map_err(|e| ChainError::FundingUnavailable(format!("faucet grant not confirmed: {}", e)))?;

        tracing::info!(
            target: "audit",
            address = %address,
            lamports,
            signature = %signature,
            "Custodial wallet funded"
        );
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keypair_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");

        let first = load_or_create_keypair(&path).await.unwrap();
        let second = load_or_create_keypair(&path).await.unwrap();
        assert_eq!(first.address(), second.address());

        let content = std::fs::read_to_string(&path).unwrap();
        let bytes: Vec<u8> = serde_json::from_str(&content).unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[test]
    fn test_rejects_mismatched_keypair() {
        let signer = KeypairSigner::from_seed(&[3u8; 32]);
        let mut bytes = signer.signing_key().to_keypair_bytes().to_vec();
        bytes[40] ^= 0xff;
        let json = serde_json::to_string(&bytes).unwrap();
        assert!(parse_keypair_json(&json).is_err());
    }

    #[test]
    fn test_rejects_short_keypair() {
        assert!(parse_keypair_json("[1,2,3]").is_err());
        assert!(parse_keypair_json("\"nope\"").is_err());
    }
}
