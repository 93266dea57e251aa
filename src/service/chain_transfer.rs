// 链上转账执行器
// 步骤：获取 blockhash → 构建转账指令 → 签名 → 广播 → 等待 confirmed 确认
//
// 注意：执行器本身不做幂等重试。结果未知（超时）时，调用方必须先用
// signature_state 查询原签名，不能直接重新发起转账。

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

use crate::{
    config::SolanaConfig,
    domain::{AccountAddress, SignatureState, TransferRecord, TransferStatus},
    infrastructure::solana_rpc::{explorer_tx_url, RpcError, SolanaRpc},
    service::solana_tx::{encode_signed_transaction, TransferMessage},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("transfer rejected before submission: {0}")]
    InvalidTransfer(String),
    #[error("signing rejected: {0}")]
    SigningRejected(String),
    #[error("submission failed: {reason}")]
    SubmissionFailed {
        reason: String,
        signature: Option<String>,
    },
    #[error("confirmation of {signature} not observed within {waited:?}")]
    ConfirmationTimeout { signature: String, waited: Duration },
    #[error("funding unavailable: {0}")]
    FundingUnavailable(String),
}

impl ChainError {
    /// 已知的交易签名（用于人工对账）
    pub fn signature(&self) -> Option<&str> {
        match self {
            ChainError::SubmissionFailed { signature, .. } => signature.as_deref(),
            ChainError::ConfirmationTimeout { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

/// 转账签名方：客户端交互式钱包或服务端持有的密钥
#[async_trait]
pub trait TransferSigner: Send + Sync {
    fn address(&self) -> AccountAddress;

    /// 对消息字节签名；拒绝或不可用时返回 `ChainError::SigningRejected`
    async fn sign(&self, message: &[u8]) -> Result<[u8; 64], ChainError>;
}

/// 服务端密钥签名
pub struct KeypairSigner {
    signing_key: SigningKey,
}

impl KeypairSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(seed))
    }

    pub fn generate() -> Self {
        use rand::RngCore;

        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let signer = Self::from_seed(&seed);
        zeroize::Zeroize::zeroize(&mut seed);
        signer
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransferSigner for KeypairSigner {
    fn address(&self) -> AccountAddress {
        AccountAddress::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    async fn sign(&self, message: &[u8]) -> Result<[u8; 64], ChainError> {
        Ok(self.signing_key.sign(message).to_bytes())
    }
}

pub struct ChainTransferExecutor {
    rpc: Arc<dyn SolanaRpc>,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl ChainTransferExecutor {
    pub fn new(rpc: Arc<dyn SolanaRpc>, confirm_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            rpc,
            confirm_timeout,
            poll_interval,
        }
    }

    pub fn from_config(rpc: Arc<dyn SolanaRpc>, config: &SolanaConfig) -> Self {
        Self::new(rpc, config.confirm_timeout(), config.poll_interval())
    }

    pub fn rpc(&self) -> &Arc<dyn SolanaRpc> {
        &self.rpc
    }

    /// 执行一次转账并等待 confirmed
    pub async fn transfer(
        &self,
        from: &dyn TransferSigner,
        to: &AccountAddress,
        lamports: u64,
    ) -> Result<TransferRecord, ChainError> {
        let from_address = from.address();
        if lamports == 0 {
            return Err(ChainError::InvalidTransfer("lamports must be positive".into()));
        }
        if from_address == *to {
            return Err(ChainError::InvalidTransfer(
                "source and destination are the same account".into(),
            ));
        }

        // (a) 获取 blockhash
        let recent_blockhash =
            self.rpc
                .get_latest_blockhash()
                .await
                .map_err(|e| ChainError::SubmissionFailed {
                    reason: format!("failed to fetch recent blockhash: {}", e),
                    signature: None,
                })?;

        // (b) 构建转账指令
        let message = TransferMessage {
            from: from_address,
            to: *to,
            lamports,
            recent_blockhash,
        }
        .serialize();

        // (c) 签名
        let signature_bytes = from.sign(&message).await?;
        verify_signature(&from_address, &message, &signature_bytes)?;
        let signature = bs58::encode(signature_bytes).into_string();

        // (d) 广播
        let wire_tx = encode_signed_transaction(&signature_bytes, &message);
        match self.rpc.send_transaction(&wire_tx).await {
            Ok(returned) => {
                if returned != signature {
                    tracing::warn!(
                        expected = %signature,
                        returned = %returned,
                        "RPC returned a different signature than the one signed"
                    );
                }
            }
            Err(RpcError::Rpc { code, message }) => {
                tracing::warn!(
                    signature = %signature,
                    code,
                    error = %message,
                    "Transaction rejected by network"
                );
                return Err(ChainError::SubmissionFailed {
                    reason: format!("RPC error {}: {}", code, message),
                    signature: Some(signature),
                });
            }
            Err(e) => {
                // 请求可能已到达节点，结果未知，继续等待确认
                tracing::warn!(
                    signature = %signature,
                    error = %e,
                    "Transaction submission outcome unknown, waiting for confirmation"
                );
            }
        }

        // (e) 等待确认
        let status = self.wait_for_confirmation(&signature).await?;

        tracing::info!(
            signature = %signature,
            from = %from_address,
            to = %to,
            lamports,
            explorer = %explorer_tx_url(self.rpc.endpoint(), &signature),
            "Transfer confirmed"
        );

        Ok(TransferRecord {
            signature,
            from: from_address,
            to: *to,
            lamports,
            status,
        })
    }

    /// 轮询签名状态直到 confirmed，超过 confirm_timeout 返回 ConfirmationTimeout
    pub async fn wait_for_confirmation(&self, signature: &str) -> Result<TransferStatus, ChainError> {
        let poll = async {
            loop {
                match self.rpc.get_signature_status(signature).await {
                    Ok(Some(status)) => {
                        if let Some(err) = status.err {
                            return Err(ChainError::SubmissionFailed {
                                reason: format!("transaction failed on chain: {}", err),
                                signature: Some(signature.to_string()),
                            });
                        }
                        if let Some(level) = status.confirmation_status {
                            if level.is_confirmed() {
                                return Ok(level);
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(signature = %signature, error = %e, "Signature status poll failed");
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.confirm_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    signature = %signature,
                    waited_secs = self.confirm_timeout.as_secs_f64(),
                    "Confirmation timeout"
                );
                Err(ChainError::ConfirmationTimeout {
                    signature: signature.to_string(),
                    waited: self.confirm_timeout,
                })
            }
        }
    }

    /// 超时后的一次性状态查询
    pub async fn signature_state(&self, signature: &str) -> SignatureState {
        match self.rpc.get_signature_status(signature).await {
            Ok(Some(status)) => match (status.err, status.confirmation_status) {
                (Some(err), _) => SignatureState::Failed(err),
                (None, Some(level)) if level.is_confirmed() => SignatureState::Confirmed(level),
                _ => SignatureState::Unknown,
            },
            Ok(None) => SignatureState::Unknown,
            Err(e) => {
                tracing::warn!(signature = %signature, error = %e, "Signature status check failed");
                SignatureState::Unknown
            }
        }
    }
}

fn verify_signature(
    signer: &AccountAddress,
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), ChainError> {
    let key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|e| ChainError::SigningRejected(format!("signer address is not a valid ed25519 key: {}", e)))?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify_strict(message, &sig)
        .map_err(|_| ChainError::SigningRejected("signature does not match signer".into()))
}
