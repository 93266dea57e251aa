//! 钱包会话能力
//!
//! 钱包身份组件（连接/断开、地址发现）不属于结算核心，核心只通过这个
//! 能力对象获取：已验证的地址、链上余额查询、交互式签名（仅充值方向）。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::AccountAddress,
    infrastructure::solana_rpc::{RpcError, SolanaRpc},
    service::chain_transfer::{KeypairSigner, TransferSigner},
};

#[async_trait]
pub trait WalletSession: Send + Sync {
    /// 当前连接的地址；未连接时为 None
    fn current_address(&self) -> Option<AccountAddress>;

    /// 查询地址的原生币余额（lamports）
    async fn query_native_balance(&self, address: &AccountAddress) -> Result<u64, RpcError>;

    /// 用户持有的签名方；未连接时为 None
    fn signer(&self) -> Option<&dyn TransferSigner>;
}

/// 本地密钥支撑的钱包会话（CLI、脚本与测试使用）
pub struct KeypairWallet {
    signer: Option<KeypairSigner>,
    rpc: Arc<dyn SolanaRpc>,
}

impl KeypairWallet {
    pub fn connected(signer: KeypairSigner, rpc: Arc<dyn SolanaRpc>) -> Self {
        Self {
            signer: Some(signer),
            rpc,
        }
    }

    pub fn disconnected(rpc: Arc<dyn SolanaRpc>) -> Self {
        Self { signer: None, rpc }
    }
}

#[async_trait]
impl WalletSession for KeypairWallet {
    fn current_address(&self) -> Option<AccountAddress> {
        self.signer.as_ref().map(|s| s.address())
    }

    async fn query_native_balance(&self, address: &AccountAddress) -> Result<u64, RpcError> {
        self.rpc.get_balance(address).await
    }

    fn signer(&self) -> Option<&dyn TransferSigner> {
        self.signer.as_ref().map(|s| s as &dyn TransferSigner)
    }
}
