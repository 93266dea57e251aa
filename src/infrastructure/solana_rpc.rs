// Solana JSON-RPC 客户端
// 只实现结算流程需要的方法：blockhash、广播、签名状态、余额、水龙头空投

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::{config::SolanaConfig, domain::{AccountAddress, TransferStatus}};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// 请求未得到响应（连接失败、超时等），结果未知
    #[error("RPC transport error: {0}")]
    Transport(String),
    /// 节点明确返回了错误
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// `getSignatureStatuses` 返回的单条状态
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub confirmation_status: Option<TransferStatus>,
    /// 链上执行错误（None 表示执行成功）
    pub err: Option<String>,
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    /// 获取最新 blockhash（绑定交易有效期）
    async fn get_latest_blockhash(&self) -> Result<[u8; 32], RpcError>;

    /// 广播已签名交易，返回签名
    async fn send_transaction(&self, wire_tx: &[u8]) -> Result<String, RpcError>;

    /// 查询签名状态；节点未见过该签名时返回 None
    async fn get_signature_status(&self, signature: &str)
        -> Result<Option<SignatureStatus>, RpcError>;

    /// 查询余额（lamports）
    async fn get_balance(&self, address: &AccountAddress) -> Result<u64, RpcError>;

    /// 请求水龙头空投（仅测试网络）
    async fn request_airdrop(&self, address: &AccountAddress, lamports: u64)
        -> Result<String, RpcError>;

    fn endpoint(&self) -> &str;
}

pub struct SolanaRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
    commitment: String,
}

impl SolanaRpcClient {
    pub fn new(config: &SolanaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            rpc_url: config.rpc_url.clone(),
            commitment: config.commitment.clone(),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        tracing::debug!(method = %method, endpoint = %self.rpc_url, "Solana RPC call");

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{}: {}", method, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(format!("{}: failed to read body: {}", method, e)))?;

        // 429/5xx 视为传输层失败
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RpcError::Transport(format!(
                "{}: HTTP {}: {}",
                method, status, body
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = json.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown RPC error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse(format!("{}: missing result", method)))
    }
}

#[derive(Deserialize)]
struct ContextValue<T> {
    value: T,
}

#[derive(Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignatureStatus {
    slot: u64,
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

fn parse_value<T: serde::de::DeserializeOwned>(
    method: &str,
    value: serde_json::Value,
) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))
}

pub(crate) fn decode_blockhash(blockhash: &str) -> Result<[u8; 32], RpcError> {
    let bytes = bs58::decode(blockhash)
        .into_vec()
        .map_err(|e| RpcError::InvalidResponse(format!("blockhash is not base58: {}", e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| RpcError::InvalidResponse(format!("blockhash has {} bytes", bytes.len())))
}

#[async_trait]
impl SolanaRpc for SolanaRpcClient {
    async fn get_latest_blockhash(&self) -> Result<[u8; 32], RpcError> {
        let result = self
            .call(
                "getLatestBlockhash",
                serde_json::json!([{ "commitment": self.commitment }]),
            )
            .await?;
        let ctx: ContextValue<BlockhashValue> = parse_value("getLatestBlockhash", result)?;
        decode_blockhash(&ctx.value.blockhash)
    }

    async fn send_transaction(&self, wire_tx: &[u8]) -> Result<String, RpcError> {
        let tx_base64 = base64::engine::general_purpose::STANDARD.encode(wire_tx);
        let result = self
            .call(
                "sendTransaction",
                serde_json::json!([
                    tx_base64,
                    {
                        "encoding": "base64",
                        "skipPreflight": false,
                        "preflightCommitment": self.commitment,
                    }
                ]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::InvalidResponse("sendTransaction: result is not a string".into()))
    }

    async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        let result = self
            .call(
                "getSignatureStatuses",
                serde_json::json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;
        let ctx: ContextValue<Vec<Option<RawSignatureStatus>>> =
            parse_value("getSignatureStatuses", result)?;

        Ok(ctx.value.into_iter().next().flatten().map(|raw| SignatureStatus {
            slot: raw.slot,
            confirmation_status: raw
                .confirmation_status
                .as_deref()
                .and_then(TransferStatus::parse),
            err: raw.err.filter(|e| !e.is_null()).map(|e| e.to_string()),
        }))
    }

    async fn get_balance(&self, address: &AccountAddress) -> Result<u64, RpcError> {
        let result = self
            .call(
                "getBalance",
                serde_json::json!([address.to_string(), { "commitment": self.commitment }]),
            )
            .await?;
        let ctx: ContextValue<u64> = parse_value("getBalance", result)?;
        Ok(ctx.value)
    }

    async fn request_airdrop(
        &self,
        address: &AccountAddress,
        lamports: u64,
    ) -> Result<String, RpcError> {
        let result = self
            .call(
                "requestAirdrop",
                serde_json::json!([address.to_string(), lamports, { "commitment": self.commitment }]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::InvalidResponse("requestAirdrop: result is not a string".into()))
    }

    fn endpoint(&self) -> &str {
        &self.rpc_url
    }
}

/// 根据 RPC 地址推断浏览器 cluster 参数
pub fn explorer_cluster(rpc_url: &str) -> &'static str {
    if rpc_url.contains("devnet") {
        "devnet"
    } else if rpc_url.contains("testnet") {
        "testnet"
    } else if rpc_url.contains("127.0.0.1") || rpc_url.contains("localhost") {
        "custom"
    } else {
        "mainnet-beta"
    }
}

pub fn explorer_tx_url(rpc_url: &str, signature: &str) -> String {
    format!(
        "https://explorer.solana.com/tx/{}?cluster={}",
        signature,
        explorer_cluster(rpc_url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_blockhash() {
        let hash = [7u8; 32];
        let encoded = bs58::encode(hash).into_string();
        assert_eq!(decode_blockhash(&encoded).unwrap(), hash);
        assert!(decode_blockhash("abc").is_err());
    }

    #[test]
    fn test_parse_signature_statuses_payload() {
        let result = serde_json::json!({
            "context": { "slot": 82 },
            "value": [
                { "slot": 72, "confirmations": 10, "err": null, "status": { "Ok": null }, "confirmationStatus": "confirmed" }
            ]
        });
        let ctx: ContextValue<Vec<Option<RawSignatureStatus>>> =
            parse_value("getSignatureStatuses", result).unwrap();
        let raw = ctx.value.into_iter().next().flatten().unwrap();
        assert_eq!(raw.slot, 72);
        assert_eq!(raw.confirmation_status.as_deref(), Some("confirmed"));
        assert!(raw.err.is_none());
    }

    #[test]
    fn test_explorer_url() {
        assert_eq!(
            explorer_tx_url("https://api.devnet.solana.com", "sig"),
            "https://explorer.solana.com/tx/sig?cluster=devnet"
        );
        assert_eq!(explorer_cluster("https://api.mainnet-beta.solana.com"), "mainnet-beta");
    }
}
