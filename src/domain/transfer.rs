//! 链上转账记录

use serde::{Deserialize, Serialize};

use super::address::AccountAddress;

/// 交易确认级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Processed,
    Confirmed,
    Finalized,
}

impl TransferStatus {
    /// 是否达到 confirmed 级别
    pub fn is_confirmed(self) -> bool {
        matches!(self, TransferStatus::Confirmed | TransferStatus::Finalized)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(Self::Processed),
            "confirmed" => Some(Self::Confirmed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// 一次已确认转账的结果，确认后不可变，仅返回给调用方（持久性在链上）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub signature: String,
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub lamports: u64,
    pub status: TransferStatus,
}

/// 超时后查询签名得到的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    /// 已达到 confirmed 级别且执行成功
    Confirmed(TransferStatus),
    /// 已上链但执行失败
    Failed(String),
    /// 网络尚未看到该签名，或只到 processed 级别
    Unknown,
}
