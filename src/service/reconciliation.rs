//! 对账记录
//! 跨系统不一致（链上与账本不符）无法自动修复，记录下来交给运维人工处理

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{domain::AccountAddress, infrastructure::journal::JsonlJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// 链上转账已确认，但入账失败
    CreditFailedAfterTransfer,
    /// 提现失败后退回游戏币失败，用户少了余额
    ReversalFailed,
    /// 转账在超时前未确认且状态查询无结果，扣款未退回
    OutcomeUnknown,
}

/// 对账记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub kind: ReconciliationKind,
    pub owner: AccountAddress,
    pub coins: u64,
    pub lamports: u64,
    pub signature: Option<String>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn new(
        kind: ReconciliationKind,
        owner: AccountAddress,
        coins: u64,
        lamports: u64,
        signature: Option<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            owner,
            coins,
            lamports,
            signature,
            error_message: error_message.into(),
            created_at: Utc::now(),
        }
    }
}

pub struct ReconciliationLog {
    journal: JsonlJournal<ReconciliationRecord>,
}

impl ReconciliationLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            journal: JsonlJournal::new(data_dir.join("reconciliation.jsonl")),
        }
    }

    /// 记录一条待处理项；写入失败时至少保证错误日志里有完整信息
    pub async fn record(&self, record: ReconciliationRecord) {
        tracing::error!(
            target: "audit",
            id = %record.id,
            kind = ?record.kind,
            owner = %record.owner,
            coins = record.coins,
            lamports = record.lamports,
            signature = ?record.signature,
            error = %record.error_message,
            "Reconciliation required"
        );
        crate::metrics::inc_reconciliation(record.kind);

        if let Err(e) = self.journal.append(&record).await {
            tracing::error!(
                error = ?e,
                id = %record.id,
                "Failed to persist reconciliation record"
            );
        }
    }

    pub async fn list(&self) -> Result<Vec<ReconciliationRecord>> {
        self.journal.load().await
    }
}
