//! 兑换编排服务
//!
//! 组合汇率换算、游戏币账本与链上转账，实现两条端到端流程：
//! - 充值（SOL → 游戏币）：先链上转账到收款地址，确认后才入账
//! - 提现（游戏币 → SOL）：先扣款预留，再由托管钱包转账；失败时退回扣款
//!
//! 同一地址的所有操作经操作锁串行化。确认超时视为“结果未知”，先查询签名
//! 状态再决定，绝不直接自动冲正。

use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{
        rate::{self, SOL_DECIMALS},
        AccountAddress, SignatureState, TransferRecord, LAMPORTS_PER_SOL, MIN_WITHDRAWAL_COINS,
        RATE, WITHDRAWAL_STEP_COINS,
    },
    infrastructure::{
        journal::JsonlJournal,
        operation_lock::{OperationGuard, OperationLock},
    },
    metrics,
    service::{
        chain_transfer::{ChainError, ChainTransferExecutor, TransferSigner},
        coin_ledger::{CoinLedger, LedgerError},
        custodial_funding::CustodialFundingSource,
        reconciliation::{ReconciliationKind, ReconciliationLog, ReconciliationRecord},
        retry::{Retrier, RetryConfig},
        wallet_session::WalletSession,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("another operation for {0} is still in progress")]
    OperationInProgress(String),
    #[error("signing rejected: {0}")]
    SigningRejected(String),
    #[error("submission failed: {reason}")]
    SubmissionFailed {
        reason: String,
        signature: Option<String>,
    },
    #[error("transfer {signature} not confirmed within {waited:?}; outcome unknown")]
    ConfirmationTimeout { signature: String, waited: Duration },
    #[error("funding unavailable: {0}")]
    FundingUnavailable(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("transfer {signature} confirmed but crediting {coins} coins failed: {cause}")]
    CreditFailedAfterTransfer {
        signature: String,
        coins: u64,
        cause: String,
    },
    #[error("reversal of {coins} coins failed after withdrawal error ({cause})")]
    ReversalFailed {
        coins: u64,
        cause: String,
        signature: Option<String>,
    },
}

impl ExchangeError {
    /// 稳定的机器可读错误类型
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::InvalidInput(_) => "invalid_input",
            ExchangeError::InsufficientBalance(_) => "insufficient_balance",
            ExchangeError::OperationInProgress(_) => "operation_in_progress",
            ExchangeError::SigningRejected(_) => "signing_rejected",
            ExchangeError::SubmissionFailed { .. } => "submission_failed",
            ExchangeError::ConfirmationTimeout { .. } => "confirmation_timeout",
            ExchangeError::FundingUnavailable(_) => "funding_unavailable",
            ExchangeError::StorageUnavailable(_) => "storage_unavailable",
            ExchangeError::CreditFailedAfterTransfer { .. } => "credit_failed_after_transfer",
            ExchangeError::ReversalFailed { .. } => "reversal_failed",
        }
    }

    /// 已知的交易签名
    pub fn signature(&self) -> Option<&str> {
        match self {
            ExchangeError::SubmissionFailed { signature, .. }
            | ExchangeError::ReversalFailed { signature, .. } => signature.as_deref(),
            ExchangeError::ConfirmationTimeout { signature, .. }
            | ExchangeError::CreditFailedAfterTransfer { signature, .. } => Some(signature),
            _ => None,
        }
    }

    /// 调用方输入问题（4xx），其余为系统故障
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvalidInput(_)
                | ExchangeError::InsufficientBalance(_)
                | ExchangeError::OperationInProgress(_)
        )
    }
}

impl From<ChainError> for ExchangeError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidTransfer(msg) => ExchangeError::InvalidInput(msg),
            ChainError::SigningRejected(msg) => ExchangeError::SigningRejected(msg),
            ChainError::SubmissionFailed { reason, signature } => {
                ExchangeError::SubmissionFailed { reason, signature }
            }
            ChainError::ConfirmationTimeout { signature, waited } => {
                ExchangeError::ConfirmationTimeout { signature, waited }
            }
            ChainError::FundingUnavailable(msg) => ExchangeError::FundingUnavailable(msg),
        }
    }
}

impl From<LedgerError> for ExchangeError {
    fn from(err: LedgerError) -> Self {
        match err {
            e @ LedgerError::InsufficientBalance { .. } => {
                ExchangeError::InsufficientBalance(e.to_string())
            }
            LedgerError::InvalidAmount(msg) => ExchangeError::InvalidInput(msg),
            LedgerError::StorageUnavailable(msg) => ExchangeError::StorageUnavailable(msg),
        }
    }
}

impl From<rate::RateError> for ExchangeError {
    fn from(err: rate::RateError) -> Self {
        ExchangeError::InvalidInput(err.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 结果类型
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub new_coin_balance: u64,
    pub coins: u64,
    pub sol_amount: Decimal,
    pub lamports: u64,
    pub destination: AccountAddress,
    pub game_wallet_address: AccountAddress,
    pub transaction_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpReceipt {
    pub new_coin_balance: u64,
    pub coins: u64,
    pub sol_amount: Decimal,
    pub lamports: u64,
    pub transaction_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReceipt {
    pub new_coin_balance: u64,
    pub credited_coins: u64,
    pub transaction_signature: Option<String>,
}

/// 客户端可见的兑换常量
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub rate: u64,
    pub lamports_per_sol: u64,
    pub min_withdrawal_coins: u64,
    pub withdrawal_step_coins: u64,
    pub treasury_address: AccountAddress,
    pub game_wallet_address: AccountAddress,
}

/// 已入账的充值签名（防止重复入账）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditedSignature {
    signature: String,
    owner: AccountAddress,
    coins: u64,
    credited_at: DateTime<Utc>,
}

pub struct ExchangeService {
    ledger: Arc<dyn CoinLedger>,
    executor: Arc<ChainTransferExecutor>,
    custody: Arc<CustodialFundingSource>,
    reconciliation: ReconciliationLog,
    credited_journal: JsonlJournal<CreditedSignature>,
    /// 懒加载的已入账签名集合
    credited: Mutex<Option<HashSet<String>>>,
    locks: OperationLock,
    lock_timeout: Duration,
    treasury: AccountAddress,
    compensation_retry: RetryConfig,
}

impl ExchangeService {
    pub fn new(
        ledger: Arc<dyn CoinLedger>,
        executor: Arc<ChainTransferExecutor>,
        custody: Arc<CustodialFundingSource>,
        data_dir: &Path,
        treasury: AccountAddress,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            executor,
            custody,
            reconciliation: ReconciliationLog::new(data_dir),
            credited_journal: JsonlJournal::new(data_dir.join("topup_signatures.jsonl")),
            credited: Mutex::new(None),
            locks: OperationLock::new(),
            lock_timeout,
            treasury,
            compensation_retry: RetryConfig::default(),
        }
    }

    /// 覆盖补偿入账的重试策略
    pub fn with_compensation_retry(mut self, config: RetryConfig) -> Self {
        self.compensation_retry = config;
        self
    }

    pub fn treasury(&self) -> AccountAddress {
        self.treasury
    }

    pub fn custody(&self) -> &CustodialFundingSource {
        &self.custody
    }

    pub fn info(&self) -> ExchangeInfo {
        ExchangeInfo {
            rate: RATE,
            lamports_per_sol: LAMPORTS_PER_SOL,
            min_withdrawal_coins: MIN_WITHDRAWAL_COINS,
            withdrawal_step_coins: WITHDRAWAL_STEP_COINS,
            treasury_address: self.treasury,
            game_wallet_address: self.custody.address(),
        }
    }

    pub async fn balance(&self, owner: &AccountAddress) -> Result<u64, ExchangeError> {
        self.ledger.read(owner).await.map_err(ExchangeError::from)
    }

    pub async fn reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>, ExchangeError> {
        self.reconciliation
            .list()
            .await
            .map_err(|e| ExchangeError::StorageUnavailable(format!("{:#}", e)))
    }

    /// 显式注资托管钱包（仅开发环境）
    pub async fn fund_custody(&self, lamports: u64) -> Result<String, ExchangeError> {
        self.custody
            .request_funding(lamports)
            .await
            .map_err(ExchangeError::from)
    }

    async fn lock(&self, owner: &AccountAddress) -> Result<OperationGuard, ExchangeError> {
        self.locks
            .acquire(&owner.to_base58(), self.lock_timeout)
            .await
            .map_err(|e| {
                tracing::warn!(owner = %owner, waited_ms = e.waited.as_millis() as u64, "Operation lock timeout");
                ExchangeError::OperationInProgress(owner.to_base58())
            })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 提现：游戏币 → SOL
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 提现 `coins` 到 `destination`；`client_sol` 为客户端自行计算的 SOL 数量，
    /// 提供时必须与服务端换算结果一致
    pub async fn withdraw(
        &self,
        destination: &AccountAddress,
        coins: u64,
        client_sol: Option<Decimal>,
    ) -> Result<WithdrawalReceipt, ExchangeError> {
        let result = self.withdraw_inner(destination, coins, client_sol).await;
        match &result {
            Ok(receipt) => metrics::inc_withdrawal(receipt.coins),
            Err(e) => metrics::inc_failure(e.kind()),
        }
        result
    }

    async fn withdraw_inner(
        &self,
        destination: &AccountAddress,
        coins: u64,
        client_sol: Option<Decimal>,
    ) -> Result<WithdrawalReceipt, ExchangeError> {
        if coins == 0 {
            return Err(ExchangeError::InvalidInput("coinAmount must be positive".into()));
        }
        if coins < MIN_WITHDRAWAL_COINS {
            return Err(ExchangeError::InvalidInput(format!(
                "minimum withdrawal is {} coins",
                MIN_WITHDRAWAL_COINS
            )));
        }
        let sol_amount = rate::coins_to_sol(coins);
        if let Some(claimed) = client_sol {
            let claimed = claimed
                .round_dp_with_strategy(SOL_DECIMALS, RoundingStrategy::ToZero)
                .normalize();
            if claimed != sol_amount {
                return Err(ExchangeError::InvalidInput(format!(
                    "solAmount {} does not match {} coins at rate {} (expected {})",
                    claimed, coins, RATE, sol_amount
                )));
            }
        }
        let game_wallet = self.custody.address();
        if *destination == game_wallet {
            return Err(ExchangeError::InvalidInput(
                "destination cannot be the game wallet".into(),
            ));
        }
        let lamports = rate::coins_to_lamports(coins);

        let _guard = self.lock(destination).await?;

        // 1. 先扣款预留
        let debited_balance = self.ledger.debit(destination, coins).await?;
        tracing::info!(
            owner = %destination,
            coins,
            lamports,
            new_balance = debited_balance,
            "Coins reserved for withdrawal"
        );

        // 2. 注资 + 转账
        let outcome = match self.custody.ensure_funded(lamports).await {
            Ok(()) => {
                self.executor
                    .transfer(self.custody.signer(), destination, lamports)
                    .await
            }
            Err(e) => Err(e),
        };

        let record = match outcome {
            Ok(record) => record,
            Err(ChainError::ConfirmationTimeout { signature, waited }) => {
                match self.executor.signature_state(&signature).await {
                    SignatureState::Confirmed(status) => {
                        tracing::info!(signature = %signature, "Withdrawal confirmed on status check after timeout");
                        TransferRecord {
                            signature,
                            from: game_wallet,
                            to: *destination,
                            lamports,
                            status,
                        }
                    }
                    SignatureState::Failed(reason) => {
                        let err = ExchangeError::SubmissionFailed {
                            reason: format!("transaction failed on chain: {}", reason),
                            signature: Some(signature),
                        };
                        return Err(self.compensate(destination, coins, lamports, err).await);
                    }
                    SignatureState::Unknown => {
                        // 不能自动冲正：转账可能仍会上链
                        self.reconciliation
                            .record(ReconciliationRecord::new(
                                ReconciliationKind::OutcomeUnknown,
                                *destination,
                                coins,
                                lamports,
                                Some(signature.clone()),
                                format!("withdrawal not confirmed within {:?}", waited),
                            ))
                            .await;
                        return Err(ExchangeError::ConfirmationTimeout { signature, waited });
                    }
                }
            }
            Err(e) => {
                return Err(self.compensate(destination, coins, lamports, e.into()).await);
            }
        };

        tracing::info!(
            target: "audit",
            owner = %destination,
            coins,
            lamports,
            signature = %record.signature,
            new_balance = debited_balance,
            "Withdrawal settled"
        );

        Ok(WithdrawalReceipt {
            new_coin_balance: debited_balance,
            coins,
            sol_amount,
            lamports,
            destination: *destination,
            game_wallet_address: game_wallet,
            transaction_signature: record.signature,
        })
    }

    /// 退回提现扣款；返回应报告给调用方的错误
    async fn compensate(
        &self,
        owner: &AccountAddress,
        coins: u64,
        lamports: u64,
        cause: ExchangeError,
    ) -> ExchangeError {
        tracing::warn!(owner = %owner, coins, error = %cause, "Withdrawal failed after debit, reversing");

        let retrier = Retrier::new(self.compensation_retry.clone());
        let ledger = &self.ledger;
        match retrier
            .run("withdrawal_reversal", |_| ledger.credit(owner, coins))
            .await
        {
            Ok(balance) => {
                metrics::inc_compensation();
                tracing::info!(
                    target: "audit",
                    owner = %owner,
                    coins,
                    restored_balance = balance,
                    "Withdrawal debit reversed"
                );
                cause
            }
            Err(e) => {
                let signature = cause.signature().map(str::to_string);
                self.reconciliation
                    .record(ReconciliationRecord::new(
                        ReconciliationKind::ReversalFailed,
                        *owner,
                        coins,
                        lamports,
                        signature.clone(),
                        format!("{}; reversal error: {}", cause, e),
                    ))
                    .await;
                ExchangeError::ReversalFailed {
                    coins,
                    cause: cause.to_string(),
                    signature,
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 充值：SOL → 游戏币
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 用户钱包签名转账 `sol` 到收款地址，确认后入账
    pub async fn top_up(
        &self,
        wallet: &dyn WalletSession,
        sol: Decimal,
    ) -> Result<TopUpReceipt, ExchangeError> {
        let result = self.top_up_inner(wallet, sol).await;
        match &result {
            Ok(receipt) => metrics::inc_topup(receipt.coins),
            Err(e) => metrics::inc_failure(e.kind()),
        }
        result
    }

    async fn top_up_inner(
        &self,
        wallet: &dyn WalletSession,
        sol: Decimal,
    ) -> Result<TopUpReceipt, ExchangeError> {
        let owner = wallet
            .current_address()
            .ok_or_else(|| ExchangeError::InvalidInput("wallet is not connected".into()))?;
        let signer = wallet
            .signer()
            .ok_or_else(|| ExchangeError::SigningRejected("wallet signer unavailable".into()))?;
        if signer.address() != owner {
            return Err(ExchangeError::SigningRejected(
                "wallet signer does not match connected address".into(),
            ));
        }

        let coins = rate::sol_to_coins(sol)?;
        if coins == 0 {
            return Err(ExchangeError::InvalidInput(format!(
                "{} SOL is worth less than one coin",
                sol
            )));
        }
        let lamports = rate::sol_to_lamports(sol)?;

        let available = wallet.query_native_balance(&owner).await.map_err(|e| {
            ExchangeError::SubmissionFailed {
                reason: format!("failed to query wallet balance: {}", e),
                signature: None,
            }
        })?;
        if lamports > available {
            return Err(ExchangeError::InsufficientBalance(format!(
                "wallet holds {} lamports, top-up needs {}",
                available, lamports
            )));
        }

        let _guard = self.lock(&owner).await?;

        let signature = self.transfer_to_treasury(signer, &owner, coins, lamports).await?;

        let new_balance = self.credit_after_transfer(&owner, coins, lamports, &signature).await?;
        self.remember_credited(&owner, coins, &signature).await;

        tracing::info!(
            target: "audit",
            owner = %owner,
            coins,
            lamports,
            signature = %signature,
            new_balance,
            "Top-up settled"
        );

        Ok(TopUpReceipt {
            new_coin_balance: new_balance,
            coins,
            sol_amount: sol.normalize(),
            lamports,
            transaction_signature: signature,
        })
    }

    async fn transfer_to_treasury(
        &self,
        signer: &dyn TransferSigner,
        owner: &AccountAddress,
        coins: u64,
        lamports: u64,
    ) -> Result<String, ExchangeError> {
        match self.executor.transfer(signer, &self.treasury, lamports).await {
            Ok(record) => Ok(record.signature),
            Err(ChainError::ConfirmationTimeout { signature, waited }) => {
                match self.executor.signature_state(&signature).await {
                    SignatureState::Confirmed(_) => Ok(signature),
                    SignatureState::Failed(reason) => Err(ExchangeError::SubmissionFailed {
                        reason: format!("transaction failed on chain: {}", reason),
                        signature: Some(signature),
                    }),
                    SignatureState::Unknown => {
                        self.reconciliation
                            .record(ReconciliationRecord::new(
                                ReconciliationKind::OutcomeUnknown,
                                *owner,
                                coins,
                                lamports,
                                Some(signature.clone()),
                                format!("top-up not confirmed within {:?}", waited),
                            ))
                            .await;
                        Err(ExchangeError::ConfirmationTimeout { signature, waited })
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn credit_after_transfer(
        &self,
        owner: &AccountAddress,
        coins: u64,
        lamports: u64,
        signature: &str,
    ) -> Result<u64, ExchangeError> {
        match self.ledger.credit(owner, coins).await {
            Ok(balance) => Ok(balance),
            Err(e) => {
                self.reconciliation
                    .record(ReconciliationRecord::new(
                        ReconciliationKind::CreditFailedAfterTransfer,
                        *owner,
                        coins,
                        lamports,
                        Some(signature.to_string()),
                        e.to_string(),
                    ))
                    .await;
                Err(ExchangeError::CreditFailedAfterTransfer {
                    signature: signature.to_string(),
                    coins,
                    cause: e.to_string(),
                })
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 充值确认（客户端已自行完成转账）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 客户端转账后的入账确认；带签名时先核实链上状态并拒绝重复入账
    pub async fn confirm_top_up(
        &self,
        owner: &AccountAddress,
        coins: u64,
        signature: Option<&str>,
    ) -> Result<CreditReceipt, ExchangeError> {
        let result = self.confirm_top_up_inner(owner, coins, signature).await;
        match &result {
            Ok(receipt) => metrics::inc_topup(receipt.credited_coins),
            Err(e) => metrics::inc_failure(e.kind()),
        }
        result
    }

    async fn confirm_top_up_inner(
        &self,
        owner: &AccountAddress,
        coins: u64,
        signature: Option<&str>,
    ) -> Result<CreditReceipt, ExchangeError> {
        if coins == 0 {
            return Err(ExchangeError::InvalidInput("additionalCoins must be positive".into()));
        }

        let _guard = self.lock(owner).await?;

        let Some(signature) = signature else {
            let new_balance = self.ledger.credit(owner, coins).await?;
            tracing::info!(target: "audit", owner = %owner, coins, new_balance, "Top-up credited without signature");
            return Ok(CreditReceipt {
                new_coin_balance: new_balance,
                credited_coins: coins,
                transaction_signature: None,
            });
        };

        if !matches!(bs58::decode(signature).into_vec().map(|b| b.len()), Ok(64)) {
            return Err(ExchangeError::InvalidInput(
                "transactionSignature is not a base58 signature".into(),
            ));
        }
        self.ensure_not_credited(signature).await?;

        match self.executor.wait_for_confirmation(signature).await {
            Ok(_) => {}
            Err(ChainError::ConfirmationTimeout { signature: sig, waited }) => {
                match self.executor.signature_state(&sig).await {
                    SignatureState::Confirmed(_) => {
                        tracing::info!(signature = %sig, "Top-up confirmed on status check after timeout");
                    }
                    SignatureState::Failed(reason) => {
                        return Err(ExchangeError::SubmissionFailed {
                            reason: format!("transaction failed on chain: {}", reason),
                            signature: Some(sig),
                        });
                    }
                    SignatureState::Unknown => {
                        return Err(ExchangeError::ConfirmationTimeout { signature: sig, waited });
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        // 等待确认期间其它地址可能提交了同一签名
        let mut credited = self.credited_set().await?;
        if credited.as_ref().is_some_and(|set| set.contains(signature)) {
            return Err(already_credited(signature));
        }
        let lamports = rate::coins_to_lamports(coins);
        let new_balance = self.credit_after_transfer(owner, coins, lamports, signature).await?;
        credited
            .get_or_insert_with(HashSet::new)
            .insert(signature.to_string());
        drop(credited);
        self.append_credited(owner, coins, signature).await;

        tracing::info!(
            target: "audit",
            owner = %owner,
            coins,
            signature = %signature,
            new_balance,
            "Top-up confirmed and credited"
        );

        Ok(CreditReceipt {
            new_coin_balance: new_balance,
            credited_coins: coins,
            transaction_signature: Some(signature.to_string()),
        })
    }

    async fn credited_set(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<HashSet<String>>>, ExchangeError> {
        let mut guard = self.credited.lock().await;
        if guard.is_none() {
            let entries = self
                .credited_journal
                .load()
                .await
                .map_err(|e| ExchangeError::StorageUnavailable(format!("{:#}", e)))?;
            *guard = Some(entries.into_iter().map(|e| e.signature).collect());
        }
        Ok(guard)
    }

    async fn ensure_not_credited(&self, signature: &str) -> Result<(), ExchangeError> {
        let credited = self.credited_set().await?;
        if credited.as_ref().is_some_and(|set| set.contains(signature)) {
            return Err(already_credited(signature));
        }
        Ok(())
    }

    async fn remember_credited(&self, owner: &AccountAddress, coins: u64, signature: &str) {
        match self.credited_set().await {
            Ok(mut credited) => {
                credited
                    .get_or_insert_with(HashSet::new)
                    .insert(signature.to_string());
            }
            Err(e) => tracing::warn!(error = %e, "Credited signature set unavailable"),
        }
        self.append_credited(owner, coins, signature).await;
    }

    async fn append_credited(&self, owner: &AccountAddress, coins: u64, signature: &str) {
        let entry = CreditedSignature {
            signature: signature.to_string(),
            owner: *owner,
            coins,
            credited_at: Utc::now(),
        };
        if let Err(e) = self.credited_journal.append(&entry).await {
            // 内存集合仍能阻止本进程内的重复入账
            tracing::error!(error = ?e, signature = %signature, "Failed to journal credited top-up signature");
        }
    }
}

fn already_credited(signature: &str) -> ExchangeError {
    ExchangeError::InvalidInput(format!("transaction {} was already credited", signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(ExchangeError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(
            ExchangeError::CreditFailedAfterTransfer {
                signature: "s".into(),
                coins: 1,
                cause: "disk".into()
            }
            .kind(),
            "credit_failed_after_transfer"
        );
        assert!(ExchangeError::OperationInProgress("a".into()).is_client_error());
        assert!(!ExchangeError::StorageUnavailable("a".into()).is_client_error());
    }

    #[test]
    fn test_chain_error_conversion_keeps_signature() {
        let err: ExchangeError = ChainError::SubmissionFailed {
            reason: "insufficient funds".into(),
            signature: Some("sig".into()),
        }
        .into();
        assert_eq!(err.signature(), Some("sig"));
        assert_eq!(err.kind(), "submission_failed");
    }

    #[test]
    fn test_ledger_insufficient_balance_conversion() {
        let err: ExchangeError = LedgerError::InsufficientBalance {
            requested: 5,
            available: 1,
        }
        .into();
        assert_eq!(err.kind(), "insufficient_balance");
    }
}
