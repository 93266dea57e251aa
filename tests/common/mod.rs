//! 测试辅助模块
//! 提供内存版 Solana RPC、可注入故障的账本，以及基于临时目录的服务装配

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use coinbridge::{
    config::{Config, CustodyConfig, CustodyEnvironment, DEFAULT_TREASURY_ADDRESS},
    domain::{AccountAddress, TransferStatus},
    infrastructure::solana_rpc::{RpcError, SignatureStatus, SolanaRpc},
    service::{
        chain_transfer::{ChainTransferExecutor, KeypairSigner},
        coin_ledger::{CoinLedger, FileCoinLedger, LedgerError},
        custodial_funding::CustodialFundingSource,
        exchange::ExchangeService,
        retry::RetryConfig,
    },
};
use tempfile::TempDir;

pub const FEE_LAMPORTS: u64 = 5_000;

pub const TEST_ADMIN_TOKEN: &str = "test-admin-token-0123456789";

/// 广播行为
#[derive(Debug, Clone, PartialEq)]
pub enum SendMode {
    /// 立即确认
    Confirm,
    /// 节点拒绝交易
    Reject(String),
    /// 广播成功但永远看不到确认
    NeverConfirm,
    /// 广播请求本身失败（传输层），交易未上链
    TransportError,
    /// 上链但执行失败
    FailOnChain(String),
    /// 立即结算，但状态要过一段时间才能查到
    ConfirmAfter(Duration),
}

/// 已广播交易的解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransfer {
    pub signature: String,
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub lamports: u64,
}

struct FakeState {
    balances: HashMap<AccountAddress, u64>,
    statuses: HashMap<String, SignatureStatus>,
    delayed: HashMap<String, (SignatureStatus, Instant)>,
    sent: Vec<SentTransfer>,
    airdrops: Vec<(AccountAddress, u64)>,
    send_mode: SendMode,
    airdrop_available: bool,
    blockhash_available: bool,
    airdrop_counter: u8,
}

/// 内存版 Solana RPC
pub struct FakeSolanaRpc {
    state: Mutex<FakeState>,
}

impl FakeSolanaRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                balances: HashMap::new(),
                statuses: HashMap::new(),
                delayed: HashMap::new(),
                sent: Vec::new(),
                airdrops: Vec::new(),
                send_mode: SendMode::Confirm,
                airdrop_available: true,
                blockhash_available: true,
                airdrop_counter: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_balance(&self, address: &AccountAddress, lamports: u64) {
        self.lock().balances.insert(*address, lamports);
    }

    pub fn balance_of(&self, address: &AccountAddress) -> u64 {
        self.lock().balances.get(address).copied().unwrap_or(0)
    }

    pub fn set_send_mode(&self, mode: SendMode) {
        self.lock().send_mode = mode;
    }

    pub fn set_airdrop_available(&self, available: bool) {
        self.lock().airdrop_available = available;
    }

    pub fn set_blockhash_available(&self, available: bool) {
        self.lock().blockhash_available = available;
    }

    /// 直接设置某个签名的状态（模拟客户端自行完成的转账）
    pub fn set_status(&self, signature: &str, status: TransferStatus, err: Option<&str>) {
        self.lock().statuses.insert(
            signature.to_string(),
            SignatureStatus {
                slot: 1,
                confirmation_status: Some(status),
                err: err.map(str::to_string),
            },
        );
    }

    /// 签名状态在 `delay` 之后才可见
    pub fn set_status_after(
        &self,
        signature: &str,
        status: TransferStatus,
        err: Option<&str>,
        delay: Duration,
    ) {
        self.lock().delayed.insert(
            signature.to_string(),
            (
                SignatureStatus {
                    slot: 1,
                    confirmation_status: Some(status),
                    err: err.map(str::to_string),
                },
                Instant::now() + delay,
            ),
        );
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.lock().sent.clone()
    }

    pub fn airdrops(&self) -> Vec<(AccountAddress, u64)> {
        self.lock().airdrops.clone()
    }
}

fn decode_transfer(wire_tx: &[u8]) -> Option<SentTransfer> {
    // compact(1) + 64 字节签名 + 150 字节消息
    if wire_tx.len() != 1 + 64 + 150 || wire_tx[0] != 1 {
        return None;
    }
    let signature = bs58::encode(&wire_tx[1..65]).into_string();
    let message = &wire_tx[65..];
    let from = AccountAddress::from_bytes(message[4..36].try_into().ok()?);
    let to = AccountAddress::from_bytes(message[36..68].try_into().ok()?);
    let lamports = u64::from_le_bytes(message[142..150].try_into().ok()?);
    Some(SentTransfer {
        signature,
        from,
        to,
        lamports,
    })
}

#[async_trait]
impl SolanaRpc for FakeSolanaRpc {
    async fn get_latest_blockhash(&self) -> Result<[u8; 32], RpcError> {
        if !self.lock().blockhash_available {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok([7u8; 32])
    }

    async fn send_transaction(&self, wire_tx: &[u8]) -> Result<String, RpcError> {
        let transfer = decode_transfer(wire_tx)
            .ok_or_else(|| RpcError::Rpc {
                code: -32602,
                message: "failed to deserialize transaction".into(),
            })?;

        let mut state = self.lock();
        match state.send_mode.clone() {
            SendMode::Reject(message) => {
                return Err(RpcError::Rpc {
                    code: -32002,
                    message,
                })
            }
            SendMode::TransportError => {
                return Err(RpcError::Transport("connection reset".into()));
            }
            SendMode::NeverConfirm => {}
            SendMode::FailOnChain(err) => {
                state.statuses.insert(
                    transfer.signature.clone(),
                    SignatureStatus {
                        slot: 2,
                        confirmation_status: Some(TransferStatus::Confirmed),
                        err: Some(err),
                    },
                );
            }
            SendMode::Confirm | SendMode::ConfirmAfter(_) => {
                let from_balance = state.balances.get(&transfer.from).copied().unwrap_or(0);
                let needed = transfer.lamports + FEE_LAMPORTS;
                if from_balance < needed {
                    return Err(RpcError::Rpc {
                        code: -32002,
                        message: "Attempt to debit an account but found no record of a prior credit"
                            .into(),
                    });
                }
                state.balances.insert(transfer.from, from_balance - needed);
                *state.balances.entry(transfer.to).or_insert(0) += transfer.lamports;
                let status = SignatureStatus {
                    slot: 2,
                    confirmation_status: Some(TransferStatus::Confirmed),
                    err: None,
                };
                match state.send_mode.clone() {
                    SendMode::ConfirmAfter(delay) => {
                        state
                            .delayed
                            .insert(transfer.signature.clone(), (status, Instant::now() + delay));
                    }
                    _ => {
                        state.statuses.insert(transfer.signature.clone(), status);
                    }
                }
            }
        }

        state.sent.push(transfer.clone());
        Ok(transfer.signature)
    }

    async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        let state = self.lock();
        if let Some(status) = state.statuses.get(signature) {
            return Ok(Some(status.clone()));
        }
        Ok(state
            .delayed
            .get(signature)
            .filter(|(_, visible_at)| Instant::now() >= *visible_at)
            .map(|(status, _)| status.clone()))
    }

    async fn get_balance(&self, address: &AccountAddress) -> Result<u64, RpcError> {
        Ok(self.balance_of(address))
    }

    async fn request_airdrop(
        &self,
        address: &AccountAddress,
        lamports: u64,
    ) -> Result<String, RpcError> {
        let mut state = self.lock();
        if !state.airdrop_available {
            return Err(RpcError::Rpc {
                code: 429,
                message: "airdrop limit reached".into(),
            });
        }
        state.airdrop_counter = state.airdrop_counter.wrapping_add(1);
        let signature = bs58::encode([state.airdrop_counter; 64]).into_string();
        *state.balances.entry(*address).or_insert(0) += lamports;
        state.airdrops.push((*address, lamports));
        state.statuses.insert(
            signature.clone(),
            SignatureStatus {
                slot: 3,
                confirmation_status: Some(TransferStatus::Finalized),
                err: None,
            },
        );
        Ok(signature)
    }

    fn endpoint(&self) -> &str {
        "http://127.0.0.1:8899"
    }
}

/// 可注入故障的账本
pub struct FlakyLedger {
    inner: FileCoinLedger,
    /// 剩余的失败 credit 次数
    pub credit_failures: AtomicU32,
    pub fail_all_credits: AtomicBool,
}

impl FlakyLedger {
    pub fn new(dir: &Path, default_balance: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: FileCoinLedger::new(dir, default_balance),
            credit_failures: AtomicU32::new(0),
            fail_all_credits: AtomicBool::new(false),
        })
    }

    fn should_fail_credit(&self) -> bool {
        if self.fail_all_credits.load(Ordering::SeqCst) {
            return true;
        }
        self.credit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CoinLedger for FlakyLedger {
    async fn read(&self, owner: &AccountAddress) -> Result<u64, LedgerError> {
        self.inner.read(owner).await
    }

    async fn credit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        if self.should_fail_credit() {
            return Err(LedgerError::StorageUnavailable("disk full".into()));
        }
        self.inner.credit(owner, amount).await
    }

    async fn debit(&self, owner: &AccountAddress, amount: u64) -> Result<u64, LedgerError> {
        self.inner.debit(owner, amount).await
    }
}

pub fn user_signer(seed: u8) -> KeypairSigner {
    KeypairSigner::from_seed(&[seed; 32])
}

pub fn treasury() -> AccountAddress {
    DEFAULT_TREASURY_ADDRESS.parse().unwrap()
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_backoff: Duration::from_millis(2),
    }
}

pub fn custody_config(environment: CustodyEnvironment) -> CustodyConfig {
    CustodyConfig {
        environment,
        keypair_path: String::new(),
        faucet_grant_lamports: 5_000_000_000,
        fee_reserve_lamports: 10_000,
    }
}

/// 测试环境：临时目录 + 内存 RPC + 编排服务
pub struct TestEnv {
    pub dir: TempDir,
    pub rpc: Arc<FakeSolanaRpc>,
    pub service: Arc<ExchangeService>,
    pub custody_address: AccountAddress,
}

pub fn build_env(environment: CustodyEnvironment, default_balance: u64) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(FileCoinLedger::new(dir.path(), default_balance));
    build_env_with_ledger(dir, ledger, environment)
}

pub fn build_env_with_ledger(
    dir: TempDir,
    ledger: Arc<dyn CoinLedger>,
    environment: CustodyEnvironment,
) -> TestEnv {
    let rpc = FakeSolanaRpc::new();
    let (service, custody_address) = build_service(dir.path(), rpc.clone(), ledger, environment);
    TestEnv {
        dir,
        rpc,
        service,
        custody_address,
    }
}

/// 超时后才出现状态的场景：确认等待只来得及轮询一次
pub fn build_env_with_slow_polling(
    environment: CustodyEnvironment,
    default_balance: u64,
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(FileCoinLedger::new(dir.path(), default_balance));
    let rpc = FakeSolanaRpc::new();
    let (service, custody_address) = build_service_with_timing(
        dir.path(),
        rpc.clone(),
        ledger,
        environment,
        Duration::from_millis(100),
        Duration::from_secs(1),
    );
    TestEnv {
        dir,
        rpc,
        service,
        custody_address,
    }
}

/// 在给定数据目录上装配编排服务（重复调用模拟进程重启）
pub fn build_service(
    data_dir: &Path,
    rpc: Arc<FakeSolanaRpc>,
    ledger: Arc<dyn CoinLedger>,
    environment: CustodyEnvironment,
) -> (Arc<ExchangeService>, AccountAddress) {
    build_service_with_timing(
        data_dir,
        rpc,
        ledger,
        environment,
        Duration::from_millis(100),
        Duration::from_millis(5),
    )
}

pub fn build_service_with_timing(
    data_dir: &Path,
    rpc: Arc<FakeSolanaRpc>,
    ledger: Arc<dyn CoinLedger>,
    environment: CustodyEnvironment,
    confirm_timeout: Duration,
    poll_interval: Duration,
) -> (Arc<ExchangeService>, AccountAddress) {
    let executor = Arc::new(ChainTransferExecutor::new(rpc, confirm_timeout, poll_interval));
    let custody = Arc::new(CustodialFundingSource::new(
        KeypairSigner::from_seed(&[200u8; 32]),
        executor.clone(),
        &custody_config(environment),
    ));
    let custody_address = custody.address();

    let service = ExchangeService::new(
        ledger,
        executor,
        custody,
        data_dir,
        treasury(),
        Duration::from_millis(500),
    )
    .with_compensation_retry(fast_retry());

    (Arc::new(service), custody_address)
}

impl TestEnv {
    /// 同一数据目录与 RPC 上重新装配服务
    pub fn restart(&self, default_balance: u64) -> Arc<ExchangeService> {
        let ledger = Arc::new(FileCoinLedger::new(self.dir.path(), default_balance));
        build_service(
            self.dir.path(),
            self.rpc.clone(),
            ledger,
            CustodyEnvironment::Development,
        )
        .0
    }
}

/// API 测试用配置：数据与密钥都落在临时目录
pub fn test_config(dir: &Path, default_balance: u64) -> Config {
    let mut config = Config::from_env().unwrap();
    config.ledger.data_dir = dir.join("data").to_string_lossy().into_owned();
    config.ledger.default_balance = default_balance;
    config.custody = CustodyConfig {
        keypair_path: dir.join("custody.json").to_string_lossy().into_owned(),
        ..custody_config(CustodyEnvironment::Development)
    };
    config.exchange.treasury_address = DEFAULT_TREASURY_ADDRESS.to_string();
    config.exchange.operation_lock_timeout_secs = 1;
    config.solana.confirm_timeout_secs = 1;
    config.solana.poll_interval_ms = 5;
    config.admin.token = Some(TEST_ADMIN_TOKEN.to_string());
    config
}
