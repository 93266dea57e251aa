//! Coinbridge - SOL 与游戏币兑换结算服务
//!
//! 充值：用户钱包签名转账 SOL，链上确认后入账游戏币
//! 提现：扣减游戏币，由托管的游戏钱包转出 SOL，失败时退回

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        domain::{AccountAddress, TransferRecord},
        error::{AppError, AppErrorCode},
        service::exchange::{ExchangeError, ExchangeService},
    };
}
