//! 汇率换算
//! SOL 与游戏币之间的固定汇率换算，纯函数，无状态

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

/// 1 SOL 兑换的游戏币数量（客户端契约的一部分）
pub const RATE: u64 = 30_000_000;

/// 1 SOL = 10^9 lamports
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// SOL 的最小单位精度（小数位数）
pub const SOL_DECIMALS: u32 = 9;

/// 最小提现币数
pub const MIN_WITHDRAWAL_COINS: u64 = 3_000;

/// 提现步长（前端滑块粒度，仅作提示）
pub const WITHDRAWAL_STEP_COINS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    #[error("amount must be positive, got {0}")]
    NonPositive(Decimal),
    #[error("amount {0} is out of range")]
    Overflow(Decimal),
}

/// SOL → 游戏币：`floor(sol * RATE)`，只截断不进位
pub fn sol_to_coins(sol: Decimal) -> Result<u64, RateError> {
    if sol <= Decimal::ZERO {
        return Err(RateError::NonPositive(sol));
    }
    let coins = sol
        .checked_mul(Decimal::from(RATE))
        .ok_or(RateError::Overflow(sol))?
        .floor();
    coins.to_u64().ok_or(RateError::Overflow(sol))
}

/// 游戏币 → SOL：`coins / RATE`，截断到 9 位小数
pub fn coins_to_sol(coins: u64) -> Decimal {
    (Decimal::from(coins) / Decimal::from(RATE))
        .round_dp_with_strategy(SOL_DECIMALS, RoundingStrategy::ToZero)
        .normalize()
}

/// 游戏币 → lamports（整数运算，向下取整）
pub fn coins_to_lamports(coins: u64) -> u64 {
    let lamports = coins as u128 * LAMPORTS_PER_SOL as u128 / RATE as u128;
    // coins 为 u64 时结果不可能超过 u64::MAX（LAMPORTS_PER_SOL / RATE < 34）
    lamports as u64
}

/// SOL → lamports，向下取整
pub fn sol_to_lamports(sol: Decimal) -> Result<u64, RateError> {
    if sol <= Decimal::ZERO {
        return Err(RateError::NonPositive(sol));
    }
    sol.checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .ok_or(RateError::Overflow(sol))?
        .floor()
        .to_u64()
        .ok_or(RateError::Overflow(sol))
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    (Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)).normalize()
}
