//! 结算 API
//! 提现、充值确认、余额与兑换参数查询

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::middleware::trace_id::TraceId,
    app_state::AppState,
    domain::AccountAddress,
    error::AppError,
    metrics,
    service::exchange::ExchangeError,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 请求/响应模型
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    /// 收款地址（base58）
    #[serde(alias = "walletAddress")]
    pub address: String,
    /// 提现的游戏币数量
    pub coin_amount: i64,
    /// 客户端计算的 SOL 数量（可选，数字或字符串）
    #[serde(default, deserialize_with = "deserialize_optional_sol")]
    pub sol_amount: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub message: String,
    pub new_coin_balance: u64,
    pub sol_transferred: Decimal,
    pub destination_address: String,
    pub game_wallet_address: String,
    pub transaction_signature: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopUpConfirmRequest {
    #[serde(alias = "walletAddress")]
    pub address: String,
    /// 入账的游戏币数量
    pub additional_coins: i64,
    /// 客户端转账的签名；提供时服务端核实确认状态并防止重复入账
    #[serde(default)]
    pub transaction_signature: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopUpConfirmResponse {
    pub new_coin_balance: u64,
    pub credited_coins: u64,
    pub transaction_signature: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BalanceQuery {
    /// 钱包地址（base58）
    pub address: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfoResponse {
    /// 1 SOL 兑换的游戏币
    pub rate: u64,
    pub lamports_per_sol: u64,
    pub min_withdrawal_coins: u64,
    /// 提现步长（仅供界面使用）
    pub withdrawal_step_coins: u64,
    pub treasury_address: String,
    pub game_wallet_address: String,
}

fn deserialize_optional_sol<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(D::Error::custom(format!(
                "solAmount must be a number or string, got {}",
                other
            )))
        }
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|e| D::Error::custom(format!("invalid solAmount '{}': {}", raw, e)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/withdraw", post(withdraw).fallback(method_not_allowed))
        .route(
            "/topup/confirm",
            post(confirm_top_up).fallback(method_not_allowed),
        )
        .route("/balance", get(get_balance).fallback(method_not_allowed))
        .route(
            "/exchange/info",
            get(exchange_info).fallback(method_not_allowed),
        )
}

pub(crate) async fn method_not_allowed(trace: TraceId) -> AppError {
    AppError::method_not_allowed().with_trace_id(trace.0)
}

fn parse_address(raw: &str) -> Result<AccountAddress, ExchangeError> {
    AccountAddress::from_str(raw.trim())
        .map_err(|e| ExchangeError::InvalidInput(format!("invalid address '{}': {}", raw, e)))
}

fn positive_amount(name: &str, value: i64) -> Result<u64, ExchangeError> {
    if value <= 0 {
        return Err(ExchangeError::InvalidInput(format!(
            "{} must be a positive integer, got {}",
            name, value
        )));
    }
    Ok(value as u64)
}

/// 统一记录指标并附带 trace_id
pub(crate) fn finish<T>(
    endpoint: &'static str,
    trace: &TraceId,
    result: Result<T, AppError>,
) -> Result<Json<T>, AppError> {
    match result {
        Ok(body) => {
            metrics::count_ok(endpoint);
            Ok(Json(body))
        }
        Err(e) => {
            metrics::count_err(endpoint);
            Err(e.with_trace_id(trace.0.clone()))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /withdraw
///
/// 扣减游戏币并由游戏钱包转账 SOL 到用户地址
#[utoipa::path(
    post,
    path = "/withdraw",
    request_body = WithdrawRequest,
    responses(
        (status = 200, description = "Withdrawal settled", body = WithdrawResponse),
        (status = 400, description = "Invalid input or insufficient balance"),
        (status = 405, description = "Wrong method"),
        (status = 409, description = "Another operation for this address is in progress"),
        (status = 500, description = "Chain or storage fault")
    )
)]
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    trace: TraceId,
    body: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, AppError> {
    let result = async {
        let Json(req) = body?;
        let destination = parse_address(&req.address)?;
        let coins = positive_amount("coinAmount", req.coin_amount)?;

        let receipt = state
            .exchange
            .withdraw(&destination, coins, req.sol_amount)
            .await?;

        Ok::<_, AppError>(WithdrawResponse {
            message: format!(
                "Withdrew {} coins for {} SOL",
                receipt.coins, receipt.sol_amount
            ),
            new_coin_balance: receipt.new_coin_balance,
            sol_transferred: receipt.sol_amount,
            destination_address: receipt.destination.to_base58(),
            game_wallet_address: receipt.game_wallet_address.to_base58(),
            transaction_signature: receipt.transaction_signature,
        })
    }
    .await;

    finish("withdraw", &trace, result)
}

/// POST /topup/confirm
///
/// 客户端完成转账后确认入账
#[utoipa::path(
    post,
    path = "/topup/confirm",
    request_body = TopUpConfirmRequest,
    responses(
        (status = 200, description = "Coins credited", body = TopUpConfirmResponse),
        (status = 400, description = "Invalid input or signature already credited"),
        (status = 409, description = "Another operation for this address is in progress"),
        (status = 500, description = "Chain or storage fault")
    )
)]
pub async fn confirm_top_up(
    State(state): State<Arc<AppState>>,
    trace: TraceId,
    body: Result<Json<TopUpConfirmRequest>, JsonRejection>,
) -> Result<Json<TopUpConfirmResponse>, AppError> {
    let result = async {
        let Json(req) = body?;
        let owner = parse_address(&req.address)?;
        let coins = positive_amount("additionalCoins", req.additional_coins)?;
        let signature = req
            .transaction_signature
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let receipt = state.exchange.confirm_top_up(&owner, coins, signature).await?;

        Ok::<_, AppError>(TopUpConfirmResponse {
            new_coin_balance: receipt.new_coin_balance,
            credited_coins: receipt.credited_coins,
            transaction_signature: receipt.transaction_signature,
        })
    }
    .await;

    finish("topup_confirm", &trace, result)
}

/// GET /balance?address=
#[utoipa::path(
    get,
    path = "/balance",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Current coin balance", body = BalanceResponse),
        (status = 400, description = "Invalid address"),
        (status = 500, description = "Ledger storage unavailable")
    )
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    trace: TraceId,
    query: Result<Query<BalanceQuery>, QueryRejection>,
) -> Result<Json<BalanceResponse>, AppError> {
    let result = async {
        let Query(q) = query?;
        let owner = parse_address(&q.address)?;
        let balance = state.exchange.balance(&owner).await?;
        Ok::<_, AppError>(BalanceResponse {
            address: owner.to_base58(),
            balance,
        })
    }
    .await;

    finish("balance", &trace, result)
}

/// GET /exchange/info
#[utoipa::path(
    get,
    path = "/exchange/info",
    responses(
        (status = 200, description = "Exchange constants", body = ExchangeInfoResponse)
    )
)]
pub async fn exchange_info(State(state): State<Arc<AppState>>) -> Json<ExchangeInfoResponse> {
    let info = state.exchange.info();
    metrics::count_ok("exchange_info");
    Json(ExchangeInfoResponse {
        rate: info.rate,
        lamports_per_sol: info.lamports_per_sol,
        min_withdrawal_coins: info.min_withdrawal_coins,
        withdrawal_step_coins: info.withdrawal_step_coins,
        treasury_address: info.treasury_address.to_base58(),
        game_wallet_address: info.game_wallet_address.to_base58(),
    })
}
