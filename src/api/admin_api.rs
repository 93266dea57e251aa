//! 运维 API
//! 托管钱包注资与对账记录查询

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    api::{
        exchange_api::{finish, method_not_allowed},
        middleware::{admin_auth::AdminAuth, trace_id::TraceId},
    },
    app_state::AppState,
    error::AppError,
    service::reconciliation::ReconciliationRecord,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct FundCustodyRequest {
    /// 申请的 lamports 数量
    pub lamports: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FundCustodyResponse {
    pub game_wallet_address: String,
    pub lamports: u64,
    pub transaction_signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationEntry {
    pub id: String,
    pub kind: String,
    pub owner: String,
    pub coins: u64,
    pub lamports: u64,
    pub signature: Option<String>,
    pub error_message: String,
    pub created_at: String,
}

impl From<ReconciliationRecord> for ReconciliationEntry {
    fn from(r: ReconciliationRecord) -> Self {
        let kind = serde_json::to_value(r.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            id: r.id.to_string(),
            kind,
            owner: r.owner.to_base58(),
            coins: r.coins,
            lamports: r.lamports,
            signature: r.signature,
            error_message: r.error_message,
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReconciliationResponse {
    pub total: usize,
    pub records: Vec<ReconciliationEntry>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/custody/fund",
            post(fund_custody).fallback(method_not_allowed),
        )
        .route(
            "/reconciliation",
            get(list_reconciliation).fallback(method_not_allowed),
        )
}

/// POST /admin/custody/fund
///
/// 向水龙头申请资金补充游戏钱包（仅开发环境）
#[utoipa::path(
    post,
    path = "/admin/custody/fund",
    request_body = FundCustodyRequest,
    params(
        ("Authorization" = String, Header, description = "Bearer <ADMIN_TOKEN>")
    ),
    responses(
        (status = 200, description = "Grant confirmed", body = FundCustodyResponse),
        (status = 400, description = "Invalid amount"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 500, description = "Funding unavailable")
    )
)]
pub async fn fund_custody(
    State(state): State<Arc<AppState>>,
    trace: TraceId,
    admin: AdminAuth,
    body: Result<Json<FundCustodyRequest>, JsonRejection>,
) -> Result<Json<FundCustodyResponse>, AppError> {
    let result = async {
        let Json(req) = body?;
        tracing::info!(
            target: "audit",
            actor = %admin.actor,
            lamports = req.lamports,
            "Custody funding requested"
        );
        let signature = state.exchange.fund_custody(req.lamports).await?;
        Ok::<_, AppError>(FundCustodyResponse {
            game_wallet_address: state.exchange.custody().address().to_base58(),
            lamports: req.lamports,
            transaction_signature: signature,
        })
    }
    .await;

    finish("admin_custody_fund", &trace, result)
}

/// GET /admin/reconciliation
#[utoipa::path(
    get,
    path = "/admin/reconciliation",
    params(
        ("Authorization" = String, Header, description = "Bearer <ADMIN_TOKEN>")
    ),
    responses(
        (status = 200, description = "Records requiring operator attention", body = ReconciliationResponse),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 500, description = "Journal unreadable")
    )
)]
pub async fn list_reconciliation(
    State(state): State<Arc<AppState>>,
    trace: TraceId,
    admin: AdminAuth,
) -> Result<Json<ReconciliationResponse>, AppError> {
    let result = async {
        let records: Vec<ReconciliationEntry> = state
            .exchange
            .reconciliation_records()
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        tracing::info!(
            target: "audit",
            actor = %admin.actor,
            total = records.len(),
            "Reconciliation records listed"
        );
        Ok::<_, AppError>(ReconciliationResponse {
            total: records.len(),
            records,
        })
    }
    .await;

    finish("admin_reconciliation", &trace, result)
}
