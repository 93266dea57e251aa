//! 管理接口鉴权
//! `Authorization: Bearer <ADMIN_TOKEN>`，令牌按常量时间比较
//! 未配置令牌时管理接口整体关闭

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use subtle::ConstantTimeEq;

use crate::{api::middleware::trace_id::TraceId, app_state::AppState, error::AppError, metrics};

/// 操作人标识（写入审计日志）
pub const ADMIN_ACTOR_HEADER: &str = "X-Admin-Actor";

const DEFAULT_ACTOR: &str = "admin";

/// 已通过鉴权的管理请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAuth {
    pub actor: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let trace_id = parts.extensions.get::<TraceId>().map(|t| t.0.clone());
        let path = parts.uri.path().to_string();
        let actor = actor_from(&parts.headers);

        let reject = |message: &str| {
            metrics::count_err("admin_auth");
            let err = AppError::unauthorized(message);
            match &trace_id {
                Some(id) => err.with_trace_id(id.clone()),
                None => err,
            }
        };

        let Some(expected) = state.config.admin.token.as_deref() else {
            tracing::warn!(target: "audit", actor = %actor, path = %path, "Admin request rejected: admin API disabled");
            return Err(reject("admin API is disabled"));
        };

        match bearer_token(&parts.headers) {
            Some(provided) if token_matches(provided, expected) => {
                tracing::info!(target: "audit", actor = %actor, path = %path, "Admin request authorized");
                Ok(AdminAuth { actor })
            }
            provided => {
                tracing::warn!(
                    target: "audit",
                    actor = %actor,
                    path = %path,
                    token_present = provided.is_some(),
                    "Admin request rejected: bad credentials"
                );
                Err(reject("invalid or missing admin token"))
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ADMIN_ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 64)
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}
