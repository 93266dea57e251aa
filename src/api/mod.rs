use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::{app_state::AppState, infrastructure::health};

pub mod admin_api;
pub mod exchange_api;
pub mod middleware;

use middleware::trace_id::trace_id_middleware;

#[derive(OpenApi)]
#[openapi(
    paths(
        exchange_api::withdraw,
        exchange_api::confirm_top_up,
        exchange_api::get_balance,
        exchange_api::exchange_info,
        admin_api::fund_custody,
        admin_api::list_reconciliation,
    ),
    components(schemas(
        exchange_api::WithdrawRequest,
        exchange_api::WithdrawResponse,
        exchange_api::TopUpConfirmRequest,
        exchange_api::TopUpConfirmResponse,
        exchange_api::BalanceResponse,
        exchange_api::ExchangeInfoResponse,
        admin_api::FundCustodyRequest,
        admin_api::FundCustodyResponse,
        admin_api::ReconciliationEntry,
        admin_api::ReconciliationResponse,
        health::HealthCheckResult,
        health::ComponentHealth,
        health::ComponentStatus,
    )),
    tags(
        (name = "Coinbridge API", description = "SOL and coin settlement")
    )
)]
pub struct ApiDoc;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(exchange_api::routes())
        .nest("/admin", admin_api::routes())
        .route("/healthz", get(healthz))
        .route(
            "/metrics",
            get(|| async { crate::metrics::render_prometheus().into_response() }),
        )
        .route("/openapi.json", get(openapi_json))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(trace_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer()),
        )
        .with_state(state)
}

/// CORS_ALLOW_ORIGINS：逗号分隔的来源列表，`*` 表示全部放行
fn cors_layer() -> CorsLayer {
    let allow_origins = std::env::var("CORS_ALLOW_ORIGINS").unwrap_or_else(|_| "*".into());

    let origin = if allow_origins.trim() == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allow_origins
            .split(',')
            .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let result = health::check_health(state.rpc.as_ref(), &state.config.ledger.data_path()).await;
    let status = if result.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(result)).into_response()
}

async fn openapi_json() -> Response {
    match ApiDoc::openapi().to_json() {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => crate::error::AppError::internal(format!("Failed to render OpenAPI: {}", e))
            .into_response(),
    }
}
