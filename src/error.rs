use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::service::exchange::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    // HTTP 基础错误码
    Unauthorized,
    MethodNotAllowed,
    Internal,

    // 结算错误码
    InvalidInput,
    InsufficientBalance,
    OperationInProgress,
    SigningRejected,
    SubmissionFailed,
    ConfirmationTimeout,
    FundingUnavailable,
    StorageUnavailable,
    CreditFailedAfterTransfer,
    ReversalFailed,
}

impl AppErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppErrorCode::Unauthorized => "unauthorized",
            AppErrorCode::MethodNotAllowed => "method_not_allowed",
            AppErrorCode::Internal => "internal",

            AppErrorCode::InvalidInput => "invalid_input",
            AppErrorCode::InsufficientBalance => "insufficient_balance",
            AppErrorCode::OperationInProgress => "operation_in_progress",
            AppErrorCode::SigningRejected => "signing_rejected",
            AppErrorCode::SubmissionFailed => "submission_failed",
            AppErrorCode::ConfirmationTimeout => "confirmation_timeout",
            AppErrorCode::FundingUnavailable => "funding_unavailable",
            AppErrorCode::StorageUnavailable => "storage_unavailable",
            AppErrorCode::CreditFailedAfterTransfer => "credit_failed_after_transfer",
            AppErrorCode::ReversalFailed => "reversal_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    pub status: StatusCode,
    pub trace_id: Option<String>,
    /// 已知的交易签名（用于人工对账）
    pub signature: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    code: &'a str,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.as_str(),
            error: &self.message,
            trace_id: self.trace_id.as_deref(),
            signature: self.signature.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    fn new(code: AppErrorCode, status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            status,
            trace_id: None,
            signature: None,
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidInput, StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Unauthorized, StatusCode::UNAUTHORIZED, msg)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            AppErrorCode::MethodNotAllowed,
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Internal, StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// 设置追踪ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

impl From<ExchangeError> for AppError {
    fn from(err: ExchangeError) -> Self {
        let code = match &err {
            ExchangeError::InvalidInput(_) => AppErrorCode::InvalidInput,
            ExchangeError::InsufficientBalance(_) => AppErrorCode::InsufficientBalance,
            ExchangeError::OperationInProgress(_) => AppErrorCode::OperationInProgress,
            ExchangeError::SigningRejected(_) => AppErrorCode::SigningRejected,
            ExchangeError::SubmissionFailed { .. } => AppErrorCode::SubmissionFailed,
            ExchangeError::ConfirmationTimeout { .. } => AppErrorCode::ConfirmationTimeout,
            ExchangeError::FundingUnavailable(_) => AppErrorCode::FundingUnavailable,
            ExchangeError::StorageUnavailable(_) => AppErrorCode::StorageUnavailable,
            ExchangeError::CreditFailedAfterTransfer { .. } => {
                AppErrorCode::CreditFailedAfterTransfer
            }
            ExchangeError::ReversalFailed { .. } => AppErrorCode::ReversalFailed,
        };

        let status = match &err {
            ExchangeError::OperationInProgress(_) => StatusCode::CONFLICT,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(kind = err.kind(), error = %err, "Settlement fault");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut app = AppError::new(code, status, err.to_string());
        app.signature = err.signature().map(str::to_string);
        app
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::invalid_input(rejection.body_text())
    }
}
