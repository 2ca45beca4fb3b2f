pub mod admin_handler;
pub mod admission_handler;
pub mod health;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::infrastructure::metrics::AdmissionMetrics;
use crate::usecase::{
    BeginRequestUseCase, BlockUserUseCase, CanMakeRequestUseCase, GetSystemStatusUseCase,
    GetUsageStatisticsUseCase, GetUserUsageUseCase, RecordUsageUseCase, UnblockUserUseCase,
};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub can_make_request_uc: Arc<CanMakeRequestUseCase>,
    pub begin_request_uc: Arc<BeginRequestUseCase>,
    pub record_usage_uc: Arc<RecordUsageUseCase>,
    pub get_user_usage_uc: Arc<GetUserUsageUseCase>,
    pub block_user_uc: Arc<BlockUserUseCase>,
    pub unblock_user_uc: Arc<UnblockUserUseCase>,
    pub get_statistics_uc: Arc<GetUsageStatisticsUseCase>,
    pub get_system_status_uc: Arc<GetSystemStatusUseCase>,
    pub metrics: Arc<AdmissionMetrics>,
    /// readyz で疎通確認する接続プール。インメモリ構成では None。
    pub db_pool: Option<Arc<PgPool>>,
}

/// Build the REST API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/v1/admission/check",
            post(admission_handler::check_admission),
        )
        .route("/api/v1/usage/begin", post(admission_handler::begin_request))
        .route("/api/v1/usage", post(admission_handler::record_usage))
        .route(
            "/api/v1/users/:user_id/usage",
            get(admission_handler::get_user_usage),
        )
        .route(
            "/api/v1/admin/users/:user_id/block",
            post(admin_handler::block_user).delete(admin_handler::unblock_user),
        )
        .route(
            "/api/v1/admin/statistics",
            get(admin_handler::get_statistics),
        )
        .route(
            "/api/v1/system/status",
            get(admin_handler::get_system_status),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(ErrorResponse::new(code, message))).into_response()
}
