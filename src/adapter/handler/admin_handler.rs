use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::{error_response, AppState};
use crate::usecase::block_user::{BlockUserError, BlockUserInput};
use crate::usecase::get_system_status::GetSystemStatusError;
use crate::usecase::get_usage_statistics::{GetUsageStatisticsError, DEFAULT_STATISTICS_DAYS};
use crate::usecase::unblock_user::UnblockUserError;

/// POST /api/v1/admin/users/:user_id/block
pub async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<BlockUserRequest>,
) -> Response {
    let input = BlockUserInput {
        user_id: user_id.clone(),
        reason: req.reason,
        duration_secs: req.duration_secs,
    };

    match state.block_user_uc.execute(&input).await {
        Ok(block) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "user_id": user_id,
                "blocked": true,
                "reason": block.reason,
                "until": block.until,
            })),
        )
            .into_response(),
        Err(BlockUserError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
        Err(e @ BlockUserError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_BLOCK_FAILED",
            &e.to_string(),
        ),
    }
}

/// DELETE /api/v1/admin/users/:user_id/block
pub async fn unblock_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.unblock_user_uc.execute(&user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ UnblockUserError::NotFound(_)) => error_response(
            StatusCode::NOT_FOUND,
            "SYS_ADMISSION_NOT_BLOCKED",
            &e.to_string(),
        ),
        Err(e @ UnblockUserError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_UNBLOCK_FAILED",
            &e.to_string(),
        ),
    }
}

/// GET /api/v1/admin/statistics?days=N
pub async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> Response {
    let days = params.days.unwrap_or(DEFAULT_STATISTICS_DAYS);
    match state.get_statistics_uc.execute(days).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(GetUsageStatisticsError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
        Err(e @ GetUsageStatisticsError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_STATISTICS_FAILED",
            &e.to_string(),
        ),
    }
}

/// GET /api/v1/system/status
pub async fn get_system_status(State(state): State<AppState>) -> Response {
    match state.get_system_status_uc.execute().await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e @ GetSystemStatusError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_STATUS_FAILED",
            &e.to_string(),
        ),
    }
}

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct BlockUserRequest {
    pub reason: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsParams {
    pub days: Option<u32>,
}
