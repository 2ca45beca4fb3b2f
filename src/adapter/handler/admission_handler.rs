use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{error_response, AppState};
use crate::domain::entity::ActionType;
use crate::usecase::begin_request::{BeginRequestError, BeginRequestInput};
use crate::usecase::can_make_request::{CanMakeRequestError, CanMakeRequestInput};
use crate::usecase::get_user_usage::GetUserUsageError;
use crate::usecase::record_usage::{RecordUsageError, RecordUsageInput};

fn parse_action(s: &str) -> Result<ActionType, Response> {
    ActionType::from_str(s).map_err(|msg| {
        error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
    })
}

/// POST /api/v1/admission/check
///
/// 許可は 200、拒否は 429 と Retry-After ヘッダ。どちらも本文は判定結果。
pub async fn check_admission(
    State(state): State<AppState>,
    Json(req): Json<CheckAdmissionRequest>,
) -> Response {
    let action_type = match parse_action(&req.action_type) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let input = CanMakeRequestInput {
        user_id: req.user_id,
        action_type,
    };

    let result = state.can_make_request_uc.execute(&input).await;
    if let Ok(ref decision) = result {
        state.metrics.record_decision(decision);
    }
    match result {
        Ok(decision) if decision.allowed => (StatusCode::OK, Json(decision)).into_response(),
        Ok(decision) => {
            let retry_after = HeaderValue::from(decision.retry_after_secs);
            let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(decision)).into_response();
            resp.headers_mut().insert(header::RETRY_AFTER, retry_after);
            resp
        }
        Err(CanMakeRequestError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
    }
}

/// POST /api/v1/usage/begin
pub async fn begin_request(
    State(state): State<AppState>,
    Json(req): Json<BeginRequestRequest>,
) -> Response {
    let action_type = match parse_action(&req.action_type) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let input = BeginRequestInput {
        user_id: req.user_id,
        action_type,
        endpoint: req.endpoint,
        ip_address: req.ip_address,
    };

    match state.begin_request_uc.execute(&input).await {
        Ok(request_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "request_id": request_id })),
        )
            .into_response(),
        Err(BeginRequestError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
        Err(e @ BeginRequestError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_BEGIN_FAILED",
            &e.to_string(),
        ),
    }
}

/// POST /api/v1/usage
pub async fn record_usage(
    State(state): State<AppState>,
    Json(req): Json<RecordUsageRequest>,
) -> Response {
    let action_type = match parse_action(&req.action_type) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let input = RecordUsageInput {
        user_id: req.user_id,
        action_type,
        endpoint: req.endpoint,
        ip_address: req.ip_address,
        response_time_ms: req.response_time_ms,
        data_size: req.data_size,
        request_id: req.request_id,
    };

    match state.record_usage_uc.execute(&input).await {
        Ok(counter) => (StatusCode::OK, Json(counter)).into_response(),
        Err(RecordUsageError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
        Err(e @ RecordUsageError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_RECORD_FAILED",
            &e.to_string(),
        ),
    }
}

/// GET /api/v1/users/:user_id/usage
pub async fn get_user_usage(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.get_user_usage_uc.execute(&user_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(GetUserUsageError::Validation(msg)) => {
            error_response(StatusCode::BAD_REQUEST, "SYS_ADMISSION_VALIDATION", &msg)
        }
        Err(e @ GetUserUsageError::Internal(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SYS_ADMISSION_USAGE_FAILED",
            &e.to_string(),
        ),
    }
}

// --- Request types ---

#[derive(Debug, Deserialize)]
pub struct CheckAdmissionRequest {
    pub user_id: String,
    pub action_type: String,
}

#[derive(Debug, Deserialize)]
pub struct BeginRequestRequest {
    pub user_id: String,
    pub action_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub user_id: String,
    pub action_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub response_time_ms: i64,
    #[serde(default)]
    pub data_size: i64,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}
