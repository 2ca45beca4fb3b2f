use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// DB を使う構成では疎通できるまで 503 を返す。
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(ref pool) = state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool.as_ref()).await {
            tracing::warn!(error = %e, "readiness check failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"status": "not_ready", "reason": "database unavailable"})),
            );
        }
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "ready"})))
}
