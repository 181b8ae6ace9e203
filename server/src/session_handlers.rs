use axum::extract::{Path, State};
use axum::response::IntoResponse;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::sessions;

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let rows = sessions::list_for_report(&state.db, report_id).await?;
    Ok(ok(rows))
}

pub async fn get_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let session = sessions::find_by_id(&state.db, session_id)
        .await?
        .ok_or(ApiError::not_found("session"))?;
    Ok(ok(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    let deleted = sessions::delete(&state.db, session_id).await?;
    if !deleted {
        return Err(ApiError::not_found("session"));
    }
    Ok(ok(serde_json::json!({ "deleted": true })))
}
