use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::db::instance_settings::{self, SettingsPatch};

pub async fn get_settings(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let settings = instance_settings::get(&state.db).await?;
    Ok(ok(settings))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub instance_name: Option<String>,
    pub instance_url: Option<String>,
    pub support_email: Option<String>,
    pub jwt_access_expiry_seconds: Option<i32>,
    pub jwt_refresh_expiry_seconds: Option<i32>,
    pub rate_limit_max: Option<i32>,
    pub rate_limit_window_seconds: Option<i32>,
    pub cors_origins: Option<Vec<String>>,
    /// Global retention default; the only way to edit it. Per-project
    /// overrides live in the retention policy endpoints.
    pub retention_days: Option<i32>,
    pub max_reports_per_project: Option<i32>,
    pub session_replay_enabled: Option<bool>,
}

pub async fn update_settings(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<UpdateSettingsRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    for (field, value) in [
        ("jwt_access_expiry_seconds", request.jwt_access_expiry_seconds),
        ("jwt_refresh_expiry_seconds", request.jwt_refresh_expiry_seconds),
        ("rate_limit_max", request.rate_limit_max),
        ("rate_limit_window_seconds", request.rate_limit_window_seconds),
        ("retention_days", request.retention_days),
        ("max_reports_per_project", request.max_reports_per_project),
    ] {
        if let Some(value) = value {
            if value <= 0 {
                return Err(ApiError::validation(
                    "invalid_setting",
                    format!("{field} must be positive"),
                ));
            }
        }
    }

    let updated = instance_settings::update(
        &state.db,
        SettingsPatch {
            instance_name: request.instance_name,
            instance_url: request.instance_url,
            support_email: request.support_email,
            jwt_access_expiry_seconds: request.jwt_access_expiry_seconds,
            jwt_refresh_expiry_seconds: request.jwt_refresh_expiry_seconds,
            rate_limit_max: request.rate_limit_max,
            rate_limit_window_seconds: request.rate_limit_window_seconds,
            cors_origins: request.cors_origins,
            retention_days: request.retention_days,
            max_reports_per_project: request.max_reports_per_project,
            session_replay_enabled: request.session_replay_enabled,
        },
    )
    .await?;

    info!(user_id = %auth.claims.subject, "instance settings updated");
    Ok(ok(updated))
}
