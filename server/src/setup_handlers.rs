use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{hash_password, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::app::AppState;
use crate::db::{instance_settings, users};
use crate::errors::internal_error;

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub admin_email: String,
    pub admin_name: String,
    pub admin_password: String,
    pub instance_name: String,
    #[serde(default)]
    pub instance_url: String,
    #[serde(default)]
    pub support_email: String,
}

/// `GET /api/v1/setup/status` — the dashboard polls this to decide
/// whether to show the first-run wizard.
pub async fn setup_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let settings = instance_settings::get(&state.db).await?;
    Ok(ok(json!({
        "initialized": settings.initialized,
        "instance_name": settings.instance_name,
    })))
}

/// `POST /api/v1/setup/initialize` — first-run only. Proves the storage
/// backend with a write/read/delete probe, then creates the first admin
/// and flips `initialized` in one transaction. Re-runs get 409.
pub async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<InitializeRequest>,
) -> ApiResult<impl IntoResponse> {
    let settings = instance_settings::get(&state.db).await?;
    if settings.initialized {
        return Err(ApiError::conflict(
            "already_initialized",
            "This instance is already initialized",
        ));
    }

    if request.admin_password.chars().count() < 8 {
        return Err(ApiError::validation(
            "weak_password",
            "admin password must be at least 8 characters",
        ));
    }
    if !request.admin_email.contains('@') {
        return Err(ApiError::validation("invalid_email", "admin email is not valid"));
    }
    let instance_name = request.instance_name.trim();
    if instance_name.is_empty() {
        return Err(ApiError::validation("invalid_name", "instance name is required"));
    }

    // The instance is unusable with broken storage; fail setup loudly now
    // rather than at first ingest.
    state.storage.health_check().await?;

    let password_hash = hash_password(&request.admin_password)
        .map_err(|err| internal_error("hash admin password", err))?;
    let backend = state.storage.backend_name().to_string();
    let email = request.admin_email.trim().to_string();
    let name = request.admin_name.trim().to_string();
    let instance_name = instance_name.to_string();
    let instance_url = request.instance_url.trim().to_string();
    let support_email = request.support_email.trim().to_string();

    let admin = state
        .db
        .transaction(move |conn| {
            Box::pin(async move {
                let admin = users::create_on(
                    conn,
                    users::NewUser {
                        email,
                        name,
                        role: Role::Admin,
                        credential: users::Credential::Password { hash: password_hash },
                    },
                )
                .await?;
                instance_settings::initialize_on(
                    conn,
                    &instance_name,
                    &instance_url,
                    &support_email,
                    &backend,
                    None,
                )
                .await?;
                Ok(admin)
            })
        })
        .await
        .map_err(|err| match err {
            crate::db::DbError::UniqueViolation(_) => {
                ApiError::conflict("email_taken", "A user with this email already exists")
            }
            other => other.into(),
        })?;

    info!(admin_id = %admin.id, "instance initialized");
    Ok((
        StatusCode::CREATED,
        ok(json!({ "initialized": true, "admin_id": admin.id })),
    ))
}
