use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{ensure_min_role, hash_password, AuthContext, Role};
use common_http_errors::{ok, ok_paginated, ApiError, ApiResult, Pagination};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{users, DbError, Page};

const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug, Deserialize)]
pub struct NewUserRequest {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: Option<String>,
    pub oauth_provider: Option<String>,
    pub oauth_id: Option<String>,
}

/// Admin-only. Exactly one credential shape is accepted: a password, or
/// an OAuth provider/subject pair.
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<NewUserRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    let credential = match (&request.password, &request.oauth_provider, &request.oauth_id) {
        (Some(password), None, None) => {
            if password.chars().count() < MIN_PASSWORD_CHARS {
                return Err(ApiError::validation(
                    "weak_password",
                    format!("password must be at least {MIN_PASSWORD_CHARS} characters"),
                ));
            }
            users::Credential::Password {
                hash: hash_password(password)
                    .map_err(|err| crate::errors::internal_error("hash password", err))?,
            }
        }
        (None, Some(provider), Some(subject)) => users::Credential::OAuth {
            provider: provider.clone(),
            subject: subject.clone(),
        },
        _ => {
            return Err(ApiError::validation(
                "invalid_credential",
                "Provide either a password or an oauth_provider/oauth_id pair",
            ))
        }
    };

    let created = users::create(
        &state.db,
        users::NewUser {
            email: request.email.trim().to_string(),
            name: request.name.trim().to_string(),
            role: request.role,
            credential,
        },
    )
    .await
    .map_err(|err| match err {
        DbError::UniqueViolation(_) => {
            ApiError::conflict("email_taken", "A user with this email already exists")
        }
        other => other.into(),
    })?;

    info!(user_id = %created.id, role = %created.role, "user created");
    Ok((StatusCode::CREATED, ok(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let page = Page::validated(query.page.unwrap_or(1), query.limit.unwrap_or(50))?;
    let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
    let descending = !matches!(query.sort_order.as_deref(), Some("asc"));

    let result = users::list(&state.db, sort_by, descending, page).await?;
    let pagination = Pagination::new(result.page, result.limit, result.total);
    Ok(ok_paginated(result.rows, pagination))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    // Users may read their own record; everything else is admin-only.
    if auth.claims.subject != user_id {
        ensure_min_role(&auth, Role::Admin)?;
    }
    let user = users::find_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::not_found("user"))?;
    Ok(ok(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    let password_hash = match &request.password {
        Some(password) => {
            if password.chars().count() < MIN_PASSWORD_CHARS {
                return Err(ApiError::validation(
                    "weak_password",
                    format!("password must be at least {MIN_PASSWORD_CHARS} characters"),
                ));
            }
            Some(
                hash_password(password)
                    .map_err(|err| crate::errors::internal_error("hash password", err))?,
            )
        }
        None => None,
    };

    let updated = users::update(
        &state.db,
        user_id,
        users::UserPatch {
            name: request.name,
            role: request.role,
            is_active: request.is_active,
            password_hash,
        },
    )
    .await?
    .ok_or(ApiError::not_found("user"))?;
    Ok(ok(updated))
}

/// Soft lifecycle end: accounts referenced by audit history are never
/// hard-deleted. The last active admin cannot deactivate themselves into
/// a locked-out instance.
pub async fn deactivate_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    let target = users::find_by_id(&state.db, user_id)
        .await?
        .ok_or(ApiError::not_found("user"))?;
    if target.role() == Role::Admin && users::count_admins(&state.db).await? <= 1 {
        return Err(ApiError::conflict(
            "last_admin",
            "Cannot deactivate the only active admin",
        ));
    }

    let deactivated = users::deactivate(&state.db, user_id).await?;
    if !deactivated {
        return Err(ApiError::not_found("user"));
    }
    Ok(ok(json!({ "deactivated": true })))
}
