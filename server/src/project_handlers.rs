use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ok_paginated, ApiError, ApiResult, Pagination};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{projects, Page};
use crate::storage::keys;

#[derive(Debug, Deserialize)]
pub struct NewProjectRequest {
    pub name: String,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ProjectWithKey {
    #[serde(flatten)]
    pub project: projects::Project,
    /// Only surfaced at creation and rotation; list/get omit it.
    pub api_key: String,
}

pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<NewProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("invalid_name", "project name is required"));
    }

    let project = projects::create(
        &state.db,
        projects::NewProject {
            name: name.to_string(),
            owner_id: Some(auth.claims.subject),
            settings: request.settings,
        },
    )
    .await?;

    info!(project_id = %project.id, owner = %auth.claims.subject, "project created");
    let api_key = project.api_key.clone();
    Ok((
        StatusCode::CREATED,
        ok(ProjectWithKey { project, api_key }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let page = Page::validated(query.page.unwrap_or(1), query.limit.unwrap_or(50))?;
    let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
    let descending = !matches!(query.sort_order.as_deref(), Some("asc"));

    // Non-admin users see their own projects; viewers and admins see all.
    let owner_filter = match auth.claims.role {
        Role::User => Some(auth.claims.subject),
        _ => None,
    };

    let result = projects::list(&state.db, owner_filter, sort_by, descending, page).await?;
    let pagination = Pagination::new(result.page, result.limit, result.total);
    Ok(ok_paginated(result.rows, pagination))
}

pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let project = find_accessible(&state, &auth, project_id, false).await?;
    Ok(ok(project))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub settings: Option<serde_json::Value>,
}

pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
    Json(request): Json<UpdateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    find_accessible(&state, &auth, project_id, true).await?;

    let updated = projects::update(
        &state.db,
        project_id,
        projects::ProjectPatch { name: request.name, settings: request.settings },
    )
    .await?
    .ok_or(ApiError::not_found("project"))?;
    Ok(ok(updated))
}

/// Deleting a project cascades to its reports, sessions, and tickets at
/// the relational layer, and removes every stored object under the
/// project's prefixes.
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    find_accessible(&state, &auth, project_id, true).await?;

    let deleted = projects::delete(&state.db, project_id).await?;
    if !deleted {
        return Err(ApiError::not_found("project"));
    }

    let mut objects_removed = 0u64;
    for prefix in keys::project_prefixes(project_id) {
        objects_removed += state.storage.delete_folder(&prefix).await?;
    }

    info!(project_id = %project_id, objects_removed, "project deleted");
    Ok(ok(json!({ "deleted": true, "objects_removed": objects_removed })))
}

/// Rotation invalidates the prior key in the same statement; only the
/// owner or an admin may rotate.
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    find_accessible(&state, &auth, project_id, true).await?;

    let project = projects::regenerate_api_key(&state.db, project_id)
        .await?
        .ok_or(ApiError::not_found("project"))?;

    info!(project_id = %project_id, "api key regenerated");
    let api_key = project.api_key.clone();
    Ok(ok(ProjectWithKey { project, api_key }))
}

async fn find_accessible(
    state: &AppState,
    auth: &AuthContext,
    project_id: Uuid,
    write: bool,
) -> ApiResult<projects::Project> {
    let project = projects::find_by_id(&state.db, project_id)
        .await?
        .ok_or(ApiError::not_found("project"))?;
    if auth.claims.role == Role::Admin {
        return Ok(project);
    }
    if write && project.owner_id != Some(auth.claims.subject) {
        return Err(ApiError::forbidden("You do not own this project"));
    }
    Ok(project)
}
