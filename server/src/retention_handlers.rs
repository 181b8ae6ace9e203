use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{instance_settings, projects, retention_policies};
use crate::retention::policy::resolve_effective;
use crate::retention::{ApplyOptions, ComplianceRegion, DataClassification, PolicyInput, Tier};

/// Effective policy for a project: the stored override when present,
/// instance defaults otherwise, floors and ceilings applied either way.
pub async fn get_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    projects::find_by_id(&state.db, project_id)
        .await?
        .ok_or(ApiError::not_found("project"))?;

    let row = retention_policies::find_by_project(&state.db, project_id).await?;
    let settings = instance_settings::get(&state.db).await?;
    let effective = resolve_effective(project_id, row.as_ref(), &settings);
    Ok(ok(json!({ "configured": row, "effective": effective })))
}

#[derive(Debug, Deserialize)]
pub struct PutPolicyRequest {
    pub bug_report_retention_days: i32,
    pub screenshot_retention_days: i32,
    pub replay_retention_days: i32,
    pub attachment_retention_days: i32,
    pub archived_retention_days: i32,
    #[serde(default)]
    pub archive_before_delete: bool,
    pub data_classification: DataClassification,
    pub compliance_region: ComplianceRegion,
    pub tier: Tier,
}

/// Validation runs before any write: compliance floors always bind, tier
/// ceilings bind unless the caller is an admin.
pub async fn put_policy(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
    Json(request): Json<PutPolicyRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    projects::find_by_id(&state.db, project_id)
        .await?
        .ok_or(ApiError::not_found("project"))?;

    let input = PolicyInput {
        bug_report_retention_days: request.bug_report_retention_days,
        screenshot_retention_days: request.screenshot_retention_days,
        replay_retention_days: request.replay_retention_days,
        attachment_retention_days: request.attachment_retention_days,
        archived_retention_days: request.archived_retention_days,
        archive_before_delete: request.archive_before_delete,
        data_classification: request.data_classification,
        compliance_region: request.compliance_region,
        tier: request.tier,
    };
    let admin_bypass = auth.claims.role == Role::Admin;
    if let Err(violations) = input.validate(admin_bypass) {
        let details = violations
            .iter()
            .map(|v| json!({ "category": v.category, "message": v.message }))
            .collect::<Vec<_>>();
        return Err(ApiError::ComplianceViolation {
            message: violations
                .first()
                .map(|v| v.message.clone())
                .unwrap_or_else(|| "retention policy violates compliance rules".to_string()),
            details: Some(json!(details)),
        });
    }

    let row = retention_policies::upsert(
        &state.db,
        retention_policies::UpsertRetentionPolicy {
            project_id,
            bug_report_retention_days: request.bug_report_retention_days,
            screenshot_retention_days: request.screenshot_retention_days,
            replay_retention_days: request.replay_retention_days,
            attachment_retention_days: request.attachment_retention_days,
            archived_retention_days: request.archived_retention_days,
            archive_before_delete: request.archive_before_delete,
            data_classification: request.data_classification.as_str().to_string(),
            compliance_region: request.compliance_region.as_str().to_string(),
            tier: request.tier.as_str().to_string(),
        },
    )
    .await?;

    info!(project_id = %project_id, "retention policy updated");
    Ok(ok(row))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub project_id: Option<Uuid>,
}

/// Read-only: what the next apply would remove. Never mutates.
pub async fn preview(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let result = state.retention.preview(query.project_id).await?;
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub confirm: bool,
    pub batch_size: Option<usize>,
    pub max_error_rate: Option<f64>,
}

pub async fn apply(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<ApplyRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    let timer = state.metrics.retention_duration_seconds.start_timer();
    let stats = state
        .retention
        .apply(ApplyOptions {
            dry_run: request.dry_run,
            confirm: request.confirm,
            batch_size: request.batch_size.unwrap_or(100),
            max_error_rate: request.max_error_rate.unwrap_or(5.0),
        })
        .await?;
    timer.observe_duration();
    state.metrics.retention_runs.inc();
    state.metrics.retention_deleted.inc_by(stats.total_deleted);
    Ok(ok(stats))
}

#[derive(Debug, Deserialize)]
pub struct LegalHoldRequest {
    pub ids: Vec<Uuid>,
    pub hold: bool,
}

/// Admin-only. Held rows survive every retention cycle until released.
pub async fn legal_hold(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<LegalHoldRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    if request.ids.is_empty() {
        return Err(ApiError::validation("empty_ids", "ids must not be empty"));
    }
    let updated = state
        .retention
        .apply_legal_hold(Some(auth.claims.subject), &request.ids, request.hold)
        .await?;
    Ok(ok(json!({ "updated": updated, "hold": request.hold })))
}
