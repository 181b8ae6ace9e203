use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use common_auth::{ensure_min_role, ApiKeyHeader, AuthContext, Role};
use common_http_errors::{ok, ok_paginated, ApiError, ApiResult, Pagination};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{bug_reports, projects, sessions, Page};
use crate::queue::{EnqueueOptions, QueueName};
use crate::storage::SignedUrlOptions;
use crate::workers::replay::ReplayJobPayload;
use crate::workers::screenshot::ScreenshotJobPayload;

const MAX_TITLE_CHARS: usize = 500;
const MAX_SCREENSHOT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub report: ReportPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(default)]
    pub console_logs: Vec<Value>,
    #[serde(default)]
    pub network_requests: Vec<Value>,
    #[serde(default)]
    pub browser_metadata: Value,
    #[serde(default)]
    pub screenshot_base64: Option<String>,
    #[serde(default)]
    pub session_replay: Option<SessionReplayPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReplayPayload {
    #[serde(default, rename = "type")]
    pub replay_type: Option<String>,
    #[serde(default)]
    pub recorded_events: Vec<Value>,
}

/// `POST /api/v1/reports` — the SDK ingestion path, authenticated by
/// project API key. Persists the row first, then hands binaries to
/// storage and heavy work to the queues.
pub async fn ingest_report(
    State(state): State<AppState>,
    api_key: ApiKeyHeader,
    Json(request): Json<IngestRequest>,
) -> ApiResult<impl IntoResponse> {
    let title = request.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::validation(
            "invalid_title",
            format!("title must be 1..{MAX_TITLE_CHARS} characters"),
        ));
    }

    let project = projects::find_by_api_key(&state.db, &api_key.0)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Unknown API key"))?;

    let settings = crate::db::instance_settings::get(&state.db).await?;

    let decision = state
        .rate_limiter
        .check(&project.id.to_string(), settings.rate_limit_max as u32)
        .await
        .map_err(|err| crate::errors::internal_error("rate limiter", err))?;
    if !decision.allowed {
        state
            .metrics
            .reports_rejected
            .with_label_values(&["rate_limited"])
            .inc();
        return Err(ApiError::RateLimited {
            message: "Project ingestion rate limit exceeded".into(),
        });
    }

    // Shed load before accepting work the pipeline cannot absorb.
    for queue in [QueueName::Screenshots, QueueName::Replays] {
        let metrics = state.queue.get_queue_metrics(queue).await?;
        if metrics.waiting > state.config.queue.backpressure_limit {
            state
                .metrics
                .reports_rejected
                .with_label_values(&["backpressure"])
                .inc();
            return Err(ApiError::busy(
                "queue_backpressure",
                "Ingestion pipeline is saturated; retry with backoff",
            ));
        }
    }

    let existing = bug_reports::count_for_project(&state.db, project.id).await?;
    if existing >= settings.max_reports_per_project as i64 {
        state
            .metrics
            .reports_rejected
            .with_label_values(&["report_cap"])
            .inc();
        return Err(ApiError::conflict(
            "report_limit_reached",
            "The project has reached its report cap",
        ));
    }

    let metadata = json!({
        "consoleLogs": request.report.console_logs,
        "networkRequests": request.report.network_requests,
        "browserMetadata": request.report.browser_metadata,
    });

    let report = bug_reports::create(
        &state.db,
        bug_reports::NewBugReport {
            project_id: project.id,
            title: title.to_string(),
            description: request.description.clone(),
            status: None,
            priority: None,
            metadata: Some(metadata),
            retention_class: None,
        },
    )
    .await?;

    if let Some(encoded) = request.report.screenshot_base64.as_deref() {
        match decode_screenshot(encoded) {
            Ok(bytes) => {
                let uploaded = state
                    .storage
                    .upload_screenshot(project.id, report.id, bytes)
                    .await?;
                bug_reports::set_screenshot(&state.db, report.id, &uploaded.key).await?;
                let payload = ScreenshotJobPayload {
                    bug_report_id: report.id,
                    project_id: project.id,
                    storage_key: uploaded.key,
                };
                state
                    .queue
                    .add_job(
                        QueueName::Screenshots,
                        serde_json::to_value(&payload)
                            .map_err(|err| crate::errors::internal_error("encode job", err))?,
                        EnqueueOptions::default(),
                    )
                    .await?;
                state
                    .metrics
                    .jobs_enqueued
                    .with_label_values(&["screenshots"])
                    .inc();
            }
            Err(err) => {
                // A bad screenshot does not sink the whole report.
                warn!(report_id = %report.id, error = %err, "discarding undecodable screenshot");
            }
        }
    }

    if let Some(replay) = request.report.session_replay {
        if settings.session_replay_enabled && !replay.recorded_events.is_empty() {
            let session = sessions::create(
                &state.db,
                sessions::NewSession {
                    bug_report_id: report.id,
                    events: Some(Value::Array(replay.recorded_events.clone())),
                    duration_ms: None,
                },
            )
            .await?;
            let payload = ReplayJobPayload {
                bug_report_id: report.id,
                project_id: project.id,
                session_id: Some(session.id),
                events: replay.recorded_events,
                duration_ms: None,
            };
            state
                .queue
                .add_job(
                    QueueName::Replays,
                    serde_json::to_value(&payload)
                        .map_err(|err| crate::errors::internal_error("encode job", err))?,
                    EnqueueOptions::default(),
                )
                .await?;
            state
                .metrics
                .jobs_enqueued
                .with_label_values(&["replays"])
                .inc();
        }
    }

    let _ = state
        .queue
        .add_job(
            QueueName::Notifications,
            json!({
                "kind": "report-created",
                "project_id": project.id,
                "report_id": report.id,
                "title": report.title,
            }),
            EnqueueOptions::default(),
        )
        .await;

    state.metrics.reports_ingested.inc();
    info!(report_id = %report.id, project_id = %project.id, "report ingested");
    Ok((StatusCode::CREATED, ok(json!({ "id": report.id }))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub async fn list_reports(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let include_deleted = query.include_deleted && auth.claims.role == Role::Admin;

    let page = Page::validated(query.page.unwrap_or(1), query.limit.unwrap_or(50))?;
    let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
    let descending = !matches!(query.sort_order.as_deref(), Some("asc"));

    if let Some(status) = query.status.as_deref() {
        if !bug_reports::STATUSES.contains(&status) {
            return Err(ApiError::validation("invalid_status", format!("unknown status '{status}'")));
        }
    }
    if let Some(priority) = query.priority.as_deref() {
        if !bug_reports::PRIORITIES.contains(&priority) {
            return Err(ApiError::validation(
                "invalid_priority",
                format!("unknown priority '{priority}'"),
            ));
        }
    }

    let filters = bug_reports::BugReportFilters {
        project_id: query.project_id,
        status: query.status,
        priority: query.priority,
        search: query.search,
        include_deleted,
    };
    let result = bug_reports::list(&state.db, filters, sort_by, descending, page).await?;
    let pagination = Pagination::new(result.page, result.limit, result.total);
    Ok(ok_paginated(result.rows, pagination))
}

pub async fn get_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let report = bug_reports::find_by_id(&state.db, report_id)
        .await?
        .ok_or(ApiError::not_found("bug report"))?;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
pub struct UpdateReportRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub retention_class: Option<String>,
}

pub async fn update_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
    Json(request): Json<UpdateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    ensure_report_write(&state, &auth, report_id).await?;

    if let Some(status) = request.status.as_deref() {
        if !bug_reports::STATUSES.contains(&status) {
            return Err(ApiError::validation("invalid_status", format!("unknown status '{status}'")));
        }
    }
    if let Some(priority) = request.priority.as_deref() {
        if !bug_reports::PRIORITIES.contains(&priority) {
            return Err(ApiError::validation(
                "invalid_priority",
                format!("unknown priority '{priority}'"),
            ));
        }
    }
    if let Some(class) = request.retention_class.as_deref() {
        if !bug_reports::RETENTION_CLASSES.contains(&class) {
            return Err(ApiError::validation(
                "invalid_retention_class",
                format!("unknown retention class '{class}'"),
            ));
        }
    }

    let updated = bug_reports::update(
        &state.db,
        report_id,
        bug_reports::BugReportPatch {
            title: request.title,
            description: request.description,
            status: request.status,
            priority: request.priority,
            retention_class: request.retention_class,
        },
    )
    .await?
    .ok_or(ApiError::not_found("bug report"))?;
    Ok(ok(updated))
}

/// Soft delete; rows under legal hold refuse to go.
pub async fn delete_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    ensure_report_write(&state, &auth, report_id).await?;

    let deleted = bug_reports::soft_delete(&state.db, report_id, Some(auth.claims.subject)).await?;
    if !deleted {
        return Err(ApiError::conflict(
            "not_deletable",
            "The report is missing, already deleted, or under legal hold",
        ));
    }
    Ok(ok(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub ids: Vec<Uuid>,
}

/// Clears soft-deletes; rows already moved to the archive table are not
/// restorable through this path.
pub async fn restore_reports(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let restored = state
        .retention
        .restore(Some(auth.claims.subject), &request.ids)
        .await?;
    Ok(ok(json!({ "restored": restored })))
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub expires_in: Option<u64>,
    pub download: Option<bool>,
}

/// Time-limited URL for the stored screenshot; presigned on S3, public on
/// the local backend.
pub async fn screenshot_url(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
    Query(query): Query<SignedUrlQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let report = bug_reports::find_by_id(&state.db, report_id)
        .await?
        .ok_or(ApiError::not_found("bug report"))?;
    let key = report
        .screenshot_url
        .as_deref()
        .and_then(crate::storage::storage_key_from_url)
        .ok_or(ApiError::not_found("screenshot"))?;

    let url = state
        .storage
        .get_signed_url(
            &key,
            SignedUrlOptions {
                expires_in_seconds: query.expires_in.unwrap_or(900).min(86_400),
                response_content_type: Some("image/png".to_string()),
                response_content_disposition: query.download.unwrap_or(false).then(|| {
                    format!("attachment; filename=\"{report_id}.png\"")
                }),
            },
        )
        .await?;
    Ok(ok(json!({ "url": url })))
}

async fn ensure_report_write(
    state: &AppState,
    auth: &AuthContext,
    report_id: Uuid,
) -> ApiResult<()> {
    if auth.claims.role == Role::Admin {
        return Ok(());
    }
    let report = bug_reports::find_by_id(&state.db, report_id)
        .await?
        .ok_or(ApiError::not_found("bug report"))?;
    let project = projects::find_by_id(&state.db, report.project_id)
        .await?
        .ok_or(ApiError::not_found("project"))?;
    if project.owner_id != Some(auth.claims.subject) {
        return Err(ApiError::forbidden("You do not own this project"));
    }
    Ok(())
}

fn decode_screenshot(encoded: &str) -> Result<Bytes, ApiError> {
    // Accept both a raw base64 body and a data URL.
    let raw = match encoded.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let bytes = BASE64
        .decode(raw.trim())
        .map_err(|err| ApiError::validation("invalid_screenshot", err.to_string()))?;
    if bytes.len() > MAX_SCREENSHOT_BYTES {
        return Err(ApiError::validation(
            "screenshot_too_large",
            format!("screenshot exceeds {MAX_SCREENSHOT_BYTES} bytes"),
        ));
    }
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_data_urls_and_raw_base64() {
        let raw = BASE64.encode(b"png-bytes");
        assert_eq!(decode_screenshot(&raw).unwrap().as_ref(), b"png-bytes");

        let data_url = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_screenshot(&data_url).unwrap().as_ref(), b"png-bytes");

        assert!(decode_screenshot("!!!not-base64!!!").is_err());
    }
}
