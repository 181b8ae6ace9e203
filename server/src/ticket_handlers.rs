use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{bug_reports, tickets, DbError};
use crate::queue::{EnqueueOptions, QueueName};

#[derive(Debug, Deserialize)]
pub struct NewTicketRequest {
    pub external_id: String,
    pub platform: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Opaque link to an external tracker. The `integrations` queue gets a
/// copy so out-of-process connectors can sync if one is attached.
pub async fn create_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
    Json(request): Json<NewTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    bug_reports::find_by_id(&state.db, report_id)
        .await?
        .ok_or(ApiError::not_found("bug report"))?;

    let ticket = tickets::create(
        &state.db,
        tickets::NewTicket {
            bug_report_id: report_id,
            external_id: request.external_id,
            platform: request.platform,
            status: request.status,
        },
    )
    .await
    .map_err(|err| match err {
        DbError::ForeignKeyViolation(_) => ApiError::not_found("bug report"),
        other => other.into(),
    })?;

    let _ = state
        .queue
        .add_job(
            QueueName::Integrations,
            json!({
                "kind": "ticket-linked",
                "ticket_id": ticket.id,
                "report_id": report_id,
                "platform": ticket.platform,
                "external_id": ticket.external_id,
            }),
            EnqueueOptions::default(),
        )
        .await;

    Ok((StatusCode::CREATED, ok(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(report_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Viewer)?;
    let rows = tickets::list_for_report(&state.db, report_id).await?;
    Ok(ok(rows))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::User)?;
    let deleted = tickets::delete(&state.db, ticket_id).await?;
    if !deleted {
        return Err(ApiError::not_found("ticket"));
    }
    Ok(ok(json!({ "deleted": true })))
}
