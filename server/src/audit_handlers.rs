use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ok_paginated, ApiResult, Pagination};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{audit_logs, Page};

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub success: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl AuditQuery {
    fn filters(&self) -> audit_logs::AuditLogFilters {
        audit_logs::AuditLogFilters {
            user_id: self.user_id,
            action: self.action.clone(),
            resource: self.resource.clone(),
            success: self.success,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let page = Page::validated(query.page.unwrap_or(1), query.limit.unwrap_or(50))?;
    let sort_by = query.sort_by.as_deref().unwrap_or("timestamp");
    let descending = !matches!(query.sort_order.as_deref(), Some("asc"));

    let result = audit_logs::query(&state.db, query.filters(), sort_by, descending, page).await?;
    let pagination = Pagination::new(result.page, result.limit, result.total);
    Ok(ok_paginated(result.rows, pagination))
}

pub async fn audit_stats(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let stats = audit_logs::stats(&state.db, query.filters()).await?;
    Ok(ok(stats))
}
