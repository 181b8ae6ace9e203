use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_audit::{AuditEntry, AuditError, AuditResult, AuditSink};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{validate_sort_key, with_read_retry, Database, DbResult, Page, Paged};

pub const SORT_COLUMNS: &[&str] = &["timestamp", "action", "resource", "success"];

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone)]
pub struct AuditLogFilters {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub success: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize)]
pub struct AuditLogStats {
    pub total: i64,
    pub failures: i64,
    pub by_action: Vec<ActionCount>,
    pub by_user: Vec<UserCount>,
}

#[derive(Debug, FromRow, serde::Serialize)]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}

#[derive(Debug, FromRow, serde::Serialize)]
pub struct UserCount {
    pub user_id: Option<Uuid>,
    pub count: i64,
}

/// Drains the in-memory audit buffer into the append-only table.
pub struct PgAuditSink {
    db: Database,
}

impl PgAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write_batch(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO audit_logs (id, timestamp, user_id, action, resource, resource_id,
             ip_address, user_agent, success, error_message, details) ",
        );
        builder.push_values(entries, |mut b, entry| {
            b.push_bind(entry.id)
                .push_bind(entry.timestamp)
                .push_bind(entry.user_id)
                .push_bind(&entry.action)
                .push_bind(&entry.resource)
                .push_bind(&entry.resource_id)
                .push_bind(&entry.ip_address)
                .push_bind(&entry.user_agent)
                .push_bind(entry.success)
                .push_bind(&entry.error_message)
                .push_bind(&entry.details);
        });

        builder
            .build()
            .execute(self.db.pool())
            .await
            .map_err(|err| AuditError::Sink(err.to_string()))?;
        Ok(())
    }
}

pub async fn query(
    db: &Database,
    filters: AuditLogFilters,
    sort_by: &str,
    descending: bool,
    page: Page,
) -> DbResult<Paged<AuditLogRow>> {
    validate_sort_key(sort_by, SORT_COLUMNS)?;
    let direction = if descending { "DESC" } else { "ASC" };

    with_read_retry(|| async {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut count, &filters);
        let total: i64 = count.build_query_scalar().fetch_one(db.pool()).await?;

        let mut select: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, timestamp, user_id, action, resource, resource_id, ip_address,
             user_agent, success, error_message, details FROM audit_logs",
        );
        push_filters(&mut select, &filters);
        // seq breaks ties between entries sharing a timestamp.
        select.push(format!(" ORDER BY {sort_by} {direction}, seq {direction} "));
        select.push(" LIMIT ");
        select.push_bind(page.limit as i64);
        select.push(" OFFSET ");
        select.push_bind(page.offset());

        let rows = select
            .build_query_as::<AuditLogRow>()
            .fetch_all(db.pool())
            .await?;

        Ok(Paged { rows, page: page.page, limit: page.limit, total: total as u64 })
    })
    .await
}

pub async fn stats(db: &Database, filters: AuditLogFilters) -> DbResult<AuditLogStats> {
    with_read_retry(|| async {
        let mut totals: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE NOT success) AS failures FROM audit_logs",
        );
        push_filters(&mut totals, &filters);
        let (total, failures): (i64, i64) =
            totals.build_query_as().fetch_one(db.pool()).await?;

        let mut by_action: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT action, COUNT(*) AS count FROM audit_logs");
        push_filters(&mut by_action, &filters);
        by_action.push(" GROUP BY action ORDER BY count DESC LIMIT 50");
        let by_action = by_action
            .build_query_as::<ActionCount>()
            .fetch_all(db.pool())
            .await?;

        let mut by_user: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT user_id, COUNT(*) AS count FROM audit_logs");
        push_filters(&mut by_user, &filters);
        by_user.push(" GROUP BY user_id ORDER BY count DESC LIMIT 50");
        let by_user = by_user
            .build_query_as::<UserCount>()
            .fetch_all(db.pool())
            .await?;

        Ok(AuditLogStats { total, failures, by_action, by_user })
    })
    .await
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &AuditLogFilters) {
    builder.push(" WHERE 1 = 1");
    if let Some(user_id) = filters.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(action) = &filters.action {
        builder.push(" AND action = ");
        builder.push_bind(action.clone());
    }
    if let Some(resource) = &filters.resource {
        builder.push(" AND resource = ");
        builder.push_bind(resource.clone());
    }
    if let Some(success) = filters.success {
        builder.push(" AND success = ");
        builder.push_bind(success);
    }
    if let Some(start) = filters.start_date {
        builder.push(" AND timestamp >= ");
        builder.push_bind(start);
    }
    if let Some(end) = filters.end_date {
        builder.push(" AND timestamp <= ");
        builder.push_bind(end);
    }
}
