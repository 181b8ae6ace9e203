use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    ensure_batch_size, validate_sort_key, with_read_retry, Database, DbResult, Page, Paged,
};

pub const SORT_COLUMNS: &[&str] =
    &["title", "status", "priority", "created_at", "updated_at", "retention_class"];

pub const STATUSES: &[&str] = &["open", "in-progress", "resolved", "closed"];
pub const PRIORITIES: &[&str] = &["low", "medium", "high", "critical"];
pub const RETENTION_CLASSES: &[&str] =
    &["general", "financial", "healthcare", "pii", "sensitive", "government"];

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct BugReport {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub screenshot_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub replay_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub legal_hold: bool,
    pub retention_class: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBugReport {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub retention_class: Option<String>,
}

#[derive(Debug, Default)]
pub struct BugReportPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub retention_class: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct BugReportFilters {
    pub project_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    /// Soft-deleted rows are excluded unless explicitly requested.
    pub include_deleted: bool,
}

pub async fn create(db: &Database, new: NewBugReport) -> DbResult<BugReport> {
    let mut conn = db.pool().acquire().await?;
    create_on(&mut conn, new).await
}

pub async fn create_on(conn: &mut PgConnection, new: NewBugReport) -> DbResult<BugReport> {
    let report = sqlx::query_as::<_, BugReport>(
        "INSERT INTO bug_reports (project_id, title, description, status, priority, metadata, retention_class)
         VALUES ($1, $2, $3, COALESCE($4, 'open'), COALESCE($5, 'medium'), $6, COALESCE($7, 'general'))
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.status)
    .bind(&new.priority)
    .bind(&new.metadata)
    .bind(&new.retention_class)
    .fetch_one(conn)
    .await?;
    Ok(report)
}

/// Single multi-row INSERT; rejects batches above the 1000-row cap before
/// any SQL executes. An empty batch returns an empty vec without a query.
pub async fn create_batch(db: &Database, rows: Vec<NewBugReport>) -> DbResult<Vec<BugReport>> {
    ensure_batch_size(rows.len())?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO bug_reports (project_id, title, description, status, priority, metadata, retention_class) ",
    );
    builder.push_values(rows.iter(), |mut b, row| {
        b.push_bind(row.project_id)
            .push_bind(&row.title)
            .push_bind(&row.description)
            .push_bind(row.status.as_deref().unwrap_or("open"))
            .push_bind(row.priority.as_deref().unwrap_or("medium"))
            .push_bind(&row.metadata)
            .push_bind(row.retention_class.as_deref().unwrap_or("general"));
    });
    builder.push(" RETURNING *");

    let inserted = builder
        .build_query_as::<BugReport>()
        .fetch_all(db.pool())
        .await?;
    Ok(inserted)
}

/// Split an oversized batch into `chunk`-sized sub-batches, each within
/// the single-statement cap.
pub async fn create_batch_auto(
    db: &Database,
    rows: Vec<NewBugReport>,
    chunk: usize,
) -> DbResult<Vec<BugReport>> {
    let chunk = chunk.clamp(1, super::MAX_BATCH_ROWS);
    let mut inserted = Vec::with_capacity(rows.len());
    for piece in rows.chunks(chunk) {
        inserted.extend(create_batch(db, piece.to_vec()).await?);
    }
    Ok(inserted)
}

pub async fn find_by_id(db: &Database, id: Uuid) -> DbResult<Option<BugReport>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, BugReport>(
            "SELECT * FROM bug_reports WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(db.pool())
        .await?;
        Ok(row)
    })
    .await
}

pub async fn update(db: &Database, id: Uuid, patch: BugReportPatch) -> DbResult<Option<BugReport>> {
    let row = sqlx::query_as::<_, BugReport>(
        "UPDATE bug_reports
         SET title = COALESCE($2, title),
             description = COALESCE($3, description),
             status = COALESCE($4, status),
             priority = COALESCE($5, priority),
             retention_class = COALESCE($6, retention_class),
             updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL
         RETURNING *",
    )
    .bind(id)
    .bind(&patch.title)
    .bind(&patch.description)
    .bind(&patch.status)
    .bind(&patch.priority)
    .bind(&patch.retention_class)
    .fetch_optional(db.pool())
    .await?;
    Ok(row)
}

pub async fn set_screenshot(db: &Database, id: Uuid, key: &str) -> DbResult<()> {
    sqlx::query("UPDATE bug_reports SET screenshot_url = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(key)
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn set_thumbnail(db: &Database, id: Uuid, key: &str) -> DbResult<()> {
    sqlx::query("UPDATE bug_reports SET thumbnail_url = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(key)
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn set_replay(db: &Database, id: Uuid, key_prefix: &str) -> DbResult<()> {
    sqlx::query("UPDATE bug_reports SET replay_url = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(key_prefix)
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn soft_delete(db: &Database, id: Uuid, deleted_by: Option<Uuid>) -> DbResult<bool> {
    let result = sqlx::query(
        "UPDATE bug_reports
         SET deleted_at = NOW(), deleted_by = $2, updated_at = NOW()
         WHERE id = $1 AND deleted_at IS NULL AND legal_hold = FALSE",
    )
    .bind(id)
    .bind(deleted_by)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Clears `deleted_at` for soft-deleted rows still present in
/// `bug_reports`. Rows already archived are not reachable from here.
pub async fn restore(db: &Database, ids: &[Uuid]) -> DbResult<u64> {
    let result = sqlx::query(
        "UPDATE bug_reports
         SET deleted_at = NULL, deleted_by = NULL, updated_at = NOW()
         WHERE id = ANY($1) AND deleted_at IS NOT NULL",
    )
    .bind(ids)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_legal_hold(db: &Database, ids: &[Uuid], hold: bool) -> DbResult<u64> {
    let result =
        sqlx::query("UPDATE bug_reports SET legal_hold = $2, updated_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .bind(hold)
            .execute(db.pool())
            .await?;
    Ok(result.rows_affected())
}

pub async fn hard_delete_on(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM bug_reports WHERE id = $1 AND legal_hold = FALSE")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_for_project(db: &Database, project_id: Uuid) -> DbResult<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM bug_reports WHERE project_id = $1 AND deleted_at IS NULL",
    )
    .bind(project_id)
    .fetch_one(db.pool())
    .await?;
    Ok(row.0)
}

pub async fn list(
    db: &Database,
    filters: BugReportFilters,
    sort_by: &str,
    descending: bool,
    page: Page,
) -> DbResult<Paged<BugReport>> {
    validate_sort_key(sort_by, SORT_COLUMNS)?;
    let direction = if descending { "DESC" } else { "ASC" };

    with_read_retry(|| async {
        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM bug_reports");
        push_filters(&mut count, &filters);
        let total: i64 = count.build_query_scalar().fetch_one(db.pool()).await?;

        let mut select: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM bug_reports");
        push_filters(&mut select, &filters);
        select.push(format!(" ORDER BY {sort_by} {direction} "));
        select.push(" LIMIT ");
        select.push_bind(page.limit as i64);
        select.push(" OFFSET ");
        select.push_bind(page.offset());

        let rows = select
            .build_query_as::<BugReport>()
            .fetch_all(db.pool())
            .await?;

        Ok(Paged { rows, page: page.page, limit: page.limit, total: total as u64 })
    })
    .await
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &BugReportFilters) {
    builder.push(" WHERE 1 = 1");
    if !filters.include_deleted {
        builder.push(" AND deleted_at IS NULL");
    }
    if let Some(project_id) = filters.project_id {
        builder.push(" AND project_id = ");
        builder.push_bind(project_id);
    }
    if let Some(status) = &filters.status {
        builder.push(" AND status = ");
        builder.push_bind(status.clone());
    }
    if let Some(priority) = &filters.priority {
        builder.push(" AND priority = ");
        builder.push_bind(priority.clone());
    }
    if let Some(search) = &filters.search {
        builder.push(" AND title ILIKE ");
        builder.push_bind(format!("%{search}%"));
    }
}
