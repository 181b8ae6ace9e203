use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::{with_read_retry, Database, DbResult};

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct ArchivedBugReport {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub status: String,
    pub retention_class: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

/// Copy a live row into the archive table. Runs on the retention batch
/// transaction so the move and the source delete commit together.
pub async fn archive_on(conn: &mut PgConnection, report_id: Uuid) -> DbResult<bool> {
    let result = sqlx::query(
        "INSERT INTO archived_bug_reports (
             id, project_id, title, description, status, priority,
             screenshot_url, thumbnail_url, replay_url, metadata,
             retention_class, created_at, updated_at
         )
         SELECT id, project_id, title, description, status, priority,
                screenshot_url, thumbnail_url, replay_url, metadata,
                retention_class, created_at, updated_at
         FROM bug_reports WHERE id = $1
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(report_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_for_project(db: &Database, project_id: Uuid) -> DbResult<i64> {
    with_read_retry(|| async {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM archived_bug_reports WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(db.pool())
                .await?;
        Ok(row.0)
    })
    .await
}

/// Archived rows age out on their own clock (`archived_retention_days`).
pub async fn purge_older_than(db: &Database, project_id: Uuid, days: i64) -> DbResult<u64> {
    let cutoff = Utc::now() - Duration::days(days);
    let result = sqlx::query(
        "DELETE FROM archived_bug_reports WHERE project_id = $1 AND archived_at < $2",
    )
    .bind(project_id)
    .bind(cutoff)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected())
}
