use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_read_retry, Database, DbResult};

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct Session {
    pub id: Uuid,
    pub bug_report_id: Uuid,
    pub events: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    /// Populated once the replay worker has chunked the stream out to
    /// object storage; `events` is cleared at the same time.
    pub chunk_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub bug_report_id: Uuid,
    pub events: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
}

pub async fn create(db: &Database, new: NewSession) -> DbResult<Session> {
    let session = sqlx::query_as::<_, Session>(
        "INSERT INTO sessions (bug_report_id, events, duration_ms)
         VALUES ($1, $2, $3)
         RETURNING *",
    )
    .bind(new.bug_report_id)
    .bind(&new.events)
    .bind(new.duration_ms)
    .fetch_one(db.pool())
    .await?;
    Ok(session)
}

pub async fn find_by_id(db: &Database, id: Uuid) -> DbResult<Option<Session>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(db.pool())
            .await?;
        Ok(row)
    })
    .await
}

pub async fn list_for_report(db: &Database, bug_report_id: Uuid) -> DbResult<Vec<Session>> {
    with_read_retry(|| async {
        let rows = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE bug_report_id = $1 ORDER BY created_at",
        )
        .bind(bug_report_id)
        .fetch_all(db.pool())
        .await?;
        Ok(rows)
    })
    .await
}

/// Swap the inline event stream for the chunk index once packaging is done.
pub async fn mark_packaged(
    db: &Database,
    id: Uuid,
    chunk_count: i32,
    duration_ms: i64,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE sessions SET events = NULL, chunk_count = $2, duration_ms = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(chunk_count)
    .bind(duration_ms)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn delete(db: &Database, id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}
