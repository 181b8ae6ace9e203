use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_read_retry, Database, DbResult};

/// Opaque link to an external tracker. No business logic beyond storage.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct Ticket {
    pub id: Uuid,
    pub bug_report_id: Uuid,
    pub external_id: String,
    pub platform: String,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub bug_report_id: Uuid,
    pub external_id: String,
    pub platform: String,
    pub status: Option<String>,
}

pub async fn create(db: &Database, new: NewTicket) -> DbResult<Ticket> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "INSERT INTO tickets (bug_report_id, external_id, platform, status)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(new.bug_report_id)
    .bind(&new.external_id)
    .bind(&new.platform)
    .bind(&new.status)
    .fetch_one(db.pool())
    .await?;
    Ok(ticket)
}

pub async fn list_for_report(db: &Database, bug_report_id: Uuid) -> DbResult<Vec<Ticket>> {
    with_read_retry(|| async {
        let rows = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE bug_report_id = $1 ORDER BY created_at",
        )
        .bind(bug_report_id)
        .fetch_all(db.pool())
        .await?;
        Ok(rows)
    })
    .await
}

pub async fn delete(db: &Database, id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}
