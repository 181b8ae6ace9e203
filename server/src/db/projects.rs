use chrono::{DateTime, Utc};
use common_auth::generate_api_key;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::{validate_sort_key, with_read_retry, Database, DbResult, Page, Paged};

pub const SORT_COLUMNS: &[&str] = &["name", "created_at", "updated_at"];

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub owner_id: Option<Uuid>,
    pub settings: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub settings: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub settings: Option<serde_json::Value>,
}

pub async fn create(db: &Database, new: NewProject) -> DbResult<Project> {
    let api_key = generate_api_key();
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, api_key, owner_id, settings)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(&new.name)
    .bind(&api_key)
    .bind(new.owner_id)
    .bind(&new.settings)
    .fetch_one(db.pool())
    .await?;
    Ok(project)
}

pub async fn find_by_id(db: &Database, id: Uuid) -> DbResult<Option<Project>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(db.pool())
            .await?;
        Ok(row)
    })
    .await
}

/// Exact-match lookup used by the ingestion credential path.
pub async fn find_by_api_key(db: &Database, api_key: &str) -> DbResult<Option<Project>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(db.pool())
            .await?;
        Ok(row)
    })
    .await
}

pub async fn update(db: &Database, id: Uuid, patch: ProjectPatch) -> DbResult<Option<Project>> {
    let row = sqlx::query_as::<_, Project>(
        "UPDATE projects
         SET name = COALESCE($2, name),
             settings = COALESCE($3, settings),
             updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(&patch.name)
    .bind(&patch.settings)
    .fetch_optional(db.pool())
    .await?;
    Ok(row)
}

/// Rotating the key invalidates the prior one in the same statement; there
/// is no window where both keys authenticate.
pub async fn regenerate_api_key(db: &Database, id: Uuid) -> DbResult<Option<Project>> {
    let api_key = generate_api_key();
    let row = sqlx::query_as::<_, Project>(
        "UPDATE projects SET api_key = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&api_key)
    .fetch_optional(db.pool())
    .await?;
    Ok(row)
}

pub async fn delete(db: &Database, id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list(
    db: &Database,
    owner_id: Option<Uuid>,
    sort_by: &str,
    descending: bool,
    page: Page,
) -> DbResult<Paged<Project>> {
    validate_sort_key(sort_by, SORT_COLUMNS)?;
    let direction = if descending { "DESC" } else { "ASC" };

    with_read_retry(|| async {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM projects WHERE ($1::uuid IS NULL OR owner_id = $1)",
        )
        .bind(owner_id)
        .fetch_one(db.pool())
        .await?;

        let rows = sqlx::query_as::<_, Project>(&format!(
            "SELECT * FROM projects
             WHERE ($1::uuid IS NULL OR owner_id = $1)
             ORDER BY {sort_by} {direction}
             LIMIT $2 OFFSET $3"
        ))
        .bind(owner_id)
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(db.pool())
        .await?;

        Ok(Paged { rows, page: page.page, limit: page.limit, total: total.0 as u64 })
    })
    .await
}

/// Transaction-composable variant used by project deletion, which also has
/// to clear object storage under the same decision.
pub async fn delete_on(conn: &mut PgConnection, id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
