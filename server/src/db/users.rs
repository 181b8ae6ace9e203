use chrono::{DateTime, Utc};
use common_auth::Role;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::{validate_sort_key, with_read_retry, Database, DbResult, Page, Paged};

pub const SORT_COLUMNS: &[&str] = &["email", "name", "role", "created_at", "updated_at"];

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub oauth_provider: Option<String>,
    #[serde(skip_serializing)]
    pub oauth_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        // The role column is CHECK-constrained; default defensively anyway.
        self.role.parse().unwrap_or(Role::Viewer)
    }
}

/// Exactly one of `password_hash` or the OAuth pair must be present; the
/// database enforces the same XOR with a CHECK constraint.
#[derive(Debug, Clone)]
pub enum Credential {
    Password { hash: String },
    OAuth { provider: String, subject: String },
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub credential: Credential,
}

#[derive(Debug, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
}

pub async fn create(db: &Database, new: NewUser) -> DbResult<User> {
    let mut conn = db.pool().acquire().await?;
    create_on(&mut conn, new).await
}

pub async fn create_on(conn: &mut PgConnection, new: NewUser) -> DbResult<User> {
    let (password_hash, oauth_provider, oauth_id) = match new.credential {
        Credential::Password { hash } => (Some(hash), None, None),
        Credential::OAuth { provider, subject } => (None, Some(provider), Some(subject)),
    };

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, name, role, password_hash, oauth_provider, oauth_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(&new.email)
    .bind(&new.name)
    .bind(new.role.as_str())
    .bind(&password_hash)
    .bind(&oauth_provider)
    .bind(&oauth_id)
    .fetch_one(conn)
    .await?;
    Ok(user)
}

pub async fn find_by_id(db: &Database, id: Uuid) -> DbResult<Option<User>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(db.pool())
            .await?;
        Ok(row)
    })
    .await
}

/// Email matching is case-insensitive, mirroring the unique index.
pub async fn find_by_email(db: &Database, email: &str) -> DbResult<Option<User>> {
    with_read_retry(|| async {
        let row =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(db.pool())
                .await?;
        Ok(row)
    })
    .await
}

pub async fn find_by_oauth(
    db: &Database,
    provider: &str,
    subject: &str,
) -> DbResult<Option<User>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE oauth_provider = $1 AND oauth_id = $2",
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(db.pool())
        .await?;
        Ok(row)
    })
    .await
}

pub async fn update(db: &Database, id: Uuid, patch: UserPatch) -> DbResult<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "UPDATE users
         SET name = COALESCE($2, name),
             role = COALESCE($3, role),
             is_active = COALESCE($4, is_active),
             password_hash = COALESCE($5, password_hash),
             updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(&patch.name)
    .bind(patch.role.map(|r| r.as_str()))
    .bind(patch.is_active)
    .bind(&patch.password_hash)
    .fetch_optional(db.pool())
    .await?;
    Ok(row)
}

/// Users referenced by audit history are never hard-deleted; deactivation
/// is the supported lifecycle end state.
pub async fn deactivate(db: &Database, id: Uuid) -> DbResult<bool> {
    let result =
        sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(db.pool())
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list(
    db: &Database,
    sort_by: &str,
    descending: bool,
    page: Page,
) -> DbResult<Paged<User>> {
    validate_sort_key(sort_by, SORT_COLUMNS)?;
    let direction = if descending { "DESC" } else { "ASC" };

    with_read_retry(|| async {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await?;

        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT * FROM users ORDER BY {sort_by} {direction} LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(db.pool())
        .await?;

        Ok(Paged { rows, page: page.page, limit: page.limit, total: total.0 as u64 })
    })
    .await
}

pub async fn count_admins(db: &Database) -> DbResult<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM users WHERE role = 'admin' AND is_active = TRUE",
    )
    .fetch_one(db.pool())
    .await?;
    Ok(row.0)
}
