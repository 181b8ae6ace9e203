use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Database, DbResult};

/// Refresh-token allowlist row joined with its account. Tokens are single
/// use: consuming one deletes it in the same transaction, and the refresh
/// endpoint mints a replacement.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshAccount {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub email: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
}

pub async fn insert(
    db: &Database,
    jti: Uuid,
    user_id: Uuid,
    token_hash: &[u8],
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO auth_refresh_tokens (jti, user_id, token_hash, issued_at, expires_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(jti)
    .bind(user_id)
    .bind(token_hash)
    .bind(issued_at)
    .bind(expires_at)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Look up and hard-revoke in one transaction; expired or unknown tokens
/// return `None`. The SELECT takes the row lock so two concurrent
/// refreshes with the same cookie cannot both win.
pub async fn consume(db: &Database, token_hash: &[u8]) -> DbResult<Option<RefreshAccount>> {
    let hash = token_hash.to_vec();
    db.transaction(move |conn| {
        Box::pin(async move {
            let row = sqlx::query_as::<_, RefreshAccount>(
                "SELECT r.jti, r.user_id, r.expires_at,
                        u.email, u.name, u.role, u.is_active
                 FROM auth_refresh_tokens r
                 JOIN users u ON u.id = r.user_id
                 WHERE r.token_hash = $1
                 FOR UPDATE",
            )
            .bind(&hash)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(account) = row else { return Ok(None) };

            sqlx::query("DELETE FROM auth_refresh_tokens WHERE jti = $1")
                .bind(account.jti)
                .execute(&mut *conn)
                .await?;

            if account.expires_at <= Utc::now() || !account.is_active {
                return Ok(None);
            }
            Ok(Some(account))
        })
    })
    .await
}

pub async fn delete_by_hash(db: &Database, token_hash: &[u8]) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM auth_refresh_tokens WHERE token_hash = $1")
        .bind(token_hash)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_expired(db: &Database) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM auth_refresh_tokens WHERE expires_at <= NOW()")
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected())
}
