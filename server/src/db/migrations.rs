use sqlx::{Executor, PgPool};
use tracing::info;

use super::{DbError, DbResult};

/// Embedded migrations, applied in lexical order. Each file runs in its own
/// transaction and is recorded in `migrations_history`; a file that already
/// ran is skipped by name.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_initial.sql", include_str!("../../../migrations/0001_initial.sql")),
    (
        "0002_auth_refresh_tokens.sql",
        include_str!("../../../migrations/0002_auth_refresh_tokens.sql"),
    ),
    ("0003_audit_logs.sql", include_str!("../../../migrations/0003_audit_logs.sql")),
    ("0004_retention.sql", include_str!("../../../migrations/0004_retention.sql")),
    (
        "0005_instance_settings.sql",
        include_str!("../../../migrations/0005_instance_settings.sql"),
    ),
];

pub async fn run(pool: &PgPool) -> DbResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations_history (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT name FROM migrations_history WHERE name = $1")
                .bind(name)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        tx.execute(*sql)
            .await
            .map_err(|err| DbError::Other(format!("migration {name} failed: {err}")))?;
        sqlx::query("INSERT INTO migrations_history (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(migration = name, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_lexically_ordered_and_unique() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
    }
}
