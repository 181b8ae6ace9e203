use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};

use super::{with_read_retry, Database, DbResult};

/// The singleton settings row. Seeded by migration; `initialized` stays
/// false until the setup wizard completes.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct InstanceSettings {
    pub instance_name: String,
    pub instance_url: String,
    pub support_email: String,
    pub storage_backend: String,
    #[serde(skip_serializing)]
    pub storage_settings: Option<serde_json::Value>,
    pub jwt_access_expiry_seconds: i32,
    pub jwt_refresh_expiry_seconds: i32,
    pub rate_limit_max: i32,
    pub rate_limit_window_seconds: i32,
    pub cors_origins: Vec<String>,
    pub retention_days: i32,
    pub max_reports_per_project: i32,
    pub session_replay_enabled: bool,
    pub initialized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct SettingsPatch {
    pub instance_name: Option<String>,
    pub instance_url: Option<String>,
    pub support_email: Option<String>,
    pub jwt_access_expiry_seconds: Option<i32>,
    pub jwt_refresh_expiry_seconds: Option<i32>,
    pub rate_limit_max: Option<i32>,
    pub rate_limit_window_seconds: Option<i32>,
    pub cors_origins: Option<Vec<String>>,
    pub retention_days: Option<i32>,
    pub max_reports_per_project: Option<i32>,
    pub session_replay_enabled: Option<bool>,
}

const SELECT: &str = "SELECT instance_name, instance_url, support_email, storage_backend,
    storage_settings, jwt_access_expiry_seconds, jwt_refresh_expiry_seconds, rate_limit_max,
    rate_limit_window_seconds, cors_origins, retention_days, max_reports_per_project,
    session_replay_enabled, initialized, created_at, updated_at
    FROM instance_settings WHERE id = TRUE";

pub async fn get(db: &Database) -> DbResult<InstanceSettings> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, InstanceSettings>(SELECT)
            .fetch_one(db.pool())
            .await?;
        Ok(row)
    })
    .await
}

pub async fn update(db: &Database, patch: SettingsPatch) -> DbResult<InstanceSettings> {
    let row = sqlx::query_as::<_, InstanceSettings>(
        "UPDATE instance_settings SET
             instance_name = COALESCE($1, instance_name),
             instance_url = COALESCE($2, instance_url),
             support_email = COALESCE($3, support_email),
             jwt_access_expiry_seconds = COALESCE($4, jwt_access_expiry_seconds),
             jwt_refresh_expiry_seconds = COALESCE($5, jwt_refresh_expiry_seconds),
             rate_limit_max = COALESCE($6, rate_limit_max),
             rate_limit_window_seconds = COALESCE($7, rate_limit_window_seconds),
             cors_origins = COALESCE($8, cors_origins),
             retention_days = COALESCE($9, retention_days),
             max_reports_per_project = COALESCE($10, max_reports_per_project),
             session_replay_enabled = COALESCE($11, session_replay_enabled),
             updated_at = NOW()
         WHERE id = TRUE
         RETURNING instance_name, instance_url, support_email, storage_backend,
             storage_settings, jwt_access_expiry_seconds, jwt_refresh_expiry_seconds,
             rate_limit_max, rate_limit_window_seconds, cors_origins, retention_days,
             max_reports_per_project, session_replay_enabled, initialized, created_at, updated_at",
    )
    .bind(&patch.instance_name)
    .bind(&patch.instance_url)
    .bind(&patch.support_email)
    .bind(patch.jwt_access_expiry_seconds)
    .bind(patch.jwt_refresh_expiry_seconds)
    .bind(patch.rate_limit_max)
    .bind(patch.rate_limit_window_seconds)
    .bind(&patch.cors_origins)
    .bind(patch.retention_days)
    .bind(patch.max_reports_per_project)
    .bind(patch.session_replay_enabled)
    .fetch_one(db.pool())
    .await?;
    Ok(row)
}

/// Transaction-composable: the setup wizard writes identity, storage
/// config, and the `initialized` flag together with the first admin user.
pub async fn initialize_on(
    conn: &mut PgConnection,
    instance_name: &str,
    instance_url: &str,
    support_email: &str,
    storage_backend: &str,
    storage_settings: Option<&serde_json::Value>,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE instance_settings SET
             instance_name = $1,
             instance_url = $2,
             support_email = $3,
             storage_backend = $4,
             storage_settings = $5,
             initialized = TRUE,
             updated_at = NOW()
         WHERE id = TRUE",
    )
    .bind(instance_name)
    .bind(instance_url)
    .bind(support_email)
    .bind(storage_backend)
    .bind(storage_settings)
    .execute(conn)
    .await?;
    Ok(())
}
