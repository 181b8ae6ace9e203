use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_read_retry, Database, DbResult};

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct RetentionPolicyRow {
    pub project_id: Uuid,
    pub bug_report_retention_days: i32,
    pub screenshot_retention_days: i32,
    pub replay_retention_days: i32,
    pub attachment_retention_days: i32,
    pub archived_retention_days: i32,
    pub archive_before_delete: bool,
    pub data_classification: String,
    pub compliance_region: String,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertRetentionPolicy {
    pub project_id: Uuid,
    pub bug_report_retention_days: i32,
    pub screenshot_retention_days: i32,
    pub replay_retention_days: i32,
    pub attachment_retention_days: i32,
    pub archived_retention_days: i32,
    pub archive_before_delete: bool,
    pub data_classification: String,
    pub compliance_region: String,
    pub tier: String,
}

pub async fn upsert(db: &Database, policy: UpsertRetentionPolicy) -> DbResult<RetentionPolicyRow> {
    let row = sqlx::query_as::<_, RetentionPolicyRow>(
        "INSERT INTO retention_policies (
             project_id, bug_report_retention_days, screenshot_retention_days,
             replay_retention_days, attachment_retention_days, archived_retention_days,
             archive_before_delete, data_classification, compliance_region, tier
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (project_id) DO UPDATE SET
             bug_report_retention_days = EXCLUDED.bug_report_retention_days,
             screenshot_retention_days = EXCLUDED.screenshot_retention_days,
             replay_retention_days = EXCLUDED.replay_retention_days,
             attachment_retention_days = EXCLUDED.attachment_retention_days,
             archived_retention_days = EXCLUDED.archived_retention_days,
             archive_before_delete = EXCLUDED.archive_before_delete,
             data_classification = EXCLUDED.data_classification,
             compliance_region = EXCLUDED.compliance_region,
             tier = EXCLUDED.tier,
             updated_at = NOW()
         RETURNING *",
    )
    .bind(policy.project_id)
    .bind(policy.bug_report_retention_days)
    .bind(policy.screenshot_retention_days)
    .bind(policy.replay_retention_days)
    .bind(policy.attachment_retention_days)
    .bind(policy.archived_retention_days)
    .bind(policy.archive_before_delete)
    .bind(&policy.data_classification)
    .bind(&policy.compliance_region)
    .bind(&policy.tier)
    .fetch_one(db.pool())
    .await?;
    Ok(row)
}

pub async fn find_by_project(db: &Database, project_id: Uuid) -> DbResult<Option<RetentionPolicyRow>> {
    with_read_retry(|| async {
        let row = sqlx::query_as::<_, RetentionPolicyRow>(
            "SELECT * FROM retention_policies WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(db.pool())
        .await?;
        Ok(row)
    })
    .await
}

pub async fn delete(db: &Database, project_id: Uuid) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM retention_policies WHERE project_id = $1")
        .bind(project_id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Every project id paired with its policy row when one exists; the
/// retention engine falls back to instance defaults for the rest.
pub async fn list_project_policies(
    db: &Database,
) -> DbResult<Vec<(Uuid, Option<RetentionPolicyRow>)>> {
    #[derive(FromRow)]
    struct JoinRow {
        id: Uuid,
        project_id: Option<Uuid>,
        bug_report_retention_days: Option<i32>,
        screenshot_retention_days: Option<i32>,
        replay_retention_days: Option<i32>,
        attachment_retention_days: Option<i32>,
        archived_retention_days: Option<i32>,
        archive_before_delete: Option<bool>,
        data_classification: Option<String>,
        compliance_region: Option<String>,
        tier: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    with_read_retry(|| async {
        let rows = sqlx::query_as::<_, JoinRow>(
            "SELECT p.id, r.project_id, r.bug_report_retention_days, r.screenshot_retention_days,
                    r.replay_retention_days, r.attachment_retention_days, r.archived_retention_days,
                    r.archive_before_delete, r.data_classification, r.compliance_region, r.tier,
                    r.created_at, r.updated_at
             FROM projects p
             LEFT JOIN retention_policies r ON r.project_id = p.id
             ORDER BY p.created_at",
        )
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let policy = row.project_id.map(|project_id| RetentionPolicyRow {
                    project_id,
                    bug_report_retention_days: row.bug_report_retention_days.unwrap_or(0),
                    screenshot_retention_days: row.screenshot_retention_days.unwrap_or(0),
                    replay_retention_days: row.replay_retention_days.unwrap_or(0),
                    attachment_retention_days: row.attachment_retention_days.unwrap_or(0),
                    archived_retention_days: row.archived_retention_days.unwrap_or(0),
                    archive_before_delete: row.archive_before_delete.unwrap_or(false),
                    data_classification: row
                        .data_classification
                        .unwrap_or_else(|| "general".to_string()),
                    compliance_region: row.compliance_region.unwrap_or_else(|| "none".to_string()),
                    tier: row.tier.unwrap_or_else(|| "free".to_string()),
                    created_at: row.created_at.unwrap_or_else(Utc::now),
                    updated_at: row.updated_at.unwrap_or_else(Utc::now),
                });
                (row.id, policy)
            })
            .collect())
    })
    .await
}
