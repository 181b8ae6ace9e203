use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use common_audit::{AuditEntry, AuditRecorder};
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{
    archived_reports, bug_reports, instance_settings, retention_policies, Database, DbError,
};
use crate::queue::{EnqueueOptions, JobQueue, QueueError, QueueName};
use crate::storage::{keys, storage_key_from_url, ObjectStorage, StorageError};

use super::policy::{resolve_effective, EffectivePolicy};

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("destructive apply requires confirm=true")]
    ConfirmationRequired,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectPreview {
    pub project_id: Uuid,
    pub report_count: u64,
    pub storage_bytes: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewResult {
    pub total_reports: u64,
    pub affected_projects: Vec<ProjectPreview>,
    pub total_storage_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub confirm: bool,
    pub batch_size: usize,
    /// Abort once failed rows exceed this percentage of processed rows.
    pub max_error_rate: f64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self { dry_run: true, confirm: false, batch_size: 100, max_error_rate: 5.0 }
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ApplyStats {
    pub dry_run: bool,
    pub total_deleted: u64,
    pub total_archived: u64,
    pub storage_freed_bytes: u64,
    pub projects_processed: u64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub aborted: bool,
}

/// Longest compliance floor in the table (kz/ca healthcare).
const AUDIT_LOG_RETENTION_DAYS: i64 = 3_650;

#[derive(Debug, FromRow)]
struct EligibleRow {
    id: Uuid,
    project_id: Uuid,
    screenshot_url: Option<String>,
    thumbnail_url: Option<String>,
    replay_url: Option<String>,
}

/// Enforces per-project data-lifecycle rules: resolves the effective
/// policy, previews eligible rows read-only, and applies deletion or
/// archival in short locked batches.
pub struct RetentionEngine {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    queue: JobQueue,
    audit: AuditRecorder,
    certificate_secret: String,
}

impl RetentionEngine {
    pub fn new(
        db: Database,
        storage: Arc<dyn ObjectStorage>,
        queue: JobQueue,
        audit: AuditRecorder,
        certificate_secret: String,
    ) -> Self {
        Self { db, storage, queue, audit, certificate_secret }
    }

    /// Read-only: counts and sizes what the next apply would touch.
    /// A pure function of database state and configuration.
    pub async fn preview(&self, project_id: Option<Uuid>) -> Result<PreviewResult, RetentionError> {
        let settings = instance_settings::get(&self.db).await?;
        let policies = retention_policies::list_project_policies(&self.db).await?;

        let mut result = PreviewResult {
            total_reports: 0,
            affected_projects: Vec::new(),
            total_storage_bytes: 0,
        };

        for (pid, row) in policies {
            if project_id.is_some_and(|filter| filter != pid) {
                continue;
            }
            let policy = resolve_effective(pid, row.as_ref(), &settings);
            let cutoff = cutoff_for(&policy);
            let rows = self.eligible_rows(pid, cutoff, None).await?;
            if rows.is_empty() {
                continue;
            }

            let mut bytes = 0u64;
            for row in &rows {
                bytes += self.row_storage_bytes(row).await;
            }

            result.total_reports += rows.len() as u64;
            result.total_storage_bytes += bytes;
            result.affected_projects.push(ProjectPreview {
                project_id: pid,
                report_count: rows.len() as u64,
                storage_bytes: bytes,
            });
        }

        Ok(result)
    }

    /// Batch apply. Rows are claimed with `FOR UPDATE SKIP LOCKED` so a
    /// concurrent scheduler or an interactive admin never processes the
    /// same row twice; the advisory-locked scheduler keeps whole runs from
    /// overlapping on top of that.
    pub async fn apply(&self, options: ApplyOptions) -> Result<ApplyStats, RetentionError> {
        if !options.dry_run && !options.confirm {
            return Err(RetentionError::ConfirmationRequired);
        }
        let batch_size = options.batch_size.clamp(1, 1_000);
        let started = Instant::now();

        let settings = instance_settings::get(&self.db).await?;
        let policies = retention_policies::list_project_policies(&self.db).await?;

        let mut stats = ApplyStats { dry_run: options.dry_run, ..Default::default() };
        let mut processed = 0u64;

        'projects: for (pid, row) in policies {
            let policy = resolve_effective(pid, row.as_ref(), &settings);
            let cutoff = cutoff_for(&policy);
            stats.projects_processed += 1;

            if options.dry_run {
                let rows = self.eligible_rows(pid, cutoff, None).await?;
                stats.total_deleted += rows.len() as u64;
                continue;
            }

            let mut project_deleted = 0u64;
            let mut project_bytes = 0u64;
            loop {
                let batch = self
                    .apply_batch(pid, &policy, cutoff, batch_size, &mut stats)
                    .await?;
                processed += batch.processed;
                project_deleted += batch.deleted;
                project_bytes += batch.freed_bytes;

                self.audit.record(
                    AuditEntry::new("retention.batch", "bug_reports", batch.errors == 0)
                        .resource_id(pid.to_string())
                        .details(json!({
                            "project_id": pid,
                            "deleted": batch.deleted,
                            "archived": batch.archived,
                            "storage_freed_bytes": batch.freed_bytes,
                            "errors": batch.errors,
                        })),
                );

                if processed > 0 {
                    let rate = stats.errors.len() as f64 / processed as f64 * 100.0;
                    if rate > options.max_error_rate {
                        error!(
                            project_id = %pid,
                            error_rate = rate,
                            processed,
                            "retention apply aborted: error rate exceeded"
                        );
                        stats.aborted = true;
                        break 'projects;
                    }
                }

                if batch.processed < batch_size as u64 {
                    break;
                }
                // Yield between batches so shutdown and interactive work
                // can take the locks we just released.
                tokio::task::yield_now().await;
            }

            let purged = archived_reports::purge_older_than(
                &self.db,
                pid,
                policy.archived_retention_days as i64,
            )
            .await?;
            if purged > 0 {
                info!(project_id = %pid, purged, "purged expired archived reports");
            }

            if policy.compliance_region.requires_deletion_certificate() && project_deleted > 0 {
                self.emit_certificate(pid, &policy, project_deleted, project_bytes);
            }

            stats.total_deleted += project_deleted;
            stats.storage_freed_bytes += project_bytes;
        }

        if !options.dry_run && !stats.aborted {
            // The audit table is append-only for everyone else; only this
            // bound, set by the longest compliance floor, ever removes rows.
            let audit_cutoff = Utc::now() - Duration::days(AUDIT_LOG_RETENTION_DAYS);
            let purged = sqlx::query("DELETE FROM audit_logs WHERE timestamp < $1")
                .bind(audit_cutoff)
                .execute(self.db.pool())
                .await
                .map_err(DbError::from)?
                .rows_affected();
            if purged > 0 {
                info!(purged, "purged audit entries past the compliance horizon");
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        self.audit.record(
            AuditEntry::new("retention.apply", "bug_reports", !stats.aborted).details(json!({
                "dry_run": stats.dry_run,
                "total_deleted": stats.total_deleted,
                "total_archived": stats.total_archived,
                "storage_freed_bytes": stats.storage_freed_bytes,
                "projects_processed": stats.projects_processed,
                "duration_ms": stats.duration_ms,
                "errors": stats.errors,
                "aborted": stats.aborted,
            })),
        );
        info!(
            deleted = stats.total_deleted,
            archived = stats.total_archived,
            freed = stats.storage_freed_bytes,
            duration_ms = stats.duration_ms,
            aborted = stats.aborted,
            "retention apply finished"
        );
        Ok(stats)
    }

    /// Admin-only switch; held rows are excluded from every deletion path
    /// until released, at which point age is re-evaluated next cycle.
    pub async fn apply_legal_hold(
        &self,
        actor: Option<Uuid>,
        ids: &[Uuid],
        hold: bool,
    ) -> Result<u64, RetentionError> {
        let updated = bug_reports::set_legal_hold(&self.db, ids, hold).await?;
        let mut entry = AuditEntry::new(
            if hold { "retention.legal_hold.set" } else { "retention.legal_hold.clear" },
            "bug_reports",
            true,
        )
        .details(json!({ "ids": ids, "updated": updated }));
        if let Some(actor) = actor {
            entry = entry.user(actor);
        }
        self.audit.record(entry);
        Ok(updated)
    }

    /// Un-soft-delete rows still present in `bug_reports`; archived rows
    /// are beyond this path.
    pub async fn restore(&self, actor: Option<Uuid>, ids: &[Uuid]) -> Result<u64, RetentionError> {
        let restored = bug_reports::restore(&self.db, ids).await?;
        let mut entry = AuditEntry::new("retention.restore", "bug_reports", true)
            .details(json!({ "ids": ids, "restored": restored }));
        if let Some(actor) = actor {
            entry = entry.user(actor);
        }
        self.audit.record(entry);
        Ok(restored)
    }

    async fn eligible_rows(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<EligibleRow>, RetentionError> {
        let rows = sqlx::query_as::<_, EligibleRow>(
            "SELECT id, project_id, screenshot_url, thumbnail_url, replay_url
             FROM bug_reports
             WHERE project_id = $1 AND created_at < $2
               AND legal_hold = FALSE AND deleted_at IS NULL
             ORDER BY created_at
             LIMIT $3",
        )
        .bind(project_id)
        .bind(cutoff)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::from)?;
        Ok(rows)
    }

    async fn apply_batch(
        &self,
        project_id: Uuid,
        policy: &EffectivePolicy,
        cutoff: DateTime<Utc>,
        batch_size: usize,
        stats: &mut ApplyStats,
    ) -> Result<BatchOutcome, RetentionError> {
        let mut outcome = BatchOutcome::default();

        // Claim the batch under row locks; concurrent claimants skip past
        // locked rows instead of blocking.
        let claimed: Vec<EligibleRow> = self
            .db
            .transaction(|conn| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, EligibleRow>(
                        "SELECT id, project_id, screenshot_url, thumbnail_url, replay_url
                         FROM bug_reports
                         WHERE project_id = $1 AND created_at < $2
                           AND legal_hold = FALSE AND deleted_at IS NULL
                         ORDER BY created_at
                         LIMIT $3
                         FOR UPDATE SKIP LOCKED",
                    )
                    .bind(project_id)
                    .bind(cutoff)
                    .bind(batch_size as i64)
                    .fetch_all(&mut *conn)
                    .await?;

                    // Mark claimed rows so a crash between storage cleanup
                    // and row removal leaves them soft-deleted, not live.
                    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
                    sqlx::query(
                        "UPDATE bug_reports SET deleted_at = NOW() WHERE id = ANY($1)",
                    )
                    .bind(&ids)
                    .execute(&mut *conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await?;

        for row in claimed {
            outcome.processed += 1;
            match self.remove_row(&row, policy).await {
                Ok(removal) => {
                    outcome.deleted += 1;
                    outcome.freed_bytes += removal.freed_bytes;
                    if removal.archived {
                        outcome.archived += 1;
                        stats.total_archived += 1;
                    }
                }
                Err(err) => {
                    outcome.errors += 1;
                    warn!(report_id = %row.id, error = %err, "retention removal failed");
                    stats.errors.push(format!("{}: {err}", row.id));
                    // Return the row to the eligible pool for the next run.
                    let _ = sqlx::query(
                        "UPDATE bug_reports SET deleted_at = NULL WHERE id = $1",
                    )
                    .bind(row.id)
                    .execute(self.db.pool())
                    .await;
                }
            }
        }

        Ok(outcome)
    }

    async fn remove_row(
        &self,
        row: &EligibleRow,
        policy: &EffectivePolicy,
    ) -> Result<RowRemoval, RetentionError> {
        let mut removal = RowRemoval::default();
        removal.freed_bytes += self.row_storage_bytes(row).await;

        let object_keys = row_object_keys(row);
        if policy.archive_before_delete {
            for key in &object_keys {
                self.archive_object(key).await?;
            }
        }

        for key in &object_keys {
            self.storage.delete_object(key).await?;
        }
        let replay_prefix = keys::replay_prefix(row.project_id, row.id);
        self.storage.delete_folder(&replay_prefix).await?;

        if policy.compliance_region.requires_true_deletion() {
            self.confirm_deleted(&object_keys).await?;
        }

        let archived = if policy.archive_before_delete {
            let row_id = row.id;
            self.db
                .transaction(|conn| {
                    Box::pin(async move {
                        let archived = archived_reports::archive_on(conn, row_id).await?;
                        bug_reports::hard_delete_on(conn, row_id).await?;
                        Ok(archived)
                    })
                })
                .await?
        } else {
            let row_id = row.id;
            self.db
                .transaction(|conn| {
                    Box::pin(async move { bug_reports::hard_delete_on(conn, row_id).await })
                })
                .await?;
            false
        };

        removal.archived = archived;
        Ok(removal)
    }

    /// Copy an object under the `archive/` namespace before shredding the
    /// original.
    async fn archive_object(&self, key: &str) -> Result<(), RetentionError> {
        match self.storage.get_object(key).await {
            Ok(bytes) => {
                let archive_key = format!("archive/{key}");
                let reader: crate::storage::ByteReader =
                    Box::pin(std::io::Cursor::new(bytes.to_vec()));
                self.storage
                    .upload_stream(&archive_key, reader, "application/octet-stream")
                    .await?;
                Ok(())
            }
            // Nothing to archive is not an error; the row may never have
            // had a screenshot.
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// True-deletion regions require proof the object is gone; anything
    /// still visible is handed to a cleanup job and reported as an error.
    async fn confirm_deleted(&self, object_keys: &[String]) -> Result<(), RetentionError> {
        for key in object_keys {
            if self.storage.head_object(key).await?.is_some() {
                warn!(key = %key, "object survived deletion; scheduling cleanup");
                self.queue
                    .add_job(
                        QueueName::Notifications,
                        json!({ "kind": "storage-cleanup", "key": key }),
                        EnqueueOptions::default(),
                    )
                    .await?;
                return Err(RetentionError::Storage(StorageError::Io(format!(
                    "object '{key}' survived true deletion"
                ))));
            }
        }
        Ok(())
    }

    async fn row_storage_bytes(&self, row: &EligibleRow) -> u64 {
        let mut bytes = 0u64;
        for key in row_object_keys(row) {
            if let Ok(Some(meta)) = self.storage.head_object(&key).await {
                bytes += meta.size;
            }
        }
        let prefix = keys::replay_prefix(row.project_id, row.id);
        if let Ok(list) = self
            .storage
            .list_objects(crate::storage::ListOptions { prefix, ..Default::default() })
            .await
        {
            bytes += list.objects.iter().map(|obj| obj.size).sum::<u64>();
        }
        bytes
    }

    fn emit_certificate(
        &self,
        project_id: Uuid,
        policy: &EffectivePolicy,
        deleted: u64,
        freed_bytes: u64,
    ) {
        let issued_at = Utc::now();
        let payload = json!({
            "project_id": project_id,
            "region": policy.compliance_region.as_str(),
            "data_classification": policy.data_classification.as_str(),
            "deleted": deleted,
            "storage_freed_bytes": freed_bytes,
            "issued_at": issued_at,
        });
        let signature = sign_certificate(&self.certificate_secret, &payload);
        self.audit.record(
            AuditEntry::new("retention.deletion_certificate", "bug_reports", true)
                .resource_id(project_id.to_string())
                .details(json!({ "certificate": payload, "signature": signature })),
        );
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    processed: u64,
    deleted: u64,
    archived: u64,
    errors: u64,
    freed_bytes: u64,
}

#[derive(Debug, Default)]
struct RowRemoval {
    archived: bool,
    freed_bytes: u64,
}

fn cutoff_for(policy: &EffectivePolicy) -> DateTime<Utc> {
    Utc::now() - Duration::days(policy.bug_report_retention_days as i64)
}

/// Direct object keys on a row, normalized in case older rows stored full
/// URLs instead of bare keys.
fn row_object_keys(row: &EligibleRow) -> Vec<String> {
    [&row.screenshot_url, &row.thumbnail_url, &row.replay_url]
        .into_iter()
        .flatten()
        .filter_map(|value| storage_key_from_url(value))
        .filter(|key| !key.starts_with(keys::REPLAY_PREFIX))
        .collect()
}

fn sign_certificate(secret: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(payload.to_string().as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_signature_is_stable_and_secret_bound() {
        let payload = json!({ "deleted": 3, "region": "eu" });
        let a = sign_certificate("secret-one", &payload);
        let b = sign_certificate("secret-one", &payload);
        let c = sign_certificate("secret-two", &payload);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn row_keys_normalize_urls_and_skip_replay_prefix() {
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();
        let row = EligibleRow {
            id: bug,
            project_id: project,
            screenshot_url: Some(format!(
                "https://cdn.example.com/bucket/screenshots/{project}/{bug}/original.png"
            )),
            thumbnail_url: Some(format!("screenshots/{project}/{bug}/thumbnail.jpg")),
            replay_url: Some(format!("replays/{project}/{bug}")),
        };
        let keys = row_object_keys(&row);
        assert_eq!(keys.len(), 2);
        assert!(keys[0].starts_with("screenshots/"));
        // The replay prefix is a folder; delete_folder handles it.
        assert!(keys.iter().all(|k| !k.starts_with("replays/")));
    }
}
