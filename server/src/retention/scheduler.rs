use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use sqlx::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RetentionScheduleConfig;
use crate::db::Database;

use super::engine::{ApplyOptions, RetentionEngine};

/// Advisory lock key for the retention leader. Only one replica runs an
/// apply at a time; `SKIP LOCKED` inside the engine covers interactive
/// overlap on individual rows.
const ADVISORY_LOCK_KEY: i64 = 0x4247_5254;

/// Fire `applyRetentionPolicies` at the configured instance-local time
/// (02:00 by default), every day, on whichever replica wins the lock.
pub fn spawn_scheduler(
    engine: Arc<RetentionEngine>,
    db: Database,
    config: RetentionScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            info!("retention scheduler disabled");
            return;
        }
        let fire_at = NaiveTime::from_hms_opt(config.hour.min(23), config.minute.min(59), 0)
            .unwrap_or_else(|| NaiveTime::from_hms_opt(2, 0, 0).expect("02:00 is valid"));
        info!(hour = fire_at.hour(), minute = fire_at.minute(), "retention scheduler started");

        loop {
            let wait = duration_until(fire_at);
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("retention scheduler stopping");
                        return;
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    run_once(&engine, &db).await;
                }
            }
        }
    })
}

async fn run_once(engine: &RetentionEngine, db: &Database) {
    // The lock connection is held for the whole run; dropping it back to
    // the pool releases the advisory lock with the session.
    let mut conn = match db.pool().acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %err, "retention scheduler could not acquire a connection");
            return;
        }
    };

    let acquired: Result<(bool,), sqlx::Error> =
        sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await;
    match acquired {
        Ok((true,)) => {}
        Ok((false,)) => {
            info!("another replica holds the retention lock; skipping this run");
            return;
        }
        Err(err) => {
            warn!(error = %err, "advisory lock query failed");
            return;
        }
    }

    let result = engine
        .apply(ApplyOptions {
            dry_run: false,
            confirm: true,
            ..Default::default()
        })
        .await;
    if let Err(err) = result {
        warn!(error = %err, "scheduled retention apply failed");
    }

    if let Err(err) = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(ADVISORY_LOCK_KEY)
        .execute(&mut *conn)
        .await
    {
        warn!(error = %err, "failed to release retention advisory lock");
        // A poisoned session must not return to the pool holding the lock.
        let _ = conn.detach().close().await;
    }
}

fn duration_until(fire_at: NaiveTime) -> Duration {
    let now = Local::now();
    let today_fire = now.date_naive().and_time(fire_at);
    let next = if now.naive_local() < today_fire {
        today_fire
    } else {
        today_fire + chrono::Duration::days(1)
    };
    let wait = next - now.naive_local();
    wait.to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_fire_is_within_24_hours() {
        let fire_at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let wait = duration_until(fire_at);
        assert!(wait <= Duration::from_secs(24 * 3_600));
    }
}
