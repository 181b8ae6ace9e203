use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    retry_backoff, EnqueueOptions, Job, JobState, QueueError, QueueMetrics, QueueName, QueueResult,
};

/// Redis-backed job store. Per queue:
///
/// - `waiting`   list, LPUSH producer / RPOP consumer (FIFO)
/// - `delayed`   zset scored by the epoch-millis the job becomes available
/// - `active`    zset scored by the reservation's visibility deadline
/// - `completed` / `failed` counters
/// - `job:{id}`  serialized [`Job`] plus terminal state
///
/// Reservations expire: a worker that dies mid-job loses its deadline and
/// the sweep returns the job to `waiting`, giving at-least-once delivery.
#[derive(Clone)]
pub struct JobQueue {
    manager: ConnectionManager,
    prefix: String,
    default_max_attempts: u32,
}

impl JobQueue {
    pub async fn connect(redis_url: &str, default_max_attempts: u32) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| QueueError::Connection(err.to_string()))?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            prefix: "bugspotter:queue".to_string(),
            default_max_attempts,
        })
    }

    fn key(&self, queue: QueueName, part: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, part)
    }

    fn job_key(&self, queue: QueueName, id: Uuid) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, id)
    }

    pub async fn add_job(
        &self,
        queue: QueueName,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> QueueResult<Uuid> {
        let now = Utc::now();
        let delay = options.delay.unwrap_or_default();
        let job = Job {
            id: Uuid::new_v4(),
            queue,
            payload,
            attempts_made: 0,
            max_attempts: options.max_attempts.unwrap_or(self.default_max_attempts).max(1),
            created_at: now,
            available_at: now + chrono::Duration::from_std(delay).unwrap_or_default(),
        };

        let mut conn = self.manager.clone();
        self.store_job(&mut conn, &job).await?;
        if delay.is_zero() {
            let _: () = conn.lpush(self.key(queue, "waiting"), job.id.to_string()).await?;
        } else {
            let _: () = conn
                .zadd(
                    self.key(queue, "delayed"),
                    job.id.to_string(),
                    job.available_at.timestamp_millis(),
                )
                .await?;
        }
        debug!(queue = %queue, job_id = %job.id, delay_ms = delay.as_millis() as u64, "enqueued job");
        Ok(job.id)
    }

    pub async fn get_job(&self, queue: QueueName, id: Uuid) -> QueueResult<Option<Job>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(self.job_key(queue, id)).await?;
        match raw {
            Some(raw) => {
                let stored: StoredJob = serde_json::from_str(&raw)
                    .map_err(|err| QueueError::Serialization(err.to_string()))?;
                Ok(Some(stored.job))
            }
            None => Ok(None),
        }
    }

    pub async fn get_job_status(&self, queue: QueueName, id: Uuid) -> QueueResult<JobState> {
        let mut conn = self.manager.clone();
        let id_str = id.to_string();

        let active: Option<f64> = conn.zscore(self.key(queue, "active"), &id_str).await?;
        if active.is_some() {
            return Ok(JobState::Active);
        }
        let delayed: Option<f64> = conn.zscore(self.key(queue, "delayed"), &id_str).await?;
        if delayed.is_some() {
            return Ok(JobState::Delayed);
        }
        let waiting_pos: Option<usize> = conn.lpos(self.key(queue, "waiting"), &id_str, redis::LposOptions::default()).await?;
        if waiting_pos.is_some() {
            return Ok(JobState::Waiting);
        }

        let raw: Option<String> = conn.get(self.job_key(queue, id)).await?;
        let stored: StoredJob = match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| QueueError::Serialization(err.to_string()))?,
            None => return Err(QueueError::NotFound),
        };
        Ok(stored.state)
    }

    pub async fn get_queue_metrics(&self, queue: QueueName) -> QueueResult<QueueMetrics> {
        let mut conn = self.manager.clone();
        let waiting: u64 = conn.llen(self.key(queue, "waiting")).await?;
        let active: u64 = conn.zcard(self.key(queue, "active")).await?;
        let delayed: u64 = conn.zcard(self.key(queue, "delayed")).await?;
        let completed: Option<u64> = conn.get(self.key(queue, "completed")).await?;
        let failed: Option<u64> = conn.get(self.key(queue, "failed")).await?;
        Ok(QueueMetrics {
            waiting,
            active,
            delayed,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    pub async fn pause(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(self.key(queue, "paused"), 1).await?;
        Ok(())
    }

    pub async fn resume(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(self.key(queue, "paused")).await?;
        Ok(())
    }

    pub async fn is_paused(&self, queue: QueueName) -> QueueResult<bool> {
        let mut conn = self.manager.clone();
        let paused: Option<i64> = conn.get(self.key(queue, "paused")).await?;
        Ok(paused.is_some())
    }

    /// Pop one job for processing. Due delayed jobs and expired
    /// reservations are promoted first; RPOP hands each id to exactly one
    /// caller.
    pub async fn reserve(
        &self,
        queue: QueueName,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<Job>> {
        if self.is_paused(queue).await? {
            return Ok(None);
        }

        self.promote_due(queue).await?;
        self.requeue_expired(queue).await?;

        let mut conn = self.manager.clone();
        let id: Option<String> = conn.rpop(self.key(queue, "waiting"), None).await?;
        let Some(id) = id else { return Ok(None) };
        let id = Uuid::parse_str(&id).map_err(|err| QueueError::Serialization(err.to_string()))?;

        let deadline = Utc::now().timestamp_millis() + visibility_timeout.as_millis() as i64;
        let _: () = conn.zadd(self.key(queue, "active"), id.to_string(), deadline).await?;

        match self.get_job(queue, id).await? {
            Some(job) => Ok(Some(job)),
            None => {
                // Job body evicted; drop the orphaned reservation.
                let _: () = conn.zrem(self.key(queue, "active"), id.to_string()).await?;
                warn!(queue = %queue, job_id = %id, "dropped reservation for missing job body");
                Ok(None)
            }
        }
    }

    pub async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn
            .zrem(self.key(job.queue, "active"), job.id.to_string())
            .await?;
        if removed == 0 {
            // Reservation expired and the job was handed to another worker;
            // at-least-once semantics make this a no-op, not an error.
            warn!(queue = %job.queue, job_id = %job.id, "completed after reservation expiry");
            return Ok(());
        }
        let _: u64 = conn.incr(self.key(job.queue, "completed"), 1u64).await?;
        self.store_terminal(&mut conn, job, JobState::Completed).await?;
        Ok(())
    }

    /// Handler failure: retry with backoff while attempts remain, else move
    /// to `failed`.
    pub async fn fail(&self, job: &Job, permanent: bool) -> QueueResult<JobState> {
        let mut conn = self.manager.clone();
        let _: u64 = conn
            .zrem(self.key(job.queue, "active"), job.id.to_string())
            .await?;

        let mut updated = job.clone();
        updated.attempts_made += 1;

        if !permanent && updated.attempts_made < updated.max_attempts {
            let backoff = retry_backoff(updated.attempts_made);
            updated.available_at =
                Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
            self.store_job(&mut conn, &updated).await?;
            let _: () = conn
                .zadd(
                    self.key(job.queue, "delayed"),
                    updated.id.to_string(),
                    updated.available_at.timestamp_millis(),
                )
                .await?;
            debug!(queue = %job.queue, job_id = %job.id, attempts = updated.attempts_made, "retrying job");
            Ok(JobState::Delayed)
        } else {
            let _: u64 = conn.incr(self.key(job.queue, "failed"), 1u64).await?;
            self.store_terminal(&mut conn, &updated, JobState::Failed).await?;
            warn!(queue = %job.queue, job_id = %job.id, attempts = updated.attempts_made, "job failed permanently");
            Ok(JobState::Failed)
        }
    }

    /// Give the reservation back without counting an attempt (job timeout,
    /// worker shutdown mid-poll).
    pub async fn release(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn
            .zrem(self.key(job.queue, "active"), job.id.to_string())
            .await?;
        if removed > 0 {
            let _: () = conn
                .lpush(self.key(job.queue, "waiting"), job.id.to_string())
                .await?;
        }
        Ok(())
    }

    /// Move due delayed jobs into the waiting list. ZREM decides the winner
    /// when multiple schedulers race on the same id.
    async fn promote_due(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.key(queue, "delayed"), 0, now, 0, 100)
            .await?;
        for id in due {
            let removed: u64 = conn.zrem(self.key(queue, "delayed"), &id).await?;
            if removed > 0 {
                let _: () = conn.lpush(self.key(queue, "waiting"), &id).await?;
            }
        }
        Ok(())
    }

    /// Reservations whose visibility deadline passed return to waiting.
    async fn requeue_expired(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = conn
            .zrangebyscore_limit(self.key(queue, "active"), 0, now, 0, 100)
            .await?;
        for id in expired {
            let removed: u64 = conn.zrem(self.key(queue, "active"), &id).await?;
            if removed > 0 {
                warn!(queue = %queue, job_id = %id, "reservation expired; requeueing");
                let _: () = conn.lpush(self.key(queue, "waiting"), &id).await?;
            }
        }
        Ok(())
    }

    async fn store_job(&self, conn: &mut ConnectionManager, job: &Job) -> QueueResult<()> {
        let stored = StoredJob { job: job.clone(), state: JobState::Waiting };
        let raw = serde_json::to_string(&stored)
            .map_err(|err| QueueError::Serialization(err.to_string()))?;
        let _: () = conn.set(self.job_key(job.queue, job.id), raw).await?;
        Ok(())
    }

    async fn store_terminal(
        &self,
        conn: &mut ConnectionManager,
        job: &Job,
        state: JobState,
    ) -> QueueResult<()> {
        let stored = StoredJob { job: job.clone(), state };
        let raw = serde_json::to_string(&stored)
            .map_err(|err| QueueError::Serialization(err.to_string()))?;
        // Terminal job bodies expire after a day; counters keep the totals.
        let _: () = conn
            .set_ex(self.job_key(job.queue, job.id), raw, 24 * 3_600)
            .await?;
        Ok(())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredJob {
    #[serde(flatten)]
    job: Job,
    state: JobState,
}
