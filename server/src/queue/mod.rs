use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod redis_queue;
pub mod worker;

pub use redis_queue::JobQueue;
pub use worker::{JobHandler, WorkerError, WorkerPool};

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 60_000;

/// The queue set is fixed at construction; anything else is rejected with
/// `UnknownQueue` before touching Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Screenshots,
    Replays,
    Integrations,
    Notifications,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Screenshots,
        QueueName::Replays,
        QueueName::Integrations,
        QueueName::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Screenshots => "screenshots",
            QueueName::Replays => "replays",
            QueueName::Integrations => "integrations",
            QueueName::Notifications => "notifications",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = QueueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "screenshots" => Ok(QueueName::Screenshots),
            "replays" => Ok(QueueName::Replays),
            "integrations" => Ok(QueueName::Integrations),
            "notifications" => Ok(QueueName::Notifications),
            other => Err(QueueError::UnknownQueue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueMetrics {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown queue '{0}'")]
    UnknownQueue(String),
    #[error("queue backend unreachable: {0}")]
    Connection(String),
    #[error("job payload serialization failed: {0}")]
    Serialization(String),
    #[error("job not found")]
    NotFound,
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Connection(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Exponential backoff with jitter: `base * 2^(attempts-1)`, capped at 60 s.
pub fn retry_backoff(attempts_made: u32) -> Duration {
    let attempts = attempts_made.max(1);
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempts - 1).min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis((capped + jitter).min(BACKOFF_CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_round_trip() {
        for name in QueueName::ALL {
            assert_eq!(name.as_str().parse::<QueueName>().unwrap(), name);
        }
        assert!(matches!(
            "thumbnails".parse::<QueueName>(),
            Err(QueueError::UnknownQueue(_))
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = retry_backoff(1);
        assert!(first >= Duration::from_millis(1_000));
        assert!(first <= Duration::from_millis(1_250));

        let third = retry_backoff(3);
        assert!(third >= Duration::from_millis(4_000));
        assert!(third <= Duration::from_millis(5_000));

        let huge = retry_backoff(30);
        assert!(huge <= Duration::from_millis(60_000));
    }
}
