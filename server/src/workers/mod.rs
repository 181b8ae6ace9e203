use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db::Database;
use crate::queue::worker::WorkerConfig;
use crate::queue::{JobQueue, QueueName, WorkerPool};
use crate::storage::ObjectStorage;

pub mod notification;
pub mod replay;
pub mod screenshot;

pub use notification::NotificationWorker;
pub use replay::ReplayWorker;
pub use screenshot::ScreenshotWorker;

/// Register the always-on consumers: screenshots, replays, notifications.
/// The `integrations` queue is producer-only here; external tracker
/// consumers attach out of process.
pub fn spawn_all(
    config: &AppConfig,
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    queue: JobQueue,
) -> Vec<WorkerPool> {
    let worker_config = WorkerConfig {
        concurrency: 2,
        job_timeout: Duration::from_secs(config.queue.job_timeout_secs),
        visibility_timeout: Duration::from_secs(config.queue.job_timeout_secs + 30),
    };

    let screenshot = WorkerPool::spawn(
        queue.clone(),
        QueueName::Screenshots,
        Arc::new(ScreenshotWorker::new(db.clone(), storage.clone())),
        worker_config.clone(),
    );
    let replay = WorkerPool::spawn(
        queue.clone(),
        QueueName::Replays,
        Arc::new(ReplayWorker::new(
            db.clone(),
            storage,
            config.queue.replay_chunk_events,
        )),
        worker_config.clone(),
    );
    let notification = WorkerPool::spawn(
        queue,
        QueueName::Notifications,
        Arc::new(NotificationWorker::new(
            config.notification_webhook_url.clone(),
            config.notification_webhook_bearer.clone(),
        )),
        worker_config,
    );

    vec![screenshot, replay, notification]
}
