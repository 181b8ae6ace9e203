use async_trait::async_trait;
use tracing::{debug, info};

use crate::queue::{Job, JobHandler, WorkerError};

/// Consumes the `notifications` queue and delivers each payload to the
/// configured webhook sink. The transport behind the webhook (Slack relay,
/// mail bridge) is someone else's concern; an unconfigured sink treats
/// delivery as a successful no-op.
pub struct NotificationWorker {
    client: reqwest::Client,
    webhook_url: Option<String>,
    bearer: Option<String>,
}

impl NotificationWorker {
    pub fn new(webhook_url: Option<String>, bearer: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            bearer,
        }
    }
}

#[async_trait]
impl JobHandler for NotificationWorker {
    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let Some(url) = &self.webhook_url else {
            debug!(job_id = %job.id, "no notification sink configured; dropping");
            return Ok(());
        };

        let mut request = self.client.post(url).json(&job.payload);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await.map_err(WorkerError::transient)?;
        let status = response.status();
        if status.is_success() {
            info!(job_id = %job.id, status = status.as_u16(), "notification delivered");
            Ok(())
        } else if status.is_client_error() {
            // The sink rejected the payload shape; retrying cannot help.
            Err(WorkerError::permanent(anyhow::anyhow!(
                "notification sink rejected payload with {status}"
            )))
        } else {
            Err(WorkerError::transient(anyhow::anyhow!(
                "notification sink returned {status}"
            )))
        }
    }
}
