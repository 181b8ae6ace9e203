use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::{bug_reports, sessions, Database};
use crate::queue::{Job, JobHandler, WorkerError};
use crate::storage::{keys, ObjectStorage};

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayJobPayload {
    pub bug_report_id: Uuid,
    pub project_id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub events: Vec<Value>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayMetadata {
    pub chunk_count: u32,
    pub event_count: u64,
    pub duration_ms: i64,
}

/// Consumes the `replays` queue: split the recorded event stream into
/// fixed-size windows, gzip each window, upload chunk-by-chunk, then write
/// the metadata index and point the report row at the prefix.
pub struct ReplayWorker {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    chunk_events: usize,
}

impl ReplayWorker {
    pub fn new(db: Database, storage: Arc<dyn ObjectStorage>, chunk_events: usize) -> Self {
        Self { db, storage, chunk_events: chunk_events.max(1) }
    }
}

pub fn compress_chunk(events: &[Value]) -> Result<Vec<u8>, std::io::Error> {
    let json = serde_json::to_vec(events)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    encoder.finish()
}

/// Wall-clock span between the first and last event timestamp, when the
/// recorder put numeric `timestamp` fields on them.
pub fn duration_from_events(events: &[Value]) -> Option<i64> {
    let ts = |event: &Value| event.get("timestamp").and_then(Value::as_i64);
    let first = events.first().and_then(ts)?;
    let last = events.last().and_then(ts)?;
    Some((last - first).max(0))
}

#[async_trait]
impl JobHandler for ReplayWorker {
    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let payload: ReplayJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(WorkerError::permanent)?;

        let duration_ms = payload
            .duration_ms
            .or_else(|| duration_from_events(&payload.events))
            .unwrap_or(0);

        let mut chunk_count = 0u32;
        for (index, window) in payload.events.chunks(self.chunk_events).enumerate() {
            let compressed = compress_chunk(window).map_err(WorkerError::permanent)?;
            self.storage
                .upload_replay_chunk(
                    payload.project_id,
                    payload.bug_report_id,
                    index as u32,
                    Bytes::from(compressed),
                )
                .await
                .map_err(WorkerError::transient)?;
            chunk_count += 1;
            // Long streams yield between chunks so cancellation can land.
            tokio::task::yield_now().await;
        }

        let metadata = ReplayMetadata {
            chunk_count,
            event_count: payload.events.len() as u64,
            duration_ms,
        };
        self.storage
            .upload_replay_metadata(
                payload.project_id,
                payload.bug_report_id,
                &serde_json::to_value(&metadata).map_err(WorkerError::permanent)?,
            )
            .await
            .map_err(WorkerError::transient)?;

        let prefix = keys::replay_prefix(payload.project_id, payload.bug_report_id);
        bug_reports::set_replay(&self.db, payload.bug_report_id, &prefix)
            .await
            .map_err(WorkerError::transient)?;

        if let Some(session_id) = payload.session_id {
            sessions::mark_packaged(&self.db, session_id, chunk_count as i32, duration_ms)
                .await
                .map_err(WorkerError::transient)?;
        }

        info!(
            bug_report_id = %payload.bug_report_id,
            chunks = chunk_count,
            events = payload.events.len(),
            duration_ms,
            "replay packaged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn chunks_round_trip_through_gzip() {
        let events = vec![json!({"type": 2, "timestamp": 100}), json!({"type": 3, "timestamp": 150})];
        let compressed = compress_chunk(&events).unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        let decoded: Vec<Value> = serde_json::from_str(&decompressed).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn duration_derived_from_event_timestamps() {
        let events = vec![
            json!({"type": 2, "timestamp": 1_000}),
            json!({"type": 3, "timestamp": 1_500}),
            json!({"type": 3, "timestamp": 9_000}),
        ];
        assert_eq!(duration_from_events(&events), Some(8_000));
        assert_eq!(duration_from_events(&[]), None);
        assert_eq!(duration_from_events(&[json!({"no": "ts"})]), None);
    }
}
