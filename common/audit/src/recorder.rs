use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::model::{AuditEntry, AuditResult};

/// Destination for drained audit batches. The server implements this over
/// its `audit_logs` table; tests use an in-memory sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write_batch(&self, entries: &[AuditEntry]) -> AuditResult<()>;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Entries buffered beyond this are dropped oldest-first.
    pub buffer_capacity: usize,
    /// Flush as soon as this many entries are pending.
    pub batch_size: usize,
    /// Flush whatever is pending at this cadence.
    pub flush_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Cheap clonable handle used by request handlers. `record` never blocks
/// and never fails the request path.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::UnboundedSender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditRecorder {
    pub fn record(&self, entry: AuditEntry) {
        if self.tx.send(entry).is_err() {
            // Pipeline already shut down; losing the entry beats blocking.
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct AuditPipeline;

impl AuditPipeline {
    /// Spawn the single drain task. Dropping every `AuditRecorder` clone
    /// closes the channel; the task flushes the remainder and exits, which
    /// is how graceful shutdown flushes the buffer.
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        config: PipelineConfig,
    ) -> (AuditRecorder, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicU64::new(0));
        let recorder = AuditRecorder { tx, dropped: dropped.clone() };

        let handle = tokio::spawn(drain_loop(rx, sink, config, dropped));
        (recorder, handle)
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<AuditEntry>,
    sink: Arc<dyn AuditSink>,
    config: PipelineConfig,
    dropped: Arc<AtomicU64>,
) {
    let mut pending: VecDeque<AuditEntry> = VecDeque::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(entry) => {
                        pending.push_back(entry);
                        while pending.len() > config.buffer_capacity {
                            pending.pop_front();
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        if pending.len() >= config.batch_size {
                            flush(&sink, &mut pending, config.batch_size).await;
                        }
                    }
                    None => {
                        while !pending.is_empty() {
                            flush(&sink, &mut pending, config.batch_size).await;
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&sink, &mut pending, config.batch_size).await;
                }
            }
        }
    }
}

async fn flush(sink: &Arc<dyn AuditSink>, pending: &mut VecDeque<AuditEntry>, batch_size: usize) {
    let take = pending.len().min(batch_size);
    let batch: Vec<AuditEntry> = pending.drain(..take).collect();
    if let Err(err) = sink.write_batch(&batch).await {
        // Audit capture must never take the request path down with it.
        warn!(error = %err, batch = batch.len(), "failed to flush audit batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditEntry;
    use tokio::sync::Mutex;

    struct MemorySink {
        batches: Mutex<Vec<Vec<AuditEntry>>>,
    }

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn write_batch(&self, entries: &[AuditEntry]) -> AuditResult<()> {
            self.batches.lock().await.push(entries.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_full_batches_and_remainder_on_close() {
        let sink = Arc::new(MemorySink { batches: Mutex::new(Vec::new()) });
        let config = PipelineConfig {
            buffer_capacity: 1_000,
            batch_size: 10,
            flush_interval: Duration::from_secs(3_600),
        };
        let (recorder, handle) = AuditPipeline::spawn(sink.clone(), config);

        for i in 0..25 {
            recorder.record(AuditEntry::new(format!("action-{i}"), "reports", true));
        }
        drop(recorder);
        handle.await.unwrap();

        let batches = sink.batches.lock().await;
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 25);
        assert!(batches.iter().all(|b| b.len() <= 10));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        struct BlackHole;
        #[async_trait]
        impl AuditSink for BlackHole {
            async fn write_batch(&self, _entries: &[AuditEntry]) -> AuditResult<()> {
                Ok(())
            }
        }

        let config = PipelineConfig {
            buffer_capacity: 5,
            // Batch larger than capacity so nothing flushes until close.
            batch_size: 100,
            flush_interval: Duration::from_secs(3_600),
        };
        let (recorder, handle) = AuditPipeline::spawn(Arc::new(BlackHole), config);

        for i in 0..50 {
            recorder.record(AuditEntry::new(format!("action-{i}"), "reports", true));
        }
        // Give the drain task a chance to pull everything in.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let dropped = recorder.dropped_entries();
        assert!(dropped >= 40, "expected most entries dropped, got {dropped}");

        drop(recorder);
        handle.await.unwrap();
    }
}
