pub mod model;
pub mod recorder;

pub use model::{client_meta_from_headers, AuditEntry, AuditError, AuditResult, ClientMeta};
pub use recorder::{AuditPipeline, AuditRecorder, AuditSink, PipelineConfig};
