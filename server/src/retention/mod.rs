pub mod engine;
pub mod policy;
pub mod scheduler;

pub use engine::{ApplyOptions, ApplyStats, PreviewResult, RetentionEngine, RetentionError};
pub use policy::{
    ComplianceRegion, DataClassification, EffectivePolicy, PolicyInput, Tier,
};
pub use scheduler::spawn_scheduler;
