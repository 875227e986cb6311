//! RCA Common - shared models for the pipeline diagnosis engine.
//!
//! Events in, reports out: everything the engine and its external
//! consumers (renderers, notifiers, resolution-update surfaces) agree
//! on lives here.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod report;

pub use config::{CollectionConfig, EngineConfig, GenerativeConfig, KnowledgeConfig};
pub use context::{
    CollectorOutput, ContextBundle, DagHistory, GitCommit, GitContext, MetricsSnapshot, RunRecord,
    SourceHealth, TaskLogs, TaskMetadata,
};
pub use error::RcaError;
pub use events::{FailureEvent, TaskState, WebhookPayload};
pub use report::{
    CandidateDiagnosis, DiagnosisSource, ErrorCategory, RCAReport, Recommendation, Severity,
    SimilarIncident,
};
