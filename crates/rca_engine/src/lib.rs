//! RCA Engine - diagnostic workflow for pipeline failures.
//!
//! One `DiagnosticWorkflow::analyze` call per failure event: parallel
//! context collection with per-collector fault isolation, deterministic
//! pattern matching, similarity retrieval over past incidents,
//! generative refinement with graceful degradation, and synthesis of a
//! single scored, persisted report.

pub mod analyzers;
pub mod collectors;
pub mod knowledge;
pub mod synthesizer;
pub mod workflow;

pub use analyzers::{GenerativeAnalyzer, GenerativeBackend, OllamaBackend, PatternMatcher};
pub use collectors::{CollectParams, CollectionCoordinator, Collector, CollectorRegistry};
pub use knowledge::{Embedder, HashEmbedder, IncidentStore};
pub use synthesizer::ReportSynthesizer;
pub use workflow::{DiagnosticWorkflow, WorkflowState};
