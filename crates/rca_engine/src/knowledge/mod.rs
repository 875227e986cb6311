//! Incident knowledge base: embeddings plus the persistent store.

pub mod embedding;
pub mod incident_store;

pub use embedding::{similarity, Embedder, HashEmbedder};
pub use incident_store::IncidentStore;
