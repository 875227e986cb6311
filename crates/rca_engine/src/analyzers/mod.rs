//! Analysis strategies: deterministic pattern matching and the
//! capability-gated generative refinement.

pub mod generative;
pub mod pattern;

pub use generative::{GenerativeAnalyzer, GenerativeBackend, OllamaBackend};
pub use pattern::{default_patterns, ErrorPattern, PatternMatcher};
