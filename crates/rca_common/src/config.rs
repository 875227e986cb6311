//! Engine configuration.
//!
//! Loaded once from a TOML file (or built from defaults) and passed
//! immutably into the workflow constructor. There is no process-wide
//! mutable configuration state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file location.
pub const CONFIG_PATH: &str = "/etc/rca/config.toml";

/// Collection phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Per-collector deadline in seconds. Each collector gets its own
    /// timeout; the fan-out completes when all have settled.
    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,

    /// How far back collectors should look for relevant history
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
}

fn default_collector_timeout() -> u64 {
    10
}

fn default_lookback_hours() -> u32 {
    24
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            collector_timeout_secs: default_collector_timeout(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

/// Incident knowledge base settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// SQLite database path for persisted incidents
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Maximum similar incidents attached to a report
    #[serde(default = "default_max_similar")]
    pub max_similar_incidents: usize,

    /// Retrieval floor: matches below this score are not returned
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Promotion floor: past resolutions at or above this score are
    /// surfaced as top recommendations
    #[serde(default = "default_resolution_threshold")]
    pub resolution_similarity_threshold: f64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/incidents.db")
}

fn default_max_similar() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_resolution_threshold() -> f64 {
    0.75
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            max_similar_incidents: default_max_similar(),
            similarity_threshold: default_similarity_threshold(),
            resolution_similarity_threshold: default_resolution_threshold(),
        }
    }
}

/// Generative reasoning settings. No provider means the generative
/// step is disabled and diagnoses come from pattern matching alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeConfig {
    /// Backend provider, e.g. "ollama". None disables the step.
    #[serde(default)]
    pub provider: Option<String>,

    /// Model name; the backend picks its default when unset
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Backend call deadline in seconds
    #[serde(default = "default_generative_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_generative_timeout() -> u64 {
    30
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            base_url: default_base_url(),
            timeout_secs: default_generative_timeout(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults
    /// when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(CONFIG_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert_eq!(config.collection.collector_timeout_secs, 10);
        assert_eq!(config.knowledge.max_similar_incidents, 5);
        assert_eq!(config.knowledge.resolution_similarity_threshold, 0.75);
        assert!(config.generative.provider.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/rca.toml")).unwrap();
        assert_eq!(config.collection.lookback_hours, 24);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[collection]
collector_timeout_secs = 3

[generative]
provider = "ollama"
model = "mistral"
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.collection.collector_timeout_secs, 3);
        assert_eq!(config.collection.lookback_hours, 24);
        assert_eq!(config.generative.provider.as_deref(), Some("ollama"));
        assert_eq!(config.generative.timeout_secs, 30);
        assert_eq!(config.knowledge.similarity_threshold, 0.5);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "collection = 42").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
