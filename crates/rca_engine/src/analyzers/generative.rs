//! Generative reasoning step with graceful degradation.
//!
//! The backend is a pluggable capability. Whatever happens here, the
//! workflow keeps going: no backend, a timeout, or malformed output all
//! degrade to the deterministic pattern diagnosis, and the only trace
//! is the degraded marker on the report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rca_common::{
    CandidateDiagnosis, ContextBundle, DiagnosisSource, ErrorCategory, GenerativeConfig,
    Recommendation, SimilarIncident,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pattern::PatternMatcher;

const SYSTEM_PROMPT: &str = "You are an expert data engineering incident responder. \
Analyze the pipeline failure below and reply with a single JSON object with fields: \
error_category (one of resource_exhaustion, schema_mismatch, source_unavailable, \
data_quality, permission_error, code_regression, volume_anomaly, network_error, \
configuration_error, unknown), root_cause, root_cause_summary (one line), \
confidence (0.0-1.0), evidence (list of strings), contributing_factors (list of \
strings), recommendations (list of {action, priority 1-5, estimated_effort}), \
immediate_action (string or null). Base every claim on the supplied evidence.";

/// A reasoning backend, identified by a capability string.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Provider/model identifier, e.g. "ollama/mistral"
    fn capability(&self) -> String;

    /// One reasoning call. Must respect the caller-supplied deadline.
    async fn reason(&self, system: &str, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Ollama chat backend.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

const DEFAULT_OLLAMA_MODEL: &str = "mistral";

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    format: &'a str,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        })
    }

    pub fn from_config(config: &GenerativeConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.model.clone())
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn capability(&self) -> String {
        format!("ollama/{}", self.model)
    }

    async fn reason(&self, system: &str, prompt: &str, timeout: Duration) -> Result<String> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: system,
                },
                OllamaMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .context("Ollama request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Ollama returned HTTP {}", response.status()));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to decode Ollama response")?;
        Ok(body.message.content)
    }
}

/// Structured finding parsed out of a backend reply. Lenient on
/// purpose: every field has a default, and the category is a free
/// string coerced later.
#[derive(Debug, Deserialize)]
struct GenerativeFinding {
    #[serde(default)]
    error_category: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    root_cause_summary: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    contributing_factors: Vec<String>,
    #[serde(default)]
    recommendations: Vec<FindingRecommendation>,
    #[serde(default)]
    immediate_action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FindingRecommendation {
    #[serde(default)]
    action: String,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    estimated_effort: Option<String>,
    #[serde(default)]
    automated: bool,
}

fn default_priority() -> u8 {
    3
}

/// Pull the first JSON object out of a reply that may carry prose or
/// code fences around it.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Capability-gated refinement of the deterministic diagnosis.
pub struct GenerativeAnalyzer {
    backend: Option<Arc<dyn GenerativeBackend>>,
    timeout: Duration,
}

impl GenerativeAnalyzer {
    pub fn new(backend: Option<Arc<dyn GenerativeBackend>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Build an analyzer from config: an "ollama" provider wires up the
    /// built-in backend, no provider disables the step.
    pub fn from_config(config: &GenerativeConfig) -> Self {
        let backend: Option<Arc<dyn GenerativeBackend>> = match config.provider.as_deref() {
            Some("ollama") => match OllamaBackend::from_config(config) {
                Ok(b) => Some(Arc::new(b)),
                Err(e) => {
                    warn!(error = %e, "Failed to build generative backend, step disabled");
                    None
                }
            },
            Some(other) => {
                warn!(provider = other, "Unknown generative provider, step disabled");
                None
            }
            None => None,
        };
        Self::new(backend, Duration::from_secs(config.timeout_secs))
    }

    pub fn capability(&self) -> Option<String> {
        self.backend.as_ref().map(|b| b.capability())
    }

    /// Refine the pattern candidate with generative reasoning. Returns
    /// the refined candidate and whether the step degraded. On any
    /// failure the pattern candidate comes back unchanged.
    pub async fn refine(
        &self,
        bundle: &ContextBundle,
        matcher: &PatternMatcher,
        pattern_candidate: &CandidateDiagnosis,
        similar: &[SimilarIncident],
    ) -> (CandidateDiagnosis, bool) {
        let Some(backend) = &self.backend else {
            debug!("No generative backend configured, using pattern diagnosis");
            return (pattern_candidate.clone(), true);
        };

        let prompt = build_prompt(bundle, matcher, similar);
        match backend.reason(SYSTEM_PROMPT, &prompt, self.timeout).await {
            Ok(reply) => match parse_reply(&reply, pattern_candidate) {
                Ok(candidate) => {
                    info!(
                        capability = %backend.capability(),
                        category = candidate.category.as_str(),
                        confidence = candidate.confidence,
                        "Generative refinement complete"
                    );
                    (candidate, false)
                }
                Err(e) => {
                    warn!(error = %e, "Generative reply unusable, falling back to pattern diagnosis");
                    (pattern_candidate.clone(), true)
                }
            },
            Err(e) => {
                warn!(error = %e, "Generative backend failed, falling back to pattern diagnosis");
                (pattern_candidate.clone(), true)
            }
        }
    }
}

fn build_prompt(
    bundle: &ContextBundle,
    matcher: &PatternMatcher,
    similar: &[SimilarIncident],
) -> String {
    let similar_text = if similar.is_empty() {
        "No similar past incidents found.".to_string()
    } else {
        similar
            .iter()
            .take(3)
            .map(|s| {
                let mut line = format!(
                    "- [{}] {}/{}: {} (similarity {:.2})",
                    s.date.format("%Y-%m-%d"),
                    s.dag_id,
                    s.task_id,
                    s.root_cause,
                    s.similarity_score
                );
                if let Some(resolution) = &s.resolution {
                    line.push_str(&format!("\n  Resolution: {}", resolution));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{}\n\n## Pattern Matching Results\n{}\n\n## Similar Past Incidents\n{}\n\n\
         Based on all available evidence, provide your root cause analysis as JSON.",
        bundle.to_prompt_context(),
        matcher.format_matches(&bundle.error_text()),
        similar_text
    )
}

/// Turn a backend reply into a candidate. Generative evidence comes
/// first with the pattern evidence appended, so provenance survives
/// the merge for audit.
fn parse_reply(reply: &str, pattern: &CandidateDiagnosis) -> Result<CandidateDiagnosis> {
    let json = extract_json_object(reply).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    let finding: GenerativeFinding =
        serde_json::from_str(json).context("reply JSON does not match the expected shape")?;

    if finding.root_cause.trim().is_empty() {
        return Err(anyhow!("reply has no root cause"));
    }

    let category = ErrorCategory::parse(&finding.error_category);

    let mut evidence = finding.evidence;
    evidence.extend(pattern.evidence.iter().cloned());

    let summary = if finding.root_cause_summary.trim().is_empty() {
        finding
            .root_cause
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    } else {
        finding.root_cause_summary
    };

    let mut recommendations: Vec<Recommendation> = finding
        .recommendations
        .into_iter()
        .filter(|r| !r.action.trim().is_empty())
        .map(|r| {
            let mut rec = Recommendation::new(r.action, r.priority);
            rec.estimated_effort = r.estimated_effort;
            rec.automated = r.automated;
            rec
        })
        .collect();
    // Keep the signature table's advice in the merged list
    for rec in &pattern.recommendations {
        if !recommendations.iter().any(|r| r.action == rec.action) {
            recommendations.push(rec.clone());
        }
    }

    Ok(CandidateDiagnosis {
        category,
        severity: pattern.severity,
        root_cause: finding.root_cause,
        root_cause_summary: summary,
        evidence,
        // A generative confidence supersedes the pattern one; absent
        // confidence keeps the deterministic value.
        confidence: finding.confidence.unwrap_or(pattern.confidence),
        recommendations,
        contributing_factors: finding.contributing_factors,
        immediate_action: finding.immediate_action,
        source: DiagnosisSource::Generative,
    }
    .clamp_confidence())
}
