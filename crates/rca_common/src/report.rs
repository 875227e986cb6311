//! Diagnosis and report models.
//!
//! `CandidateDiagnosis` is the tagged intermediate each analysis
//! strategy produces; `RCAReport` is the final synthesized output.
//! Reports are immutable once synthesized except for the resolution
//! field, which a human may patch later by report id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of pipeline error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ResourceExhaustion,
    SchemaMismatch,
    SourceUnavailable,
    DataQuality,
    PermissionError,
    CodeRegression,
    VolumeAnomaly,
    NetworkError,
    ConfigurationError,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::ResourceExhaustion,
        ErrorCategory::SchemaMismatch,
        ErrorCategory::SourceUnavailable,
        ErrorCategory::DataQuality,
        ErrorCategory::PermissionError,
        ErrorCategory::CodeRegression,
        ErrorCategory::VolumeAnomaly,
        ErrorCategory::NetworkError,
        ErrorCategory::ConfigurationError,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::SchemaMismatch => "schema_mismatch",
            ErrorCategory::SourceUnavailable => "source_unavailable",
            ErrorCategory::DataQuality => "data_quality",
            ErrorCategory::PermissionError => "permission_error",
            ErrorCategory::CodeRegression => "code_regression",
            ErrorCategory::VolumeAnomaly => "volume_anomaly",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::ConfigurationError => "configuration_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Parse a category string. Anything outside the fixed set coerces
    /// to `Unknown` rather than being rejected, so a creative backend
    /// answer cannot fail the workflow.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .unwrap_or(ErrorCategory::Unknown)
    }
}

/// Severity of an incident, lowest first so `Ord` matches urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Which analysis strategy produced a candidate diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    Pattern,
    Generative,
}

/// Output of one analysis strategy, tagged with its provenance so the
/// merge step can preserve where each conclusion came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDiagnosis {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub root_cause: String,
    pub root_cause_summary: String,
    pub evidence: Vec<String>,
    pub confidence: f64,
    pub recommendations: Vec<Recommendation>,
    pub contributing_factors: Vec<String>,
    pub immediate_action: Option<String>,
    pub source: DiagnosisSource,
}

impl CandidateDiagnosis {
    /// Clamp confidence into [0,1]. Called on every construction path
    /// so the invariant holds no matter what a backend returned.
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Actionable recommendation, priority 1 (highest) to 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub priority: u8,
    #[serde(default)]
    pub estimated_effort: Option<String>,
    #[serde(default)]
    pub automated: bool,
}

impl Recommendation {
    pub fn new(action: impl Into<String>, priority: u8) -> Self {
        Self {
            action: action.into(),
            priority: priority.clamp(1, 5),
            estimated_effort: None,
            automated: false,
        }
    }
}

/// Reference to a similar past incident returned by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarIncident {
    pub incident_id: String,
    pub date: DateTime<Utc>,
    pub dag_id: String,
    pub task_id: String,
    pub error_category: ErrorCategory,
    pub root_cause: String,
    #[serde(default)]
    pub resolution: Option<String>,
    /// Similarity in [0,1], 1.0 = identical
    pub similarity_score: f64,
}

/// Complete root cause analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RCAReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,

    pub dag_id: String,
    pub task_id: String,
    pub run_id: String,
    pub failure_time: DateTime<Utc>,

    pub error_category: ErrorCategory,
    pub severity: Severity,
    pub root_cause: String,
    pub root_cause_summary: String,
    pub confidence: f64,

    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub key_log_lines: Vec<String>,
    #[serde(default)]
    pub contributing_factors: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub immediate_action: Option<String>,

    /// Always a sequence; empty when nothing scored above threshold.
    #[serde(default)]
    pub similar_incidents: Vec<SimilarIncident>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence_count: usize,

    /// Set when the generative step was unavailable or failed and the
    /// report fell back to the deterministic diagnosis.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub analysis_duration_ms: Option<u64>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub collectors_used: Vec<String>,

    /// Human-entered resolution, patched after the fact by report id.
    #[serde(default)]
    pub resolution: Option<String>,
}

impl RCAReport {
    /// One-line summary for notifications.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {}/{}: {} (confidence: {:.0}%)",
            self.severity.as_str().to_uppercase(),
            self.dag_id,
            self.task_id,
            self.root_cause_summary,
            self.confidence * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_coerces_unknown_values() {
        assert_eq!(
            ErrorCategory::parse("resource_exhaustion"),
            ErrorCategory::ResourceExhaustion
        );
        assert_eq!(
            ErrorCategory::parse("  Schema_Mismatch "),
            ErrorCategory::SchemaMismatch
        );
        assert_eq!(ErrorCategory::parse("quantum_flux"), ErrorCategory::Unknown);
        assert_eq!(ErrorCategory::parse(""), ErrorCategory::Unknown);
    }

    #[test]
    fn category_strings_round_trip() {
        for category in ErrorCategory::ALL {
            assert_eq!(ErrorCategory::parse(category.as_str()), category);
        }
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn confidence_is_clamped() {
        let candidate = CandidateDiagnosis {
            category: ErrorCategory::Unknown,
            severity: Severity::Medium,
            root_cause: "x".to_string(),
            root_cause_summary: "x".to_string(),
            evidence: vec![],
            confidence: 1.7,
            recommendations: vec![],
            contributing_factors: vec![],
            immediate_action: None,
            source: DiagnosisSource::Generative,
        }
        .clamp_confidence();
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn recommendation_priority_is_bounded() {
        assert_eq!(Recommendation::new("restart it", 0).priority, 1);
        assert_eq!(Recommendation::new("rewrite it", 9).priority, 5);
    }

    #[test]
    fn report_serde_keeps_empty_sequences() {
        let json = r#"{
            "report_id": "rca-20260825060000-deadbeef",
            "generated_at": "2026-08-25T06:00:00Z",
            "dag_id": "etl_sales_daily",
            "task_id": "load_to_warehouse",
            "run_id": "run_1",
            "failure_time": "2026-08-25T05:58:00Z",
            "error_category": "resource_exhaustion",
            "severity": "high",
            "root_cause": "Java process ran out of memory",
            "root_cause_summary": "Java heap exhausted",
            "confidence": 0.5
        }"#;

        let report: RCAReport = serde_json::from_str(json).unwrap();
        assert!(report.similar_incidents.is_empty());
        assert!(report.recommendations.is_empty());
        assert!(!report.degraded);
        assert!(report.summary().contains("[HIGH]"));
    }
}
