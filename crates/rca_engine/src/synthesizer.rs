//! Report synthesis and persistence.
//!
//! A pure merge of the final candidate, retrieval results, and the
//! original event into one scored report, followed by the single write
//! that must not fail silently: a diagnosis that cannot be recorded
//! cannot later be retrieved as history, so persistence errors are the
//! one hard failure of the workflow.

use chrono::Utc;
use rca_common::{
    CandidateDiagnosis, ContextBundle, ErrorCategory, FailureEvent, KnowledgeConfig, RCAReport,
    RcaError, Recommendation, Severity, SimilarIncident,
};
use tracing::{debug, info};

use crate::analyzers::PatternMatcher;
use crate::knowledge::IncidentStore;

/// Evidence-based severity override, consulted before the category map.
pub type SeverityRule =
    Box<dyn Fn(&ContextBundle, &CandidateDiagnosis) -> Option<Severity> + Send + Sync>;

/// Default severity per category.
fn severity_for(category: ErrorCategory) -> Severity {
    match category {
        ErrorCategory::ResourceExhaustion => Severity::High,
        ErrorCategory::SchemaMismatch => Severity::High,
        ErrorCategory::SourceUnavailable => Severity::High,
        ErrorCategory::DataQuality => Severity::Medium,
        ErrorCategory::PermissionError => Severity::High,
        ErrorCategory::CodeRegression => Severity::Medium,
        ErrorCategory::VolumeAnomaly => Severity::Medium,
        ErrorCategory::NetworkError => Severity::High,
        ErrorCategory::ConfigurationError => Severity::Medium,
        ErrorCategory::Unknown => Severity::Medium,
    }
}

/// Globally unique report id: second-resolution UTC timestamp plus a
/// random suffix so concurrent processes cannot collide.
fn generate_report_id() -> String {
    format!(
        "rca-{}-{:08x}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>()
    )
}

pub struct ReportSynthesizer {
    resolution_similarity_threshold: f64,
    severity_rules: Vec<SeverityRule>,
}

impl ReportSynthesizer {
    pub fn new(config: &KnowledgeConfig) -> Self {
        Self {
            resolution_similarity_threshold: config.resolution_similarity_threshold,
            severity_rules: Vec::new(),
        }
    }

    /// Register an evidence-based override. Rules run in registration
    /// order; the first that returns a severity wins.
    pub fn with_severity_rule(mut self, rule: SeverityRule) -> Self {
        self.severity_rules.push(rule);
        self
    }

    fn severity(&self, bundle: &ContextBundle, candidate: &CandidateDiagnosis) -> Severity {
        for rule in &self.severity_rules {
            if let Some(severity) = rule(bundle, candidate) {
                return severity;
            }
        }
        // The signature that matched may know more than the category
        // default (disk-full is worse than generic exhaustion).
        severity_for(candidate.category).max(candidate.severity)
    }

    /// Assemble recommendations: proven past resolutions above the
    /// similarity threshold first, then the candidate's own advice.
    fn recommendations(
        &self,
        candidate: &CandidateDiagnosis,
        similar: &[SimilarIncident],
    ) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for incident in similar {
            if incident.similarity_score < self.resolution_similarity_threshold {
                continue;
            }
            let Some(resolution) = &incident.resolution else {
                continue;
            };
            let action = format!("Proven fix from a similar incident: {}", resolution);
            if seen.iter().any(|s| s == &action) {
                continue;
            }
            seen.push(action.clone());
            let mut rec = Recommendation::new(action, 1);
            rec.estimated_effort = Some("known fix".to_string());
            recommendations.push(rec);
        }

        for rec in &candidate.recommendations {
            if seen.iter().any(|s| s == &rec.action) {
                continue;
            }
            seen.push(rec.action.clone());
            recommendations.push(rec.clone());
        }

        recommendations
    }

    /// Merge everything into a report and persist it. The report is
    /// durably stored before it is returned to the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn synthesize(
        &self,
        event: &FailureEvent,
        bundle: &ContextBundle,
        candidate: &CandidateDiagnosis,
        similar: Vec<SimilarIncident>,
        degraded: bool,
        analysis_duration_ms: u64,
        llm_model: Option<String>,
        matcher: &PatternMatcher,
        store: &IncidentStore,
    ) -> Result<RCAReport, RcaError> {
        let severity = self.severity(bundle, candidate);
        let recommendations = self.recommendations(candidate, &similar);
        let key_log_lines = matcher.extract_key_lines(&bundle.error_text(), 10);

        let report = RCAReport {
            report_id: generate_report_id(),
            generated_at: Utc::now(),
            dag_id: event.dag_id.clone(),
            task_id: event.task_id.clone(),
            run_id: event.run_id.clone(),
            failure_time: event.timestamp,
            error_category: candidate.category,
            severity,
            root_cause: candidate.root_cause.clone(),
            root_cause_summary: candidate.root_cause_summary.clone(),
            confidence: candidate.confidence.clamp(0.0, 1.0),
            evidence: candidate.evidence.clone(),
            key_log_lines,
            contributing_factors: candidate.contributing_factors.clone(),
            recommendations,
            immediate_action: candidate.immediate_action.clone(),
            is_recurring: !similar.is_empty(),
            recurrence_count: similar.len(),
            similar_incidents: similar,
            degraded,
            analysis_duration_ms: Some(analysis_duration_ms),
            llm_model,
            collectors_used: bundle.collector_names(),
            resolution: None,
        };

        debug!(report_id = %report.report_id, "Report synthesized, persisting");
        store.store(&report)?;
        info!(
            report_id = %report.report_id,
            category = report.error_category.as_str(),
            severity = report.severity.as_str(),
            confidence = report.confidence,
            "Report persisted"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rca_common::DiagnosisSource;

    fn candidate() -> CandidateDiagnosis {
        CandidateDiagnosis {
            category: ErrorCategory::ResourceExhaustion,
            severity: Severity::High,
            root_cause: "Java process ran out of memory".to_string(),
            root_cause_summary: "Java process ran out of memory".to_string(),
            evidence: vec!["java.lang.OutOfMemoryError: Java heap space".to_string()],
            confidence: 0.5,
            recommendations: vec![Recommendation::new(
                "Increase executor memory or optimize data partitioning",
                1,
            )],
            contributing_factors: vec![],
            immediate_action: None,
            source: DiagnosisSource::Pattern,
        }
    }

    fn event() -> FailureEvent {
        FailureEvent::new("etl_sales_daily", "load_to_warehouse", "run_1")
            .unwrap()
            .with_error_message("java.lang.OutOfMemoryError: Java heap space")
    }

    fn incident(score: f64, resolution: Option<&str>) -> SimilarIncident {
        SimilarIncident {
            incident_id: "rca-old".to_string(),
            date: Utc::now(),
            dag_id: "etl_sales_daily".to_string(),
            task_id: "load_to_warehouse".to_string(),
            error_category: ErrorCategory::ResourceExhaustion,
            root_cause: "heap exhausted".to_string(),
            resolution: resolution.map(|r| r.to_string()),
            similarity_score: score,
        }
    }

    fn synthesizer() -> ReportSynthesizer {
        ReportSynthesizer::new(&KnowledgeConfig::default())
    }

    fn store() -> (tempfile::TempDir, IncidentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IncidentStore::open(&dir.path().join("incidents.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn proven_resolutions_outrank_generic_advice() {
        let (_dir, store) = store();
        let event = event();
        let bundle = ContextBundle::for_event(&event);

        let report = synthesizer()
            .synthesize(
                &event,
                &bundle,
                &candidate(),
                vec![incident(0.9, Some("increased executor memory"))],
                true,
                12,
                None,
                &PatternMatcher::new(),
                &store,
            )
            .unwrap();

        assert!(report.recommendations[0]
            .action
            .contains("increased executor memory"));
        assert!(report.recommendations[1]
            .action
            .contains("Increase executor memory or optimize"));
        assert!(report.is_recurring);
        assert_eq!(report.recurrence_count, 1);
    }

    #[test]
    fn low_similarity_resolutions_are_not_promoted() {
        let (_dir, store) = store();
        let event = event();
        let bundle = ContextBundle::for_event(&event);

        let report = synthesizer()
            .synthesize(
                &event,
                &bundle,
                &candidate(),
                vec![incident(0.6, Some("increased executor memory"))],
                true,
                12,
                None,
                &PatternMatcher::new(),
                &store,
            )
            .unwrap();

        assert!(!report.recommendations[0].action.contains("Proven fix"));
    }

    #[test]
    fn severity_comes_from_the_category_map() {
        let (_dir, store) = store();
        let event = event();
        let bundle = ContextBundle::for_event(&event);

        let mut quality = candidate();
        quality.category = ErrorCategory::DataQuality;
        quality.severity = Severity::Medium;

        let report = synthesizer()
            .synthesize(
                &event,
                &bundle,
                &quality,
                vec![],
                true,
                1,
                None,
                &PatternMatcher::new(),
                &store,
            )
            .unwrap();
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn matched_signature_can_raise_severity_above_the_map() {
        let mut critical = candidate();
        critical.severity = Severity::Critical; // e.g. disk_full
        let event = event();
        let bundle = ContextBundle::for_event(&event);
        assert_eq!(synthesizer().severity(&bundle, &critical), Severity::Critical);
    }

    #[test]
    fn severity_rules_override_the_map() {
        let event = event();
        let bundle = ContextBundle::for_event(&event);
        let synthesizer = synthesizer().with_severity_rule(Box::new(|_, _| Some(Severity::Critical)));
        assert_eq!(synthesizer.severity(&bundle, &candidate()), Severity::Critical);
    }

    #[test]
    fn report_ids_are_unique_and_prefixed() {
        let a = generate_report_id();
        let b = generate_report_id();
        assert!(a.starts_with("rca-"));
        assert_ne!(a, b);
    }

    #[test]
    fn synthesized_report_is_immediately_retrievable() {
        let (_dir, store) = store();
        let event = event();
        let bundle = ContextBundle::for_event(&event);

        let report = synthesizer()
            .synthesize(
                &event,
                &bundle,
                &candidate(),
                vec![],
                true,
                7,
                None,
                &PatternMatcher::new(),
                &store,
            )
            .unwrap();

        assert!(store.get(&report.report_id).unwrap().is_some());
        assert!(report.similar_incidents.is_empty());
        assert!(!report.key_log_lines.is_empty());
    }
}
