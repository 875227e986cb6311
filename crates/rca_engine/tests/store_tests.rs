//! Knowledge-base lifecycle tests across engine restarts.
//!
//! The unit tests in `knowledge::incident_store` cover single-session
//! semantics; these verify that what one engine instance learns is
//! visible to the next one opening the same database file.

use rca_common::{EngineConfig, ErrorCategory, FailureEvent};
use rca_engine::{CollectorRegistry, DiagnosticWorkflow};

const OOM_ERROR: &str = "java.lang.OutOfMemoryError: Java heap space";

fn config_at(path: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.knowledge.store_path = path.to_path_buf();
    config
}

fn oom_event(run_id: &str) -> FailureEvent {
    FailureEvent::new("etl_sales_daily", "load_to_warehouse", run_id)
        .unwrap()
        .with_error_message(OOM_ERROR)
}

#[tokio::test]
async fn knowledge_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("incidents.db");

    let first_id = {
        let workflow =
            DiagnosticWorkflow::with_backend(&config_at(&db), CollectorRegistry::new(), None)
                .unwrap();
        let report = workflow.analyze(&oom_event("run_1")).await.unwrap();
        workflow
            .store()
            .update_resolution(&report.report_id, "increased executor memory")
            .unwrap();
        report.report_id
    };

    // A fresh engine on the same database sees the resolved incident
    // and promotes its fix.
    let workflow =
        DiagnosticWorkflow::with_backend(&config_at(&db), CollectorRegistry::new(), None).unwrap();
    let stored = workflow.store().get(&first_id).unwrap().unwrap();
    assert_eq!(
        stored.resolution.as_deref(),
        Some("increased executor memory")
    );

    let report = workflow.analyze(&oom_event("run_2")).await.unwrap();
    assert!(report.is_recurring);
    assert!(report.recommendations[0]
        .action
        .contains("increased executor memory"));
}

#[tokio::test]
async fn history_accumulates_one_record_per_diagnosis() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("incidents.db");
    let workflow =
        DiagnosticWorkflow::with_backend(&config_at(&db), CollectorRegistry::new(), None).unwrap();

    for i in 0..3 {
        workflow.analyze(&oom_event(&format!("run_{i}"))).await.unwrap();
    }

    assert_eq!(workflow.store().count().unwrap(), 3);
}

#[tokio::test]
async fn unrelated_pipelines_do_not_pollute_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("incidents.db");
    let workflow =
        DiagnosticWorkflow::with_backend(&config_at(&db), CollectorRegistry::new(), None).unwrap();

    workflow.analyze(&oom_event("run_1")).await.unwrap();

    let other = FailureEvent::new("ingest_clickstream", "parse_events", "run_1")
        .unwrap()
        .with_error_message("Connection refused: warehouse-db:5432");
    let report = workflow.analyze(&other).await.unwrap();

    // Scoped retrieval: the OOM incident belongs to a different
    // pipeline, so this diagnosis starts with no history.
    assert!(!report.is_recurring);
    assert!(report.similar_incidents.is_empty());
    assert_eq!(report.error_category, ErrorCategory::SourceUnavailable);
}
