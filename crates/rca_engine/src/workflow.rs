//! The diagnostic workflow state machine.
//!
//! Strictly forward: Collecting → Matching → Retrieving → Reasoning →
//! Synthesizing → Done, with Failed reachable only from an
//! unrecoverable internal fault. Collector and generative failures are
//! absorbed along the way; the one failure that surfaces to the caller
//! is a persistence error, because an unrecorded diagnosis can never
//! be retrieved as history.

use std::sync::Arc;
use std::time::Instant;

use rca_common::{EngineConfig, FailureEvent, RCAReport, RcaError};
use tracing::{debug, error, info, warn};

use crate::analyzers::{GenerativeAnalyzer, GenerativeBackend, PatternMatcher};
use crate::collectors::{CollectionCoordinator, CollectorRegistry};
use crate::knowledge::IncidentStore;
use crate::synthesizer::ReportSynthesizer;

/// Phases of one diagnosis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Collecting,
    Matching,
    Retrieving,
    Reasoning,
    Synthesizing,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Collecting => "collecting",
            WorkflowState::Matching => "matching",
            WorkflowState::Retrieving => "retrieving",
            WorkflowState::Reasoning => "reasoning",
            WorkflowState::Synthesizing => "synthesizing",
            WorkflowState::Done => "done",
            WorkflowState::Failed => "failed",
        }
    }
}

/// One engine instance. Multiple diagnoses may run concurrently as
/// independent calls; the incident store is the only shared resource.
pub struct DiagnosticWorkflow {
    coordinator: CollectionCoordinator,
    matcher: PatternMatcher,
    store: Arc<IncidentStore>,
    analyzer: GenerativeAnalyzer,
    synthesizer: ReportSynthesizer,
    max_similar: usize,
    similarity_threshold: f64,
}

impl DiagnosticWorkflow {
    /// Build a workflow from immutable configuration plus the injected
    /// collector registry. The generative backend is wired from config
    /// (or absent, disabling the reasoning step).
    pub fn new(config: &EngineConfig, registry: CollectorRegistry) -> Result<Self, RcaError> {
        let store = Arc::new(IncidentStore::open(&config.knowledge.store_path)?);
        Ok(Self::with_parts(
            config,
            registry,
            store,
            GenerativeAnalyzer::from_config(&config.generative),
        ))
    }

    /// Same as `new` but with an explicit backend implementation.
    pub fn with_backend(
        config: &EngineConfig,
        registry: CollectorRegistry,
        backend: Option<Arc<dyn GenerativeBackend>>,
    ) -> Result<Self, RcaError> {
        let store = Arc::new(IncidentStore::open(&config.knowledge.store_path)?);
        let timeout = std::time::Duration::from_secs(config.generative.timeout_secs);
        Ok(Self::with_parts(
            config,
            registry,
            store,
            GenerativeAnalyzer::new(backend, timeout),
        ))
    }

    fn with_parts(
        config: &EngineConfig,
        registry: CollectorRegistry,
        store: Arc<IncidentStore>,
        analyzer: GenerativeAnalyzer,
    ) -> Self {
        Self {
            coordinator: CollectionCoordinator::new(registry, &config.collection),
            matcher: PatternMatcher::new(),
            store,
            analyzer,
            synthesizer: ReportSynthesizer::new(&config.knowledge),
            max_similar: config.knowledge.max_similar_incidents,
            similarity_threshold: config.knowledge.similarity_threshold,
        }
    }

    /// The shared incident store, for resolution updates and queries
    /// from management surfaces.
    pub fn store(&self) -> Arc<IncidentStore> {
        Arc::clone(&self.store)
    }

    fn transition(&self, event: &FailureEvent, from: WorkflowState, to: WorkflowState) {
        debug!(
            dag_id = %event.dag_id,
            task_id = %event.task_id,
            from = from.as_str(),
            to = to.as_str(),
            "Workflow transition"
        );
    }

    /// Diagnose one failure event. Always returns a report unless the
    /// event is malformed or the incident store cannot persist it.
    pub async fn analyze(&self, event: &FailureEvent) -> Result<RCAReport, RcaError> {
        event.validate()?;
        let started = Instant::now();
        info!(
            dag_id = %event.dag_id,
            task_id = %event.task_id,
            run_id = %event.run_id,
            "Starting diagnosis"
        );

        // Collecting: the only parallel phase.
        let mut state = WorkflowState::Collecting;
        let bundle = self.coordinator.collect_all(event).await;

        // Matching: guaranteed minimum-viable diagnosis, works on an
        // entirely empty bundle.
        self.transition(event, state, WorkflowState::Matching);
        state = WorkflowState::Matching;
        let pattern_candidate = self.matcher.analyze(&bundle);

        // Retrieving: advisory; a store read error degrades to "no
        // similar incidents" rather than failing the run.
        self.transition(event, state, WorkflowState::Retrieving);
        state = WorkflowState::Retrieving;
        let similar = match self.store.query_similar(
            &bundle.error_text(),
            Some(&event.dag_id),
            Some(&event.task_id),
            self.max_similar,
            self.similarity_threshold,
        ) {
            Ok(similar) => similar,
            Err(e) => {
                warn!(error = %e, "Similarity retrieval failed, continuing without history");
                Vec::new()
            }
        };

        // Reasoning: always attempted, outcome optional.
        self.transition(event, state, WorkflowState::Reasoning);
        state = WorkflowState::Reasoning;
        let (candidate, degraded) = self
            .analyzer
            .refine(&bundle, &self.matcher, &pattern_candidate, &similar)
            .await;

        // Synthesizing: the one transition that can fail.
        self.transition(event, state, WorkflowState::Synthesizing);
        state = WorkflowState::Synthesizing;
        let llm_model = if degraded { None } else { self.analyzer.capability() };
        let result = self.synthesizer.synthesize(
            event,
            &bundle,
            &candidate,
            similar,
            degraded,
            started.elapsed().as_millis() as u64,
            llm_model,
            &self.matcher,
            &self.store,
        );

        match result {
            Ok(report) => {
                self.transition(event, state, WorkflowState::Done);
                info!(
                    report_id = %report.report_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    degraded = report.degraded,
                    "Diagnosis complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.transition(event, state, WorkflowState::Failed);
                error!(error = %e, "Diagnosis failed: report could not be persisted");
                Err(e)
            }
        }
    }
}
