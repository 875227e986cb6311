//! Failure event model.
//!
//! A `FailureEvent` describes one pipeline failure and is the immutable
//! input to a diagnosis run. Events are created once per request and
//! never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RcaError;

/// Task states a scheduler can report for a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Failed,
    UpstreamFailed,
    Skipped,
    UpForRetry,
    UpForReschedule,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Failed => "failed",
            TaskState::UpstreamFailed => "upstream_failed",
            TaskState::Skipped => "skipped",
            TaskState::UpForRetry => "up_for_retry",
            TaskState::UpForReschedule => "up_for_reschedule",
        }
    }

    /// Parse a scheduler state string. Unknown states coerce to `Failed`
    /// so a webhook with an unexpected state still triggers a diagnosis.
    pub fn parse(s: &str) -> Self {
        match s {
            "failed" => TaskState::Failed,
            "upstream_failed" => TaskState::UpstreamFailed,
            "skipped" => TaskState::Skipped,
            "up_for_retry" => TaskState::UpForRetry,
            "up_for_reschedule" => TaskState::UpForReschedule,
            _ => TaskState::Failed,
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Failed
    }
}

/// A pipeline failure event that triggers root cause analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    /// Pipeline (DAG) identifier
    pub dag_id: String,
    /// Failed task identifier
    pub task_id: String,
    /// Run identifier
    pub run_id: String,
    /// Scheduled execution date, if known
    #[serde(default)]
    pub execution_date: Option<DateTime<Utc>>,
    /// Task state as reported by the scheduler
    #[serde(default)]
    pub state: TaskState,
    /// Raw error message, if available
    #[serde(default)]
    pub error_message: Option<String>,
    /// Current try number (1-based)
    #[serde(default = "default_try_number")]
    pub try_number: u32,
    /// When the failure was detected
    pub timestamp: DateTime<Utc>,
}

fn default_try_number() -> u32 {
    1
}

impl FailureEvent {
    /// Create a new event. Identifiers must be non-empty.
    pub fn new(
        dag_id: impl Into<String>,
        task_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Result<Self, RcaError> {
        let event = Self {
            dag_id: dag_id.into(),
            task_id: task_id.into(),
            run_id: run_id.into(),
            execution_date: None,
            state: TaskState::Failed,
            error_message: None,
            try_number: 1,
            timestamp: Utc::now(),
        };
        event.validate()?;
        Ok(event)
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn with_try_number(mut self, try_number: u32) -> Self {
        self.try_number = try_number;
        self
    }

    /// Check event invariants. Malformed events are the one input
    /// failure that propagates as a hard error.
    pub fn validate(&self) -> Result<(), RcaError> {
        if self.dag_id.trim().is_empty() {
            return Err(RcaError::InvalidEvent("dag_id is empty".to_string()));
        }
        if self.task_id.trim().is_empty() {
            return Err(RcaError::InvalidEvent("task_id is empty".to_string()));
        }
        if self.run_id.trim().is_empty() {
            return Err(RcaError::InvalidEvent("run_id is empty".to_string()));
        }
        Ok(())
    }
}

/// Payload shape received from a scheduler failure callback.
///
/// The transport (HTTP webhook, CLI) lives outside this crate; only the
/// conversion into a `FailureEvent` is part of the core contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub dag_id: String,
    pub task_id: String,
    pub run_id: String,
    #[serde(default)]
    pub execution_date: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default = "default_try_number")]
    pub try_number: u32,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub log_url: Option<String>,
}

impl WebhookPayload {
    pub fn into_failure_event(self) -> Result<FailureEvent, RcaError> {
        let execution_date = self
            .execution_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        let event = FailureEvent {
            dag_id: self.dag_id,
            task_id: self.task_id,
            run_id: self.run_id,
            execution_date,
            state: self.state.as_deref().map(TaskState::parse).unwrap_or_default(),
            error_message: self.exception,
            try_number: self.try_number,
            timestamp: Utc::now(),
        };
        event.validate()?;
        Ok(event)
    }
}
