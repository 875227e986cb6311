//! Context gathered around a failure.
//!
//! Each collector produces one `CollectorOutput`; the coordinator keys
//! them by collector name in a `ContextBundle`. A bundle with entries
//! missing is the normal case, not an error — every later stage must
//! work from whatever subset actually arrived.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::FailureEvent;

/// Logs extracted from the failed task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskLogs {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub log_lines: usize,
    #[serde(default)]
    pub truncated: bool,
    /// Extracted error message snippet, if the collector found one
    #[serde(default)]
    pub error_snippet: Option<String>,
}

/// Metadata about the failed task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub dag_id: String,
    pub task_id: String,
    pub run_id: String,
    pub state: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default = "default_try")]
    pub try_number: u32,
    #[serde(default = "default_try")]
    pub max_tries: u32,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
}

fn default_try() -> u32 {
    1
}

/// One prior run, as reported by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub state: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// Historical information about the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagHistory {
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recent_runs: Vec<RunRecord>,
    #[serde(default)]
    pub avg_duration_seconds: Option<f64>,
    #[serde(default)]
    pub failure_rate_7d: f64,
    #[serde(default)]
    pub total_runs_7d: u32,
}

/// A commit relevant to the failing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub sha: String,
    pub short_sha: String,
    pub author: String,
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

/// Repository context around the failure window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitContext {
    #[serde(default)]
    pub recent_commits: Vec<GitCommit>,
    #[serde(default)]
    pub last_commit_touching_dag: Option<GitCommit>,
    #[serde(default)]
    pub dag_file_path: Option<String>,
    #[serde(default)]
    pub hours_since_last_change: Option<f64>,
}

/// Health check result for one upstream data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_name: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default = "default_reachable")]
    pub reachable: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub row_count_previous: Option<u64>,
    #[serde(default)]
    pub row_count_delta_pct: Option<f64>,
    #[serde(default)]
    pub schema_changed: bool,
    pub last_checked: DateTime<Utc>,
}

fn default_source_type() -> String {
    "unknown".to_string()
}

fn default_reachable() -> bool {
    true
}

/// Infrastructure metrics snapshot at failure time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub memory_used_gb: Option<f64>,
    #[serde(default)]
    pub disk_percent: Option<f64>,
    #[serde(default)]
    pub active_connections: Option<u32>,
    #[serde(default)]
    pub worker_slots_available: Option<u32>,
}

/// One collector's result, tagged by payload kind so the bundle stays
/// uniformly typed regardless of which sources are plugged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectorOutput {
    /// Scheduler output: task metadata, task logs, pipeline history
    Scheduler {
        metadata: TaskMetadata,
        logs: TaskLogs,
        history: DagHistory,
    },
    Git(GitContext),
    Sources(Vec<SourceHealth>),
    Metrics(MetricsSnapshot),
}

/// Aggregated, partially-present collector outputs for one diagnosis.
///
/// Built by the collection coordinator; read-only afterwards and owned
/// exclusively by the workflow run that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub failure_time: DateTime<Utc>,
    pub dag_id: String,
    pub task_id: String,
    pub run_id: String,
    /// Raw error message carried over from the event
    #[serde(default)]
    pub event_error: Option<String>,
    /// Collector name -> result. Absent entries mean the source failed,
    /// timed out, or had nothing relevant.
    pub entries: BTreeMap<String, CollectorOutput>,
}

impl ContextBundle {
    pub fn for_event(event: &FailureEvent) -> Self {
        Self {
            failure_time: event.timestamp,
            dag_id: event.dag_id.clone(),
            task_id: event.task_id.clone(),
            run_id: event.run_id.clone(),
            event_error: event.error_message.clone(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, output: CollectorOutput) {
        self.entries.insert(name.into(), output);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of collectors that actually contributed data.
    pub fn collector_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn logs(&self) -> Option<&TaskLogs> {
        self.entries.values().find_map(|e| match e {
            CollectorOutput::Scheduler { logs, .. } => Some(logs),
            _ => None,
        })
    }

    pub fn metadata(&self) -> Option<&TaskMetadata> {
        self.entries.values().find_map(|e| match e {
            CollectorOutput::Scheduler { metadata, .. } => Some(metadata),
            _ => None,
        })
    }

    pub fn history(&self) -> Option<&DagHistory> {
        self.entries.values().find_map(|e| match e {
            CollectorOutput::Scheduler { history, .. } => Some(history),
            _ => None,
        })
    }

    pub fn git(&self) -> Option<&GitContext> {
        self.entries.values().find_map(|e| match e {
            CollectorOutput::Git(git) => Some(git),
            _ => None,
        })
    }

    pub fn sources(&self) -> &[SourceHealth] {
        self.entries
            .values()
            .find_map(|e| match e {
                CollectorOutput::Sources(sources) => Some(sources.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn metrics(&self) -> Option<&MetricsSnapshot> {
        self.entries.values().find_map(|e| match e {
            CollectorOutput::Metrics(m) => Some(m),
            _ => None,
        })
    }

    /// Best available error text for matching and retrieval: the log
    /// error snippet, else the stdout tail, else the raw event error.
    pub fn error_text(&self) -> String {
        if let Some(logs) = self.logs() {
            if let Some(snippet) = &logs.error_snippet {
                if !snippet.is_empty() {
                    return snippet.clone();
                }
            }
            if !logs.stdout.is_empty() {
                return tail(&logs.stdout, 2000);
            }
        }
        self.event_error.clone().unwrap_or_default()
    }

    /// Render the bundle as structured text for the generative prompt.
    /// Deterministic: same bundle, same text.
    pub fn to_prompt_context(&self) -> String {
        let mut sections = Vec::new();

        let (state, tries, max_tries, duration, operator) = match self.metadata() {
            Some(m) => (
                m.state.clone(),
                m.try_number,
                m.max_tries,
                m.duration_seconds
                    .map(|d| format!("{:.1}s", d))
                    .unwrap_or_else(|| "N/A".to_string()),
                m.operator.clone().unwrap_or_else(|| "unknown".to_string()),
            ),
            None => (
                "failed".to_string(),
                1,
                1,
                "N/A".to_string(),
                "unknown".to_string(),
            ),
        };
        sections.push(format!(
            "## Failed Task\n- DAG: {}\n- Task: {}\n- State: {}\n- Try: {}/{}\n- Duration: {}\n- Operator: {}",
            self.dag_id, self.task_id, state, tries, max_tries, duration, operator
        ));

        let error_text = self.error_text();
        if !error_text.is_empty() {
            sections.push(format!("## Error Logs\n```\n{}\n```", error_text));
        }

        if let Some(history) = self.history() {
            let runs = history
                .recent_runs
                .iter()
                .take(5)
                .map(|r| r.state.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            sections.push(format!(
                "## Pipeline History\n- Last success: {}\n- Recent runs: [{}]\n- Failure rate (7d): {:.1}%\n- Avg duration: {}",
                history
                    .last_success
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
                runs,
                history.failure_rate_7d * 100.0,
                history
                    .avg_duration_seconds
                    .map(|d| format!("{:.1}s", d))
                    .unwrap_or_else(|| "N/A".to_string()),
            ));
        }

        if let Some(git) = self.git() {
            if !git.recent_commits.is_empty() {
                let commits = git
                    .recent_commits
                    .iter()
                    .take(3)
                    .map(|c| {
                        let first_line = c.message.lines().next().unwrap_or("");
                        format!("  - {}: {} ({})", c.short_sha, first_line, c.author)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                sections.push(format!(
                    "## Recent Changes\n{}\n- Hours since last pipeline change: {}",
                    commits,
                    git.hours_since_last_change
                        .map(|h| format!("{:.1}", h))
                        .unwrap_or_else(|| "N/A".to_string()),
                ));
            }
        }

        let sources = self.sources();
        if !sources.is_empty() {
            let lines = sources
                .iter()
                .map(|s| {
                    let mut line = format!(
                        "  - {}: {} ({})",
                        s.source_name,
                        if s.reachable { "reachable" } else { "UNREACHABLE" },
                        s.latency_ms
                            .map(|l| format!("{:.0}ms", l))
                            .unwrap_or_else(|| "N/A".to_string()),
                    );
                    if s.schema_changed {
                        line.push_str(" [SCHEMA CHANGED]");
                    }
                    if let Some(delta) = s.row_count_delta_pct {
                        line.push_str(&format!(" [volume {:+.1}%]", delta));
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("## Source Health\n{}", lines));
        }

        if let Some(metrics) = self.metrics() {
            sections.push(format!(
                "## Infrastructure Metrics\n- CPU: {}\n- Memory: {}\n- Disk: {}",
                fmt_pct(metrics.cpu_percent),
                fmt_pct(metrics.memory_percent),
                fmt_pct(metrics.disk_percent),
            ));
        }

        sections.join("\n\n")
    }
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Last `max_bytes` of a string, split on a char boundary.
fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FailureEvent;

    fn oom_event() -> FailureEvent {
        FailureEvent::new("etl_sales_daily", "load_to_warehouse", "run_1")
            .unwrap()
            .with_error_message("java.lang.OutOfMemoryError: Java heap space")
    }

    #[test]
    fn empty_bundle_falls_back_to_event_error() {
        let bundle = ContextBundle::for_event(&oom_event());
        assert!(bundle.is_empty());
        assert!(bundle.error_text().contains("OutOfMemoryError"));
    }

    #[test]
    fn error_snippet_takes_precedence_over_stdout() {
        let mut bundle = ContextBundle::for_event(&oom_event());
        bundle.insert(
            "scheduler",
            CollectorOutput::Scheduler {
                metadata: TaskMetadata {
                    dag_id: "etl_sales_daily".to_string(),
                    task_id: "load_to_warehouse".to_string(),
                    run_id: "run_1".to_string(),
                    state: "failed".to_string(),
                    start_date: None,
                    end_date: None,
                    duration_seconds: Some(312.0),
                    try_number: 1,
                    max_tries: 2,
                    operator: Some("SparkSubmitOperator".to_string()),
                    pool: None,
                    queue: None,
                },
                logs: TaskLogs {
                    stdout: "lots of log output".to_string(),
                    error_snippet: Some("GC overhead limit exceeded".to_string()),
                    ..Default::default()
                },
                history: DagHistory::default(),
            },
        );

        assert_eq!(bundle.error_text(), "GC overhead limit exceeded");
        assert_eq!(bundle.collector_names(), vec!["scheduler".to_string()]);
    }

    #[test]
    fn prompt_context_is_deterministic_and_sectioned() {
        let mut bundle = ContextBundle::for_event(&oom_event());
        bundle.insert(
            "sources",
            CollectorOutput::Sources(vec![SourceHealth {
                source_name: "orders_api".to_string(),
                source_type: "api".to_string(),
                reachable: false,
                latency_ms: None,
                error_message: Some("connect timeout".to_string()),
                row_count: None,
                row_count_previous: None,
                row_count_delta_pct: Some(-42.5),
                schema_changed: true,
                last_checked: Utc::now(),
            }]),
        );

        let text = bundle.to_prompt_context();
        assert!(text.contains("## Failed Task"));
        assert!(text.contains("## Error Logs"));
        assert!(text.contains("UNREACHABLE"));
        assert!(text.contains("[SCHEMA CHANGED]"));
        assert!(text.contains("[volume -42.5%]"));
        assert_eq!(text, bundle.to_prompt_context());
    }

    #[test]
    fn stdout_tail_respects_char_boundaries() {
        let long = "é".repeat(3000);
        let cut = tail(&long, 2000);
        assert!(cut.len() <= 2000);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
