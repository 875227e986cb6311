//! SQLite-backed incident knowledge base.
//!
//! Every finalized report is persisted here with an embedding computed
//! from its scope, category, and root cause, and becomes retrievable by
//! similarity for future diagnoses. Writes are single statements, so a
//! record is either fully visible or not there at all; concurrent
//! readers see pre- or post-write state, never a torn record.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rca_common::{ErrorCategory, RCAReport, RcaError, SimilarIncident};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::embedding::{similarity, Embedder, HashEmbedder};

const SCHEMA_VERSION: u32 = 1;

pub struct IncidentStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
    db_path: PathBuf,
}

impl IncidentStore {
    /// Open or create the store with the default embedder.
    pub fn open(path: &Path) -> Result<Self, RcaError> {
        Self::open_with_embedder(path, Arc::new(HashEmbedder::new()))
    }

    pub fn open_with_embedder(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, RcaError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RcaError::Persistence(format!("failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| RcaError::Persistence(format!("failed to open {:?}: {}", path, e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;

        info!(db_path = ?store.db_path, "Incident store ready");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RcaError> {
        let conn = self.lock();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                report_id TEXT PRIMARY KEY,
                dag_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                error_category TEXT NOT NULL,
                root_cause TEXT NOT NULL,
                failure_time TEXT NOT NULL,
                embedding TEXT NOT NULL,
                resolution TEXT,
                report TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_incidents_scope ON incidents(dag_id, task_id)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Text the embedding is computed from: scope, category, root cause
    /// and leading evidence, mirroring what retrieval queries contain.
    fn embedding_text(report: &RCAReport) -> String {
        let mut parts = vec![
            format!("DAG: {}", report.dag_id),
            format!("Task: {}", report.task_id),
            format!("Category: {}", report.error_category.as_str()),
            format!("Root cause: {}", report.root_cause),
        ];
        if !report.evidence.is_empty() {
            parts.push(format!("Evidence: {}", report.evidence[..report.evidence.len().min(3)].join("; ")));
        }
        parts.join("\n")
    }

    /// Persist a report as a historical incident. Reuses the report id,
    /// is idempotent, and last write wins. The record is durable before
    /// this returns, which is what makes it eligible for future
    /// similarity queries.
    pub fn store(&self, report: &RCAReport) -> Result<(), RcaError> {
        let embedding = self.embedder.embed(&Self::embedding_text(report));
        let embedding_json = serde_json::to_string(&embedding)?;
        let report_json = serde_json::to_string(report)?;

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO incidents
                (report_id, dag_id, task_id, error_category, root_cause,
                 failure_time, embedding, resolution, report)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                report.report_id,
                report.dag_id,
                report.task_id,
                report.error_category.as_str(),
                report.root_cause,
                report.failure_time.to_rfc3339(),
                embedding_json,
                report.resolution,
                report_json,
            ],
        )?;

        debug!(report_id = %report.report_id, "Incident stored");
        Ok(())
    }

    /// Find past incidents similar to the query text, optionally scoped
    /// to a pipeline/task, best first. An empty store is an empty
    /// result, never an error.
    pub fn query_similar(
        &self,
        query_text: &str,
        dag_id: Option<&str>,
        task_id: Option<&str>,
        max_results: usize,
        min_score: f64,
    ) -> Result<Vec<SimilarIncident>, RcaError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let mut parts = Vec::new();
        if let Some(dag_id) = dag_id {
            parts.push(format!("DAG: {}", dag_id));
        }
        if let Some(task_id) = task_id {
            parts.push(format!("Task: {}", task_id));
        }
        if !query_text.trim().is_empty() {
            parts.push(format!("Error: {}", query_text));
        }
        let query_vector = self.embedder.embed(&parts.join("\n"));

        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT report_id, dag_id, task_id, error_category, root_cause,
                   failure_time, embedding, resolution
            FROM incidents
            WHERE (?1 IS NULL OR dag_id = ?1)
              AND (?2 IS NULL OR task_id = ?2)
            "#,
        )?;

        let rows = stmt.query_map(params![dag_id, task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, dag, task, category, root_cause, failure_time, embedding_json, resolution) =
                row?;

            let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(v) => v,
                Err(e) => {
                    warn!(report_id = %id, error = %e, "Skipping incident with unreadable embedding");
                    continue;
                }
            };

            let score = similarity(&query_vector, &embedding);
            if score < min_score {
                continue;
            }

            let date = DateTime::parse_from_rfc3339(&failure_time)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            scored.push(SimilarIncident {
                incident_id: id,
                date,
                dag_id: dag,
                task_id: task,
                error_category: ErrorCategory::parse(&category),
                root_cause,
                resolution,
                similarity_score: score,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(max_results);

        debug!(results = scored.len(), "Similarity query complete");
        Ok(scored)
    }

    /// Overwrite the resolution of an existing incident. The embedding
    /// and category stay untouched; only the resolution field (and its
    /// copy inside the stored report) changes.
    pub fn update_resolution(&self, report_id: &str, resolution: &str) -> Result<(), RcaError> {
        let conn = self.lock();

        let report_json: Option<String> = conn
            .query_row(
                "SELECT report FROM incidents WHERE report_id = ?1",
                params![report_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(report_json) = report_json else {
            return Err(RcaError::NotFound(report_id.to_string()));
        };

        let patched = match serde_json::from_str::<RCAReport>(&report_json) {
            Ok(mut report) => {
                report.resolution = Some(resolution.to_string());
                serde_json::to_string(&report)?
            }
            // Old or foreign record shape: keep the document as-is and
            // rely on the resolution column.
            Err(_) => report_json,
        };

        conn.execute(
            "UPDATE incidents SET resolution = ?1, report = ?2 WHERE report_id = ?3",
            params![resolution, patched, report_id],
        )?;

        info!(report_id = %report_id, "Incident resolution updated");
        Ok(())
    }

    /// Fetch one incident's full report by id.
    pub fn get(&self, report_id: &str) -> Result<Option<RCAReport>, RcaError> {
        let conn = self.lock();
        let report_json: Option<String> = conn
            .query_row(
                "SELECT report FROM incidents WHERE report_id = ?1",
                params![report_id],
                |row| row.get(0),
            )
            .optional()?;

        match report_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Number of stored incidents.
    pub fn count(&self) -> Result<usize, RcaError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
