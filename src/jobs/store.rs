use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{FailureKind, JobAction, JobCreate, JobRecord, JobStatus};
use crate::shared::time::utc_now_iso;

pub const JOB_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create job table parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("job table schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("corrupt job row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// SQLite-backed job table. Append-mostly: inserts on admission, status
/// updates from the manager, never deletes.
#[derive(Debug, Clone)]
pub struct JobStore {
    db_path: PathBuf,
}

impl JobStore {
    pub fn open(db_path: &Path) -> Result<Self, JobStoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| JobStoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, JobStoreError> {
        Connection::open(&self.db_path).map_err(|source| JobStoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }

    fn ensure_schema(&self) -> Result<(), JobStoreError> {
        let conn = self.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                duration_ms INTEGER,
                argv TEXT NOT NULL,
                cwd TEXT,
                doc TEXT,
                log_path TEXT NOT NULL,
                exit_code INTEGER,
                failure_kind TEXT NOT NULL DEFAULT 'none',
                failure_hint TEXT,
                write_lock INTEGER NOT NULL DEFAULT 0,
                profile_id TEXT,
                artifacts TEXT
            );

            CREATE TABLE IF NOT EXISTS job_schema_version (
                version INTEGER NOT NULL
            );
            ",
        )?;
        let version: Option<i64> = conn
            .query_row("SELECT version FROM job_schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO job_schema_version (version) VALUES (?1)",
                    params![JOB_SCHEMA_VERSION],
                )?;
            }
            Some(found) if found > JOB_SCHEMA_VERSION => {
                return Err(JobStoreError::SchemaTooNew {
                    found,
                    supported: JOB_SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn insert(&self, payload: &JobCreate, log_path: &Path) -> Result<i64, JobStoreError> {
        let conn = self.connect()?;
        conn.execute(
            "
            INSERT INTO jobs (
                action, status, created_at, argv, cwd, doc, log_path,
                write_lock, profile_id, artifacts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                payload.action.as_str(),
                JobStatus::Queued.as_str(),
                utc_now_iso(),
                serde_json::to_string(&payload.argv).unwrap_or_else(|_| "[]".to_string()),
                payload.cwd.as_ref().map(|p| p.display().to_string()),
                payload.doc_id,
                log_path.display().to_string(),
                payload.requires_write_lock as i64,
                payload.profile_id,
                serde_json::to_string(&payload.artifacts).unwrap_or_else(|_| "[]".to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn mark_running(&self, job_id: i64) -> Result<(), JobStoreError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3",
            params![JobStatus::Running.as_str(), utc_now_iso(), job_id],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finalize(
        &self,
        job_id: i64,
        status: JobStatus,
        exit_code: Option<i32>,
        failure_kind: FailureKind,
        failure_hint: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<(), JobStoreError> {
        let conn = self.connect()?;
        conn.execute(
            "
            UPDATE jobs SET
                status = ?1, ended_at = ?2, exit_code = ?3,
                failure_kind = ?4, failure_hint = ?5, duration_ms = ?6
            WHERE id = ?7
            ",
            params![
                status.as_str(),
                utc_now_iso(),
                exit_code,
                failure_kind.as_str(),
                failure_hint,
                duration_ms,
                job_id
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, job_id: i64) -> Result<Option<JobRecord>, JobStoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![job_id], |row| {
                Ok(row_to_record(row))
            })
            .optional()?;
        record.transpose()
    }

    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        let conn = self.connect()?;
        let mut statement =
            conn.prepare("SELECT * FROM jobs ORDER BY id DESC LIMIT ?1")?;
        let rows = statement.query_map(params![limit as i64], |row| Ok(row_to_record(row)))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Most recent job for a document, optionally restricted to a set of
    /// actions (e.g. the export family when deriving RAG state).
    pub fn last_for_doc(
        &self,
        doc_id: &str,
        actions: Option<&[JobAction]>,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let conn = self.connect()?;
        let mut sql = "SELECT * FROM jobs WHERE doc = ?1".to_string();
        if let Some(actions) = actions {
            let placeholders = actions
                .iter()
                .map(|action| format!("'{}'", action.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND action IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY id DESC LIMIT 1");
        let record = conn
            .query_row(&sql, params![doc_id], |row| Ok(row_to_record(row)))
            .optional()?;
        record.transpose()
    }

    pub fn counts_by_status(&self) -> Result<BTreeMap<String, i64>, JobStoreError> {
        let conn = self.connect()?;
        let mut statement = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Startup reconciliation after an unclean shutdown: jobs left
    /// `running` become `fail` (their processes are gone), jobs left
    /// `queued` become `canceled` (the queue does not survive a restart).
    /// Returns the affected ids and their new statuses.
    pub fn reconcile_interrupted(&self) -> Result<Vec<(i64, JobStatus)>, JobStoreError> {
        let conn = self.connect()?;
        let mut affected = Vec::new();

        let mut statement =
            conn.prepare("SELECT id FROM jobs WHERE status = 'running' ORDER BY id")?;
        let running: Vec<i64> = statement
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        for id in running {
            conn.execute(
                "
                UPDATE jobs SET status = 'fail', ended_at = ?1,
                    failure_kind = ?2, failure_hint = ?3
                WHERE id = ?4
                ",
                params![
                    utc_now_iso(),
                    FailureKind::Unknown.as_str(),
                    "Interrupted by an unclean console shutdown.",
                    id
                ],
            )?;
            affected.push((id, JobStatus::Fail));
        }

        let mut statement =
            conn.prepare("SELECT id FROM jobs WHERE status = 'queued' ORDER BY id")?;
        let queued: Vec<i64> = statement
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        for id in queued {
            conn.execute(
                "
                UPDATE jobs SET status = 'canceled', ended_at = ?1,
                    failure_hint = ?2
                WHERE id = ?3
                ",
                params![utc_now_iso(), "Dropped from the queue at restart.", id],
            )?;
            affected.push((id, JobStatus::Canceled));
        }

        Ok(affected)
    }
}

fn row_to_record(row: &Row<'_>) -> Result<JobRecord, JobStoreError> {
    let id: i64 = row.get("id")?;
    let corrupt = |reason: String| JobStoreError::CorruptRow { id, reason };

    let action_raw: String = row.get("action")?;
    let action = JobAction::parse(&action_raw).map_err(&corrupt)?;
    let status_raw: String = row.get("status")?;
    let status = JobStatus::parse(&status_raw).map_err(&corrupt)?;
    let kind_raw: String = row.get("failure_kind")?;
    let failure_kind = FailureKind::parse(&kind_raw).map_err(&corrupt)?;

    let argv_raw: String = row.get("argv")?;
    let argv: Vec<String> = serde_json::from_str(&argv_raw)
        .map_err(|err| corrupt(format!("argv column: {err}")))?;
    let artifacts_raw: Option<String> = row.get("artifacts")?;
    let artifacts: Vec<String> = match artifacts_raw {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|err| corrupt(format!("artifacts column: {err}")))?,
        None => Vec::new(),
    };

    Ok(JobRecord {
        id,
        action,
        status,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_ms: row.get("duration_ms")?,
        argv,
        cwd: row.get::<_, Option<String>>("cwd")?.map(PathBuf::from),
        doc_id: row.get("doc")?,
        log_path: PathBuf::from(row.get::<_, String>("log_path")?),
        exit_code: row.get("exit_code")?,
        failure_kind,
        failure_hint: row.get("failure_hint")?,
        requires_write_lock: row.get::<_, i64>("write_lock")? != 0,
        profile_id: row.get("profile_id")?,
        artifacts,
    })
}
