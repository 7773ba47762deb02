pub mod commands;
pub mod failure;
pub mod log_hub;
pub mod manager;
pub mod scheduler;
pub mod store;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use commands::CommandError;
pub use failure::{classify, Classification, FailureKind};
pub use log_hub::{LogEvent, LogHub};
pub use manager::{CancelOutcome, JobManager, LockState};
pub use scheduler::{derive_admission_key, AdmissionKey, AdmissionQueue};
pub use store::{JobStore, JobStoreError};

/// The closed set of operations the scheduler may launch. Nothing outside
/// this enum ever reaches a process spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobAction {
    AsrBatch,
    LexiconScan,
    LexiconApply,
    RagExport,
    RagDoctor,
    RagQuery,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AsrBatch => "asr-batch",
            Self::LexiconScan => "lexicon-scan",
            Self::LexiconApply => "lexicon-apply",
            Self::RagExport => "rag-export",
            Self::RagDoctor => "rag-doctor",
            Self::RagQuery => "rag-query",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "asr-batch" => Ok(Self::AsrBatch),
            "lexicon-scan" => Ok(Self::LexiconScan),
            "lexicon-apply" => Ok(Self::LexiconApply),
            "rag-export" => Ok(Self::RagExport),
            "rag-doctor" => Ok(Self::RagDoctor),
            "rag-query" => Ok(Self::RagQuery),
            _ => Err(format!("unknown action `{raw}`")),
        }
    }

    /// Mutating actions serialize per document (or globally for batch
    /// runs); doctor and query only consume a worker slot.
    pub fn requires_write_lock(self) -> bool {
        match self {
            Self::AsrBatch | Self::LexiconScan | Self::LexiconApply | Self::RagExport => true,
            Self::RagDoctor | Self::RagQuery => false,
        }
    }
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Fail,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("unknown status `{raw}`")),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail | Self::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Admission payload: a fully resolved command line plus scheduling
/// metadata. Built only by the command table; `argv` never contains
/// shell syntax or unvalidated caller input.
#[derive(Debug, Clone, Serialize)]
pub struct JobCreate {
    pub action: JobAction,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub doc_id: Option<String>,
    pub profile_id: Option<String>,
    pub requires_write_lock: bool,
    pub artifacts: Vec<String>,
}

/// One row of the job table. Append-mostly: records reach a terminal
/// status and are never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub action: JobAction,
    pub status: JobStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub doc_id: Option<String>,
    pub log_path: PathBuf,
    pub exit_code: Option<i32>,
    pub failure_kind: FailureKind,
    pub failure_hint: Option<String>,
    pub requires_write_lock: bool,
    pub profile_id: Option<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("job scheduler is no longer running")]
    SchedulerUnavailable,
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
