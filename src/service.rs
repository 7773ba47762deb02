use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::config::Settings;
use crate::docs::{self, DocInfo, DocState, KeyFile};
use crate::jobs::{
    commands, CancelOutcome, CommandError, JobAction, JobCreate, JobError, JobManager, JobRecord,
    LogEvent,
};
use crate::lexicon::{LexiconError, LexiconStore, Rule, SuggestedRules, WriteOutcome};
use crate::ops::{self, HealthReport, StorageSnapshot};
use crate::preview::{preview, PreviewOutcome};
use crate::profiles::ProfilesConfig;
use crate::resolver::{self, DocPaths, ResolverError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("action {action} is not permitted for `{doc}` in state {state}")]
    ActionNotAllowed {
        doc: String,
        action: JobAction,
        state: DocState,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Lexicon(#[from] LexiconError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// An enqueue (or dry-run) request against the whitelisted action set.
/// This is the only shape in which callers can ask for work; there is no
/// raw-command path.
#[derive(Debug, Clone)]
pub enum ActionRequest {
    AsrBatch {
        profile: Option<String>,
    },
    LexiconScan {
        doc: String,
        profile: Option<String>,
    },
    LexiconApply {
        doc: String,
        profile: Option<String>,
    },
    RagExport {
        doc: String,
        version_tag: Option<String>,
        force: bool,
        profile: Option<String>,
    },
    RagDoctor {
        doc: String,
        version_tag: Option<String>,
        profile: Option<String>,
    },
    RagQuery {
        doc: String,
        query: String,
        top_k: Option<u32>,
        version_tag: Option<String>,
        profile: Option<String>,
    },
}

impl ActionRequest {
    pub fn action(&self) -> JobAction {
        match self {
            Self::AsrBatch { .. } => JobAction::AsrBatch,
            Self::LexiconScan { .. } => JobAction::LexiconScan,
            Self::LexiconApply { .. } => JobAction::LexiconApply,
            Self::RagExport { .. } => JobAction::RagExport,
            Self::RagDoctor { .. } => JobAction::RagDoctor,
            Self::RagQuery { .. } => JobAction::RagQuery,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            Self::AsrBatch { .. } => None,
            Self::LexiconScan { doc, .. }
            | Self::LexiconApply { doc, .. }
            | Self::RagExport { doc, .. }
            | Self::RagDoctor { doc, .. }
            | Self::RagQuery { doc, .. } => Some(doc),
        }
    }
}

/// The console's request/response surface. Owns the scheduler, the rule
/// store and the loaded presets; every document-scoped call resolves its
/// id before any filesystem access.
pub struct Console {
    settings: Settings,
    profiles: ProfilesConfig,
    jobs: JobManager,
    lexicon: LexiconStore,
}

impl Console {
    pub fn new(settings: Settings) -> Result<Self, ServiceError> {
        let profiles = crate::profiles::load_profiles(&settings.profiles_path);
        let jobs = JobManager::new(settings.clone())?;
        Ok(Self {
            settings,
            profiles,
            jobs,
            lexicon: LexiconStore::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profiles(&self) -> &ProfilesConfig {
        &self.profiles
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    // ---- documents -----------------------------------------------------

    pub fn list_documents(&self) -> Result<Vec<DocInfo>, ServiceError> {
        Ok(docs::scan_documents(
            &self.settings,
            &self.jobs,
            &self.lexicon,
        )?)
    }

    pub fn document(&self, doc: &str) -> Result<DocInfo, ServiceError> {
        let paths = self.resolve(doc)?;
        Ok(docs::build_doc_info(
            &self.settings,
            &self.jobs,
            &self.lexicon,
            &paths,
        ))
    }

    pub fn document_files(&self, doc: &str) -> Result<Vec<KeyFile>, ServiceError> {
        let paths = self.resolve(doc)?;
        Ok(docs::key_files(&paths))
    }

    // ---- rules ---------------------------------------------------------

    pub fn suggested_rules(&self, doc: &str) -> Result<SuggestedRules, ServiceError> {
        let paths = self.resolve(doc)?;
        Ok(self.lexicon.read_suggested(&paths)?)
    }

    /// Optimistic write of the validated rule set. `Conflict` when the
    /// suggested rules changed under the caller; the persisted file is
    /// only ever the winning write.
    pub fn put_validated_rules(
        &self,
        doc: &str,
        rules: &[Rule],
        expected_fingerprint: Option<&str>,
    ) -> Result<WriteOutcome, ServiceError> {
        let paths = self.resolve(doc)?;
        Ok(self
            .lexicon
            .write_validated(&paths, rules, expected_fingerprint)?)
    }

    pub fn preview_rule(
        &self,
        doc: &str,
        pattern: &str,
        replacement: &str,
    ) -> Result<PreviewOutcome, ServiceError> {
        let paths = self.resolve(doc)?;
        let text = docs::preview_text(&paths, self.settings.preview_excerpt_chars);
        Ok(preview(
            &text,
            pattern,
            replacement,
            Duration::from_millis(self.settings.preview_timeout_ms),
        ))
    }

    // ---- jobs ----------------------------------------------------------

    /// Validate and enqueue. Rejections (bad id, action not permitted in
    /// the current state, unknown profile) happen here, before a job
    /// record exists.
    pub fn enqueue(&self, request: &ActionRequest) -> Result<JobRecord, ServiceError> {
        let payload = self.build_payload(request)?;
        Ok(self.jobs.submit(payload)?)
    }

    /// Build the exact command a request would run, without scheduling it.
    pub fn dry_run(&self, request: &ActionRequest) -> Result<JobCreate, ServiceError> {
        self.build_payload(request)
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, ServiceError> {
        Ok(self.jobs.list(limit)?)
    }

    pub fn job(&self, job_id: i64) -> Result<JobRecord, ServiceError> {
        Ok(self
            .jobs
            .get(job_id)?
            .ok_or(JobError::NotFound(job_id))?)
    }

    pub fn cancel_job(&self, job_id: i64) -> Result<CancelOutcome, ServiceError> {
        Ok(self.jobs.cancel(job_id)?)
    }

    pub fn job_log(&self, job_id: i64) -> Result<String, ServiceError> {
        Ok(self
            .jobs
            .read_log(job_id, crate::jobs::manager::LOG_READ_MAX_BYTES)?)
    }

    pub fn job_log_path(&self, job_id: i64) -> Result<Option<PathBuf>, ServiceError> {
        Ok(self.jobs.log_file_path(job_id)?)
    }

    /// Live log feed: the persisted transcript so far, then events.
    pub fn subscribe_job_log(
        &self,
        job_id: i64,
    ) -> Result<(String, Receiver<LogEvent>), ServiceError> {
        Ok(self.jobs.subscribe(job_id)?)
    }

    // ---- ops -----------------------------------------------------------

    pub fn health(&self) -> HealthReport {
        ops::run_health_checks(&self.settings, self.jobs.store())
    }

    pub fn storage_snapshot(&self) -> StorageSnapshot {
        ops::collect_storage_snapshot(&self.settings, 5)
    }

    // ---- internals -----------------------------------------------------

    fn resolve(&self, doc: &str) -> Result<DocPaths, ServiceError> {
        Ok(resolver::resolve(&self.settings, doc)?)
    }

    fn build_payload(&self, request: &ActionRequest) -> Result<JobCreate, ServiceError> {
        let paths = match request.doc() {
            Some(doc) => Some(self.resolve(doc)?),
            None => None,
        };

        if let Some(paths) = paths.as_ref() {
            let info = docs::build_doc_info(&self.settings, &self.jobs, &self.lexicon, paths);
            let has_exports = !info.rag_versions.is_empty();
            if !docs::state_permits(info.doc_state, request.action(), has_exports) {
                return Err(ServiceError::ActionNotAllowed {
                    doc: info.name,
                    action: request.action(),
                    state: info.doc_state,
                });
            }
        }

        let payload = match request {
            ActionRequest::AsrBatch { profile } => {
                commands::build_asr_batch(&self.settings, &self.profiles, profile.as_deref())?
            }
            ActionRequest::LexiconScan { profile, .. } => commands::build_lexicon_scan(
                &self.settings,
                &self.profiles,
                paths.as_ref().expect("doc-scoped request"),
                profile.as_deref(),
            )?,
            ActionRequest::LexiconApply { profile, .. } => commands::build_lexicon_apply(
                &self.settings,
                &self.profiles,
                paths.as_ref().expect("doc-scoped request"),
                profile.as_deref(),
            )?,
            ActionRequest::RagExport {
                version_tag,
                force,
                profile,
                ..
            } => commands::build_rag_export(
                &self.settings,
                &self.profiles,
                paths.as_ref().expect("doc-scoped request"),
                version_tag.as_deref(),
                *force,
                profile.as_deref(),
            )?,
            ActionRequest::RagDoctor {
                version_tag,
                profile,
                ..
            } => commands::build_rag_doctor(
                &self.settings,
                &self.profiles,
                paths.as_ref().expect("doc-scoped request"),
                version_tag.as_deref(),
                profile.as_deref(),
            )?,
            ActionRequest::RagQuery {
                query,
                top_k,
                version_tag,
                profile,
                ..
            } => commands::build_rag_query(
                &self.settings,
                &self.profiles,
                paths.as_ref().expect("doc-scoped request"),
                query,
                *top_k,
                version_tag.as_deref(),
                profile.as_deref(),
            )?,
        };
        Ok(payload)
    }
}
