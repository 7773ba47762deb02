use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::Settings;
use crate::jobs::{commands, FailureKind, JobAction, JobManager, JobRecord, JobStatus, LockState};
use crate::lexicon::{chosen_source, file_fingerprint, LexiconStore, Stamp};
use crate::resolver::{self, DocPaths, ResolverError};

/// Lifecycle position of a document, derived fresh from disk plus job
/// history on every call. Nothing here is cached or stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocState {
    Missing,
    AsrReady,
    LexiconSuggested,
    LexiconValidated,
    RagReady,
    RagFailed,
}

impl DocState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "MISSING",
            Self::AsrReady => "ASR_READY",
            Self::LexiconSuggested => "LEXICON_SUGGESTED",
            Self::LexiconValidated => "LEXICON_VALIDATED",
            Self::RagReady => "RAG_READY",
            Self::RagFailed => "RAG_FAILED",
        }
    }
}

impl std::fmt::Display for DocState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw observations the state function is computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateInputs {
    pub has_sources: bool,
    pub has_suggested: bool,
    /// A validated rule file exists and its stamp hash matches the current
    /// chosen source artifact. A stale validation reports `false` here.
    pub has_current_validation: bool,
    pub rag_ready: bool,
    pub rag_failed: bool,
}

/// Pure state derivation. A stale validation (stamp hash mismatch) is not
/// a distinct state: it demotes to LEXICON_SUGGESTED when suggestions
/// exist, otherwise to ASR_READY, so the document reads as needing a
/// re-scan.
pub fn determine_doc_state(inputs: StateInputs) -> DocState {
    if !inputs.has_sources {
        return DocState::Missing;
    }
    if inputs.rag_ready {
        return DocState::RagReady;
    }
    if inputs.rag_failed {
        return DocState::RagFailed;
    }
    if inputs.has_current_validation {
        return DocState::LexiconValidated;
    }
    if inputs.has_suggested {
        return DocState::LexiconSuggested;
    }
    DocState::AsrReady
}

/// Can `action` run given the document's lifecycle state alone? The lock
/// is deliberately not consulted: a write job queued while the lock is
/// held simply waits its turn.
pub fn state_permits(state: DocState, action: JobAction, has_exports: bool) -> bool {
    match action {
        JobAction::AsrBatch => false,
        JobAction::RagDoctor | JobAction::RagQuery => has_exports,
        JobAction::LexiconScan => !matches!(state, DocState::Missing),
        JobAction::LexiconApply => matches!(
            state,
            DocState::LexiconSuggested
                | DocState::LexiconValidated
                | DocState::RagReady
                | DocState::RagFailed
        ),
        JobAction::RagExport => matches!(
            state,
            DocState::LexiconValidated | DocState::RagReady | DocState::RagFailed
        ),
    }
}

/// The action set the console advertises for a document right now.
/// Mutating actions disappear while the write lock is held; read-only
/// actions survive the lock as long as an export exists to read.
pub fn allowed_actions(state: DocState, locked: bool, has_exports: bool) -> Vec<JobAction> {
    let mut actions = Vec::new();
    if !locked {
        for action in [
            JobAction::LexiconScan,
            JobAction::LexiconApply,
            JobAction::RagExport,
        ] {
            if state_permits(state, action, has_exports) {
                actions.push(action);
            }
        }
    }
    for action in [JobAction::RagDoctor, JobAction::RagQuery] {
        if state_permits(state, action, has_exports) {
            actions.push(action);
        }
    }
    actions
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: i64,
    pub action: JobAction,
    pub status: JobStatus,
    pub failure_kind: FailureKind,
    pub failure_hint: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            action: record.action,
            status: record.status,
            failure_kind: record.failure_kind,
            failure_hint: record.failure_hint.clone(),
            created_at: record.created_at.clone(),
            ended_at: record.ended_at.clone(),
        }
    }
}

/// Computed projection of one document: presence flags per artifact tier,
/// derived state, lock status and the advertised action set.
#[derive(Debug, Clone, Serialize)]
pub struct DocInfo {
    pub name: String,
    pub work_dir: Option<PathBuf>,
    pub transcript_dir: Option<PathBuf>,
    pub has_suggested: bool,
    pub has_validated: bool,
    pub validation_stale: bool,
    pub suggested_count: usize,
    pub suggested_fingerprint: Option<String>,
    pub stamp: Option<Stamp>,
    pub doc_state: DocState,
    pub rag_versions: Vec<String>,
    pub last_rag_version: Option<String>,
    pub last_job: Option<JobSummary>,
    pub last_rag_job: Option<JobSummary>,
    pub allowed_actions: Vec<JobAction>,
    pub locked: bool,
    pub locked_by_job_id: Option<i64>,
    pub locked_action: Option<JobAction>,
}

const RAG_ACTIONS: [JobAction; 3] = [
    JobAction::RagExport,
    JobAction::RagDoctor,
    JobAction::RagQuery,
];
const EXPORT_ACTIONS: [JobAction; 1] = [JobAction::RagExport];

pub fn scan_documents(
    settings: &Settings,
    jobs: &JobManager,
    lexicon: &LexiconStore,
) -> Result<Vec<DocInfo>, ResolverError> {
    let mut infos = Vec::new();
    for paths in resolver::list_docs(settings)? {
        infos.push(build_doc_info(settings, jobs, lexicon, &paths));
    }
    Ok(infos)
}

pub fn build_doc_info(
    settings: &Settings,
    jobs: &JobManager,
    lexicon: &LexiconStore,
    paths: &DocPaths,
) -> DocInfo {
    let doc_id = paths.doc_id.to_string();
    let suggested_path = paths.suggested_rules().filter(|p| p.is_file());
    let validated_path = paths.validated_rules().filter(|p| p.is_file());
    let has_suggested = suggested_path.is_some();
    let has_validated = validated_path.is_some();

    let stamp = lexicon.read_stamp(paths);
    let suggested = lexicon.read_suggested(paths).ok();
    let suggested_count = suggested.as_ref().map_or(0, |s| s.rules.len());
    let suggested_fingerprint = suggested.and_then(|s| s.fingerprint);

    let has_current_validation = has_validated && stamp_is_current(paths, stamp.as_ref());
    let validation_stale = has_validated && !has_current_validation;

    let rag_versions = commands::export_versions(settings, &doc_id);
    let has_exports = !rag_versions.is_empty();
    let last_rag_version = rag_versions.first().cloned();

    let last_job = jobs.last_for_doc(&doc_id, None).ok().flatten();
    let last_rag_job = jobs
        .last_for_doc(&doc_id, Some(&RAG_ACTIONS))
        .ok()
        .flatten();
    let last_export_job = jobs
        .last_for_doc(&doc_id, Some(&EXPORT_ACTIONS))
        .ok()
        .flatten();

    let last_export_failed = last_export_job
        .as_ref()
        .is_some_and(|job| job.status == JobStatus::Fail);
    // Export artifacts with a failed (or absent) latest export attempt do
    // not count as ready.
    let rag_ready = has_exports && !last_export_failed;
    let rag_failed = last_export_failed;

    let has_sources = paths.work_dir.as_ref().is_some_and(|dir| dir.is_dir())
        && paths
            .work_dir
            .as_ref()
            .and_then(|dir| chosen_source(dir))
            .is_some();

    let doc_state = determine_doc_state(StateInputs {
        has_sources,
        has_suggested,
        has_current_validation,
        rag_ready,
        rag_failed,
    });

    let lock_state: LockState = jobs.doc_lock_state(&doc_id);
    let allowed = allowed_actions(doc_state, lock_state.locked, has_exports);

    DocInfo {
        name: doc_id,
        work_dir: paths.work_dir.clone(),
        transcript_dir: paths.transcript_dir.clone(),
        has_suggested,
        has_validated,
        validation_stale,
        suggested_count,
        suggested_fingerprint,
        stamp,
        doc_state,
        rag_versions,
        last_rag_version,
        last_job: last_job.as_ref().map(JobSummary::from),
        last_rag_job: last_rag_job.as_ref().map(JobSummary::from),
        allowed_actions: allowed,
        locked: lock_state.locked,
        locked_by_job_id: lock_state.job_id,
        locked_action: lock_state.action,
    }
}

/// Does the stamp still vouch for the validated rules? True only when the
/// stamped hash equals the current hash of the chosen source artifact.
pub fn stamp_is_current(paths: &DocPaths, stamp: Option<&Stamp>) -> bool {
    let Some(stamp) = stamp else {
        return false;
    };
    let Some(work_dir) = paths.work_dir.as_ref() else {
        return false;
    };
    let Some((_, source_path)) = chosen_source(work_dir) else {
        return false;
    };
    match file_fingerprint(&source_path) {
        Some(current) => current == stamp.source_content_hash,
        None => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_secs: Option<i64>,
}

/// The handful of files an operator actually looks at for a document.
pub fn key_files(paths: &DocPaths) -> Vec<KeyFile> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(work_dir) = paths.work_dir.as_ref() {
        for name in crate::lexicon::SOURCE_PRIORITY {
            candidates.push(work_dir.join(name));
        }
    }
    candidates.extend(paths.suggested_rules());
    candidates.extend(paths.validated_rules());
    candidates.extend(paths.stamp_path());

    candidates
        .into_iter()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok()?;
            let name = path.file_name()?.to_str()?.to_string();
            let modified_secs = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64);
            Some(KeyFile {
                name,
                path,
                size_bytes: metadata.len(),
                modified_secs,
            })
        })
        .collect()
}

/// Excerpt of the document's text for the preview sandbox: the cleaned
/// transcript when present, else the first line of the chunk stream.
pub fn preview_text(paths: &DocPaths, limit: usize) -> String {
    if let Some(transcript_dir) = paths.transcript_dir.as_ref() {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(entries) = fs::read_dir(transcript_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.ends_with(".clean.txt") {
                    candidates.insert(0, path);
                } else if name.ends_with(".txt") {
                    candidates.push(path);
                }
            }
        }
        if let Some(path) = candidates.first() {
            if let Ok(text) = fs::read_to_string(path) {
                return truncate_chars(&text, limit);
            }
        }
    }
    if let Some(work_dir) = paths.work_dir.as_ref() {
        let chunks = work_dir.join("chunks.jsonl");
        if let Ok(raw) = fs::read_to_string(&chunks) {
            if let Some(line) = raw.lines().map(str::trim).find(|line| !line.is_empty()) {
                return truncate_chars(line, limit);
            }
        }
    }
    String::new()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_table_matches_lifecycle_order() {
        let base = StateInputs {
            has_sources: true,
            ..Default::default()
        };
        assert_eq!(
            determine_doc_state(StateInputs {
                has_sources: false,
                ..Default::default()
            }),
            DocState::Missing
        );
        assert_eq!(determine_doc_state(base), DocState::AsrReady);
        assert_eq!(
            determine_doc_state(StateInputs {
                has_suggested: true,
                ..base
            }),
            DocState::LexiconSuggested
        );
        assert_eq!(
            determine_doc_state(StateInputs {
                has_suggested: true,
                has_current_validation: true,
                ..base
            }),
            DocState::LexiconValidated
        );
        assert_eq!(
            determine_doc_state(StateInputs {
                rag_ready: true,
                ..base
            }),
            DocState::RagReady
        );
        assert_eq!(
            determine_doc_state(StateInputs {
                rag_failed: true,
                ..base
            }),
            DocState::RagFailed
        );
    }

    #[test]
    fn stale_validation_demotes_to_suggested() {
        let inputs = StateInputs {
            has_sources: true,
            has_suggested: true,
            has_current_validation: false,
            ..Default::default()
        };
        assert_eq!(determine_doc_state(inputs), DocState::LexiconSuggested);
    }

    #[test]
    fn lock_hides_mutating_actions_only() {
        let unlocked = allowed_actions(DocState::RagReady, false, true);
        assert!(unlocked.contains(&JobAction::LexiconScan));
        assert!(unlocked.contains(&JobAction::RagExport));
        assert!(unlocked.contains(&JobAction::RagQuery));

        let locked = allowed_actions(DocState::RagReady, true, true);
        assert!(!locked.contains(&JobAction::LexiconScan));
        assert!(!locked.contains(&JobAction::RagExport));
        assert!(locked.contains(&JobAction::RagDoctor));
        assert!(locked.contains(&JobAction::RagQuery));
    }

    #[test]
    fn asr_ready_permits_scan_only() {
        let actions = allowed_actions(DocState::AsrReady, false, false);
        assert_eq!(actions, vec![JobAction::LexiconScan]);
    }

    #[test]
    fn read_only_actions_need_an_export() {
        assert!(!state_permits(DocState::LexiconValidated, JobAction::RagQuery, false));
        assert!(state_permits(DocState::LexiconValidated, JobAction::RagQuery, true));
    }
}
