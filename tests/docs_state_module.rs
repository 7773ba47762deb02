use std::fs;
use std::path::Path;

use pipedeck::config::Settings;
use pipedeck::docs::{self, DocState};
use pipedeck::jobs::{FailureKind, JobAction, JobCreate, JobManager, JobStatus};
use pipedeck::lexicon::LexiconStore;
use pipedeck::resolver;
use tempfile::tempdir;

struct Fixture {
    settings: Settings,
    jobs: JobManager,
    lexicon: LexiconStore,
}

impl Fixture {
    fn new(root: &Path) -> Self {
        let settings = Settings::for_root(root);
        settings.bootstrap().expect("bootstrap");
        fs::create_dir_all(settings.staging_dir()).expect("staging dir");
        let jobs = JobManager::new(settings.clone()).expect("manager");
        Self {
            settings,
            jobs,
            lexicon: LexiconStore::new(),
        }
    }

    fn seed_doc(&self, doc: &str) {
        let work = self.settings.staging_dir().join(doc).join("work").join(doc);
        fs::create_dir_all(&work).expect("work dir");
        fs::write(work.join("02_merged_raw.json"), "{\"segments\": [1]}").expect("raw artifact");
    }

    fn work_dir(&self, doc: &str) -> std::path::PathBuf {
        self.settings.staging_dir().join(doc).join("work").join(doc)
    }

    fn info(&self, doc: &str) -> pipedeck::docs::DocInfo {
        let paths = resolver::resolve(&self.settings, doc).expect("resolve");
        docs::build_doc_info(&self.settings, &self.jobs, &self.lexicon, &paths)
    }

    fn record_export_job(&self, doc: &str, status: JobStatus) {
        let store = self.jobs.store();
        let payload = JobCreate {
            action: JobAction::RagExport,
            argv: vec!["runner".to_string(), "rag".to_string(), "export".to_string()],
            cwd: None,
            doc_id: Some(doc.to_string()),
            profile_id: None,
            requires_write_lock: true,
            artifacts: Vec::new(),
        };
        let id = store
            .insert(&payload, &self.settings.logs_dir.join("seeded.log"))
            .expect("insert");
        let (exit_code, kind) = match status {
            JobStatus::Fail => (Some(1), FailureKind::Unknown),
            _ => (Some(0), FailureKind::None),
        };
        store
            .finalize(id, status, exit_code, kind, None, Some(10))
            .expect("finalize");
    }
}

#[test]
fn raw_artifacts_only_is_asr_ready_with_scan_allowed() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::AsrReady);
    assert_eq!(info.allowed_actions, vec![JobAction::LexiconScan]);
    assert!(!info.locked);
}

#[test]
fn missing_work_dir_is_missing() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fs::create_dir_all(fixture.settings.staging_dir().join("doc-a")).expect("bare dir");

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::Missing);
    assert!(info.allowed_actions.is_empty());
}

#[test]
fn suggested_rules_move_the_doc_to_lexicon_suggested() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    fs::write(
        fixture.work_dir("doc-a").join(resolver::SUGGESTED_RULES_FILE),
        "version: 1\ndoc_id: doc-a\nrules:\n  - pattern: foo\n    replacement: bar\n",
    )
    .expect("suggested");

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::LexiconSuggested);
    assert_eq!(info.suggested_count, 1);
    assert!(info.suggested_fingerprint.is_some());
    assert!(info.allowed_actions.contains(&JobAction::LexiconApply));
}

#[test]
fn validated_with_current_stamp_then_stale_after_source_change() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    fs::write(
        fixture.work_dir("doc-a").join(resolver::SUGGESTED_RULES_FILE),
        "version: 1\ndoc_id: doc-a\nrules:\n  - pattern: foo\n    replacement: bar\n",
    )
    .expect("suggested");

    let paths = resolver::resolve(&fixture.settings, "doc-a").expect("resolve");
    let suggested = fixture.lexicon.read_suggested(&paths).expect("read");
    fixture
        .lexicon
        .write_validated(
            &paths,
            &suggested.rules,
            suggested.fingerprint.as_deref(),
        )
        .expect("validate");

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::LexiconValidated);
    assert!(!info.validation_stale);
    assert!(info.allowed_actions.contains(&JobAction::RagExport));

    // The pipeline rewrites the source artifact after validation: the
    // stamp hash no longer matches and the validation stops counting.
    fs::write(
        fixture.work_dir("doc-a").join("02_merged_raw.json"),
        "{\"segments\": [1, 2]}",
    )
    .expect("mutate source");

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::LexiconSuggested);
    assert!(info.validation_stale);
    assert!(!info.allowed_actions.contains(&JobAction::RagExport));
}

#[test]
fn export_artifacts_with_healthy_history_are_rag_ready() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    fs::create_dir_all(fixture.settings.rag_doc_dir("doc-a").join("v1")).expect("export dir");
    fixture.record_export_job("doc-a", JobStatus::Success);

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::RagReady);
    assert_eq!(info.last_rag_version.as_deref(), Some("v1"));
    assert!(info.allowed_actions.contains(&JobAction::RagDoctor));
    assert!(info.allowed_actions.contains(&JobAction::RagQuery));
}

#[test]
fn failed_latest_export_is_rag_failed_but_still_queryable() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    fs::create_dir_all(fixture.settings.rag_doc_dir("doc-a").join("v1")).expect("export dir");
    fixture.record_export_job("doc-a", JobStatus::Success);
    fixture.record_export_job("doc-a", JobStatus::Fail);

    let info = fixture.info("doc-a");
    assert_eq!(info.doc_state, DocState::RagFailed);
    assert!(info.allowed_actions.contains(&JobAction::RagExport));
    assert!(info.allowed_actions.contains(&JobAction::RagQuery));
}

#[test]
fn key_files_lists_only_existing_artifacts() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    fs::write(
        fixture.work_dir("doc-a").join(resolver::SUGGESTED_RULES_FILE),
        "version: 1\nrules: []\n",
    )
    .expect("suggested");

    let paths = resolver::resolve(&fixture.settings, "doc-a").expect("resolve");
    let files = docs::key_files(&paths);
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"02_merged_raw.json"));
    assert!(names.contains(&resolver::SUGGESTED_RULES_FILE));
    assert!(!names.contains(&"05_polished.json"));
}

#[test]
fn preview_text_prefers_clean_transcript_over_chunks() {
    let dir = tempdir().expect("tempdir");
    let fixture = Fixture::new(dir.path());
    fixture.seed_doc("doc-a");
    let doc_root = fixture.settings.staging_dir().join("doc-a");
    let transcript = doc_root.join("TRANSCRIPT_v1");
    fs::create_dir_all(&transcript).expect("transcript dir");
    fs::write(transcript.join("session.clean.txt"), "cleaned text").expect("clean txt");
    fs::write(
        fixture.work_dir("doc-a").join("chunks.jsonl"),
        "{\"text\": \"chunk text\"}\n",
    )
    .expect("chunks");

    let paths = resolver::resolve(&fixture.settings, "doc-a").expect("resolve");
    assert_eq!(docs::preview_text(&paths, 100), "cleaned text");

    fs::remove_file(transcript.join("session.clean.txt")).expect("remove clean");
    fs::remove_dir(&transcript).expect("remove transcript dir");
    let paths = resolver::resolve(&fixture.settings, "doc-a").expect("resolve");
    assert_eq!(docs::preview_text(&paths, 100), "{\"text\": \"chunk text\"}");
}
