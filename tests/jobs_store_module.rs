use std::path::Path;

use pipedeck::jobs::{FailureKind, JobAction, JobCreate, JobStatus, JobStore};
use tempfile::tempdir;

fn payload(action: JobAction, doc: Option<&str>) -> JobCreate {
    JobCreate {
        action,
        argv: vec!["runner".to_string(), action.as_str().to_string()],
        cwd: Some(Path::new("/tmp").to_path_buf()),
        doc_id: doc.map(str::to_string),
        profile_id: Some("default".to_string()),
        requires_write_lock: action.requires_write_lock(),
        artifacts: vec!["out/a".to_string()],
    }
}

#[test]
fn insert_then_get_round_trips_every_field() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(&dir.path().join("jobs.db")).expect("open");

    let id = store
        .insert(
            &payload(JobAction::LexiconScan, Some("doc-a")),
            &dir.path().join("job_1.log"),
        )
        .expect("insert");
    let record = store.get(id).expect("get").expect("exists");

    assert_eq!(record.id, id);
    assert_eq!(record.action, JobAction::LexiconScan);
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.argv, vec!["runner", "lexicon-scan"]);
    assert_eq!(record.doc_id.as_deref(), Some("doc-a"));
    assert_eq!(record.profile_id.as_deref(), Some("default"));
    assert!(record.requires_write_lock);
    assert_eq!(record.artifacts, vec!["out/a"]);
    assert_eq!(record.failure_kind, FailureKind::None);
    assert!(record.started_at.is_none());
}

#[test]
fn finalize_records_the_terminal_classification() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(&dir.path().join("jobs.db")).expect("open");
    let id = store
        .insert(
            &payload(JobAction::RagExport, Some("doc-a")),
            &dir.path().join("job_1.log"),
        )
        .expect("insert");

    store.mark_running(id).expect("running");
    store
        .finalize(
            id,
            JobStatus::Fail,
            Some(2),
            FailureKind::Mojibake,
            Some("Inspect the source encoding."),
            Some(1234),
        )
        .expect("finalize");

    let record = store.get(id).expect("get").expect("exists");
    assert_eq!(record.status, JobStatus::Fail);
    assert_eq!(record.exit_code, Some(2));
    assert_eq!(record.failure_kind, FailureKind::Mojibake);
    assert_eq!(record.duration_ms, Some(1234));
    assert!(record.started_at.is_some());
    assert!(record.ended_at.is_some());
}

#[test]
fn list_is_newest_first_and_bounded() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(&dir.path().join("jobs.db")).expect("open");
    for index in 0..5 {
        store
            .insert(
                &payload(JobAction::RagQuery, Some("doc-a")),
                &dir.path().join(format!("job_{index}.log")),
            )
            .expect("insert");
    }

    let listed = store.list(3).expect("list");
    assert_eq!(listed.len(), 3);
    assert!(listed[0].id > listed[1].id && listed[1].id > listed[2].id);
}

#[test]
fn last_for_doc_honors_the_action_filter() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(&dir.path().join("jobs.db")).expect("open");
    let scan = store
        .insert(
            &payload(JobAction::LexiconScan, Some("doc-a")),
            &dir.path().join("job_scan.log"),
        )
        .expect("insert scan");
    let export = store
        .insert(
            &payload(JobAction::RagExport, Some("doc-a")),
            &dir.path().join("job_export.log"),
        )
        .expect("insert export");
    store
        .insert(
            &payload(JobAction::LexiconScan, Some("doc-b")),
            &dir.path().join("job_other.log"),
        )
        .expect("insert other doc");

    let latest = store
        .last_for_doc("doc-a", None)
        .expect("query")
        .expect("exists");
    assert_eq!(latest.id, export);

    let latest_scan = store
        .last_for_doc("doc-a", Some(&[JobAction::LexiconScan]))
        .expect("query")
        .expect("exists");
    assert_eq!(latest_scan.id, scan);

    assert!(store
        .last_for_doc("doc-z", None)
        .expect("query")
        .is_none());
}

#[test]
fn counts_by_status_groups_rows() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(&dir.path().join("jobs.db")).expect("open");
    let first = store
        .insert(
            &payload(JobAction::RagQuery, Some("doc-a")),
            &dir.path().join("job_1.log"),
        )
        .expect("insert");
    store
        .insert(
            &payload(JobAction::RagQuery, Some("doc-a")),
            &dir.path().join("job_2.log"),
        )
        .expect("insert");
    store
        .finalize(first, JobStatus::Success, Some(0), FailureKind::None, None, Some(5))
        .expect("finalize");

    let counts = store.counts_by_status().expect("counts");
    assert_eq!(counts.get("queued"), Some(&1));
    assert_eq!(counts.get("success"), Some(&1));
}

#[test]
fn reopening_the_store_preserves_history() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("jobs.db");
    let id = {
        let store = JobStore::open(&db_path).expect("open");
        store
            .insert(
                &payload(JobAction::AsrBatch, None),
                &dir.path().join("job_1.log"),
            )
            .expect("insert")
    };

    let store = JobStore::open(&db_path).expect("reopen");
    let record = store.get(id).expect("get").expect("exists");
    assert_eq!(record.action, JobAction::AsrBatch);
    assert!(record.doc_id.is_none());
}
