use std::fs;

use pipedeck::config::Settings;
use pipedeck::resolver::{self, DocId, ResolverError};
use tempfile::tempdir;

fn seeded_settings(root: &std::path::Path) -> Settings {
    let settings = Settings::for_root(root);
    fs::create_dir_all(settings.staging_dir()).expect("staging dir");
    settings
}

#[test]
fn resolve_finds_an_existing_document() {
    let dir = tempdir().expect("tempdir");
    let settings = seeded_settings(dir.path());
    let doc_root = settings.staging_dir().join("board-2024");
    fs::create_dir_all(doc_root.join("work").join("board-2024")).expect("work dir");
    fs::create_dir_all(doc_root.join("TRANSCRIPT_v1")).expect("transcript dir");

    let paths = resolver::resolve(&settings, "board-2024").expect("resolve");
    assert_eq!(paths.doc_id.as_str(), "board-2024");
    assert!(paths.work_dir.expect("work dir").ends_with("board-2024"));
    assert!(paths
        .transcript_dir
        .expect("transcript dir")
        .ends_with("TRANSCRIPT_v1"));
}

#[test]
fn resolve_rejects_path_shaped_identifiers() {
    let dir = tempdir().expect("tempdir");
    let settings = seeded_settings(dir.path());
    // Plant a directory that a traversal would reach if it were allowed.
    fs::create_dir_all(dir.path().join("data").join("secrets")).expect("outside dir");

    for raw in [
        "../secrets",
        "..",
        "/etc",
        "\\\\nas\\share",
        "a/../../b",
        "UPPER",
        "space here",
    ] {
        let err = resolver::resolve(&settings, raw).expect_err("must reject");
        assert!(
            matches!(err, ResolverError::Invalid { .. }),
            "`{raw}` produced {err:?}"
        );
    }
}

#[test]
fn resolve_reports_not_found_for_absent_documents() {
    let dir = tempdir().expect("tempdir");
    let settings = seeded_settings(dir.path());
    let err = resolver::resolve(&settings, "no-such-doc").expect_err("absent");
    assert!(matches!(err, ResolverError::NotFound(_)));
}

#[cfg(unix)]
#[test]
fn resolve_rejects_staging_entries_that_escape_the_root() {
    let dir = tempdir().expect("tempdir");
    let settings = seeded_settings(dir.path());
    let outside = dir.path().join("outside-doc");
    fs::create_dir_all(&outside).expect("outside dir");
    std::os::unix::fs::symlink(&outside, settings.staging_dir().join("sneaky-doc"))
        .expect("symlink");

    let err = resolver::resolve(&settings, "sneaky-doc").expect_err("must reject");
    assert!(matches!(err, ResolverError::OutsideRoot(_)), "{err:?}");
}

#[test]
fn list_docs_skips_non_slug_directories() {
    let dir = tempdir().expect("tempdir");
    let settings = seeded_settings(dir.path());
    fs::create_dir_all(settings.staging_dir().join("doc-a")).expect("doc-a");
    fs::create_dir_all(settings.staging_dir().join("Mixed_Case")).expect("stray dir");
    fs::write(settings.staging_dir().join("stray-file"), b"x").expect("stray file");

    let docs = resolver::list_docs(&settings).expect("list");
    let names: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
    assert_eq!(names, vec!["doc-a"]);
}

#[test]
fn list_docs_with_missing_staging_root_is_empty() {
    let dir = tempdir().expect("tempdir");
    let settings = Settings::for_root(dir.path());
    assert!(resolver::list_docs(&settings).expect("list").is_empty());
}

#[test]
fn doc_id_round_trips_through_serde() {
    let id = DocId::parse("doc-a").expect("parse");
    let json = serde_json::to_string(&id).expect("serialize");
    assert_eq!(json, "\"doc-a\"");
    let back: DocId = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, id);
    assert!(serde_json::from_str::<DocId>("\"../../etc\"").is_err());
}
