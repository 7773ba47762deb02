use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Settings;
use crate::jobs::JobStore;

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub checks: Vec<HealthCheck>,
    pub issues: Vec<String>,
    pub job_counts: BTreeMap<String, i64>,
}

/// Probe the paths and stores the console depends on. Degrades, never
/// fails: an unreachable volume is a finding, not an error.
pub fn run_health_checks(settings: &Settings, store: &JobStore) -> HealthReport {
    let mut checks = Vec::new();
    let mut issues = Vec::new();
    let mut add = |name: &str, ok: bool, detail: String| {
        if !ok && !detail.is_empty() {
            issues.push(detail.clone());
        }
        checks.push(HealthCheck {
            name: name.to_string(),
            ok,
            detail,
        });
    };

    let data_root = &settings.data_root;
    add(
        "data_root",
        data_root.is_dir(),
        if data_root.is_dir() {
            String::new()
        } else {
            format!("{} is absent or not a directory", data_root.display())
        },
    );
    add(
        "runner_path",
        settings.runner_path.is_file(),
        if settings.runner_path.is_file() {
            String::new()
        } else {
            format!("{} is absent or not a file", settings.runner_path.display())
        },
    );
    add(
        "logs_dir",
        settings.logs_dir.is_dir(),
        if settings.logs_dir.is_dir() {
            String::new()
        } else {
            format!("{} is absent", settings.logs_dir.display())
        },
    );

    let job_counts = match store.counts_by_status() {
        Ok(counts) => {
            add("jobs_db", true, String::new());
            counts
        }
        Err(err) => {
            add("jobs_db", false, err.to_string());
            BTreeMap::new()
        }
    };

    let status = if checks.iter().all(|check| check.ok) {
        "ok"
    } else {
        "degraded"
    };
    HealthReport {
        status: status.to_string(),
        checks,
        issues,
        job_counts,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierUsage {
    pub label: String,
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: u64,
    pub file_count: u64,
    pub oldest_secs: Option<i64>,
    pub newest_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeavyDoc {
    pub doc_id: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Orphans {
    /// Staging documents with no export yet.
    pub missing_export: Vec<String>,
    /// Export directories whose staging source is gone.
    pub missing_source: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageSnapshot {
    pub root: PathBuf,
    pub directories: Vec<TierUsage>,
    pub heavy_docs: Vec<HeavyDoc>,
    pub orphans: Orphans,
}

/// Walk the pipeline tiers and summarize disk usage, the heaviest
/// documents, and staging/export orphans.
pub fn collect_storage_snapshot(settings: &Settings, top_n: usize) -> StorageSnapshot {
    let tiers = [
        (settings.input_audio_dir(), "Raw audio inputs"),
        (settings.input_video_dir(), "Raw video inputs"),
        (settings.staging_dir(), "ASR staging"),
        (settings.rag_output_dir(), "RAG exports"),
        (settings.archive_dir(), "Archives"),
    ];
    let directories = tiers
        .into_iter()
        .map(|(path, label)| {
            let usage = dir_usage(&path);
            TierUsage {
                label: label.to_string(),
                exists: path.is_dir(),
                path,
                size_bytes: usage.size_bytes,
                file_count: usage.file_count,
                oldest_secs: usage.oldest_secs,
                newest_secs: usage.newest_secs,
            }
        })
        .collect();

    let staging_docs = doc_sizes(&settings.staging_dir(), None);
    let export_docs = doc_sizes(&settings.rag_output_dir(), Some("RAG-"));

    let mut heavy: Vec<HeavyDoc> = staging_docs
        .iter()
        .map(|(doc_id, size)| HeavyDoc {
            doc_id: doc_id.clone(),
            size_bytes: *size,
        })
        .collect();
    heavy.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    heavy.truncate(top_n);

    let missing_export = staging_docs
        .keys()
        .filter(|doc| !export_docs.contains_key(*doc))
        .cloned()
        .collect();
    let missing_source = export_docs
        .keys()
        .filter(|doc| !staging_docs.contains_key(*doc))
        .cloned()
        .collect();

    StorageSnapshot {
        root: settings.data_root.clone(),
        directories,
        heavy_docs: heavy,
        orphans: Orphans {
            missing_export,
            missing_source,
        },
    }
}

#[derive(Debug, Default)]
struct DirUsage {
    size_bytes: u64,
    file_count: u64,
    oldest_secs: Option<i64>,
    newest_secs: Option<i64>,
}

fn dir_usage(path: &Path) -> DirUsage {
    let mut usage = DirUsage::default();
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                stack.push(entry_path);
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            usage.size_bytes += metadata.len();
            usage.file_count += 1;
            if let Some(secs) = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
            {
                usage.oldest_secs = Some(usage.oldest_secs.map_or(secs, |old| old.min(secs)));
                usage.newest_secs = Some(usage.newest_secs.map_or(secs, |new| new.max(secs)));
            }
        }
    }
    usage
}

/// Sizes of per-document directories directly under `base`. With a
/// prefix, only matching directories count and the prefix is stripped
/// from the reported id.
fn doc_sizes(base: &Path, prefix: Option<&str>) -> BTreeMap<String, u64> {
    let mut sizes = BTreeMap::new();
    let Ok(entries) = fs::read_dir(base) else {
        return sizes;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let doc_id = match prefix {
            Some(prefix) => match name.strip_prefix(prefix) {
                Some(stripped) => stripped.to_string(),
                None => continue,
            },
            None => name.to_string(),
        };
        sizes.insert(doc_id, dir_usage(&path).size_bytes);
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn orphans_are_reported_both_ways() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::for_root(dir.path());
        fs::create_dir_all(settings.staging_dir().join("doc-a")).expect("staging a");
        fs::create_dir_all(settings.staging_dir().join("doc-b")).expect("staging b");
        fs::create_dir_all(settings.rag_output_dir().join("RAG-doc-b")).expect("export b");
        fs::create_dir_all(settings.rag_output_dir().join("RAG-doc-c")).expect("export c");

        let snapshot = collect_storage_snapshot(&settings, 5);
        assert_eq!(snapshot.orphans.missing_export, vec!["doc-a".to_string()]);
        assert_eq!(snapshot.orphans.missing_source, vec!["doc-c".to_string()]);
    }

    #[test]
    fn heavy_docs_are_sorted_and_truncated() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::for_root(dir.path());
        for (doc, bytes) in [("doc-a", 10usize), ("doc-b", 300), ("doc-c", 50)] {
            let doc_dir = settings.staging_dir().join(doc);
            fs::create_dir_all(&doc_dir).expect("doc dir");
            fs::write(doc_dir.join("blob.bin"), vec![0u8; bytes]).expect("blob");
        }

        let snapshot = collect_storage_snapshot(&settings, 2);
        assert_eq!(snapshot.heavy_docs.len(), 2);
        assert_eq!(snapshot.heavy_docs[0].doc_id, "doc-b");
        assert_eq!(snapshot.heavy_docs[1].doc_id, "doc-c");
    }

    #[test]
    fn health_degrades_when_paths_are_missing() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::for_root(dir.path());
        settings.bootstrap().expect("bootstrap");
        let store = JobStore::open(&settings.jobs_db_path).expect("store");

        let report = run_health_checks(&settings, &store);
        assert_eq!(report.status, "degraded");
        assert!(report
            .checks
            .iter()
            .any(|check| check.name == "runner_path" && !check.ok));
        assert!(report
            .checks
            .iter()
            .any(|check| check.name == "jobs_db" && check.ok));
    }
}
