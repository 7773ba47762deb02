use std::fs;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::Settings;

/// Lock key used by document-less jobs (batch runs over the whole volume).
/// Underscores keep it outside the slug grammar, so it can never collide
/// with a real document id.
pub const GLOBAL_LOCK_KEY: &str = "__global__";

pub const MAX_DOC_ID_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("invalid doc id `{raw}`: {reason}")]
    Invalid { raw: String, reason: String },
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error("doc id `{0}` resolves outside the staging root")]
    OutsideRoot(String),
    #[error("failed to read staging root {path}: {source}")]
    ReadRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opaque document identifier. The grammar (lowercase ASCII alphanumerics
/// and interior hyphens, bounded length) makes path separators, `..`
/// segments and UNC prefixes unrepresentable by construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn parse(raw: &str) -> Result<Self, ResolverError> {
        let invalid = |reason: &str| ResolverError::Invalid {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("must be non-empty"));
        }
        if raw.len() > MAX_DOC_ID_LEN {
            return Err(invalid("too long"));
        }
        if !raw
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        {
            return Err(invalid(
                "must use only lowercase ASCII letters, digits or '-'",
            ));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(invalid("must not start or end with '-'"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|err| D::Error::custom(err.to_string()))
    }
}

/// Validated on-disk locations for one document. The only way to obtain
/// one is through [`resolve`] or [`list_docs`]; no other component may
/// turn caller input into filesystem paths.
#[derive(Debug, Clone)]
pub struct DocPaths {
    pub doc_id: DocId,
    pub root: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub transcript_dir: Option<PathBuf>,
}

pub const SUGGESTED_RULES_FILE: &str = "rag.glossary.suggested.yaml";
pub const VALIDATED_RULES_FILE: &str = "rag.glossary.yaml";
pub const STAMP_FILE: &str = ".lexicon_ok.json";

impl DocPaths {
    pub fn suggested_rules(&self) -> Option<PathBuf> {
        self.work_dir.as_ref().map(|dir| dir.join(SUGGESTED_RULES_FILE))
    }

    pub fn validated_rules(&self) -> Option<PathBuf> {
        self.work_dir.as_ref().map(|dir| dir.join(VALIDATED_RULES_FILE))
    }

    pub fn stamp_path(&self) -> Option<PathBuf> {
        self.work_dir.as_ref().map(|dir| dir.join(STAMP_FILE))
    }
}

/// Translate an external identifier into validated document paths.
/// Resolution is confined to the staging root: even an id that parses
/// cleanly is rejected if it escapes (defense against symlinked staging
/// entries pointing outside the volume).
pub fn resolve(settings: &Settings, raw: &str) -> Result<DocPaths, ResolverError> {
    let doc_id = DocId::parse(raw)?;
    let staging = settings.staging_dir();
    let root = staging.join(doc_id.as_str());
    if !root.is_dir() {
        return Err(ResolverError::NotFound(doc_id.to_string()));
    }
    let canonical_root = fs::canonicalize(&root).map_err(|source| ResolverError::ReadRoot {
        path: root.display().to_string(),
        source,
    })?;
    let canonical_staging =
        fs::canonicalize(&staging).map_err(|source| ResolverError::ReadRoot {
            path: staging.display().to_string(),
            source,
        })?;
    if !canonical_root.starts_with(&canonical_staging) {
        return Err(ResolverError::OutsideRoot(doc_id.to_string()));
    }
    Ok(doc_paths_from_root(doc_id, canonical_root))
}

/// Enumerate every document directory under the staging root. Entries
/// whose names fall outside the slug grammar are skipped, not errors:
/// the volume is shared and may carry unrelated directories.
pub fn list_docs(settings: &Settings) -> Result<Vec<DocPaths>, ResolverError> {
    let staging = settings.staging_dir();
    if !staging.is_dir() {
        return Ok(Vec::new());
    }
    let mut docs = Vec::new();
    let entries = fs::read_dir(&staging).map_err(|source| ResolverError::ReadRoot {
        path: staging.display().to_string(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(doc_id) = DocId::parse(name) else {
            continue;
        };
        docs.push(doc_paths_from_root(doc_id, path));
    }
    docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    Ok(docs)
}

fn doc_paths_from_root(doc_id: DocId, root: PathBuf) -> DocPaths {
    let work_parent = root.join("work");
    let work_dir = if work_parent.is_dir() {
        let preferred = work_parent.join(doc_id.as_str());
        if preferred.is_dir() {
            Some(preferred)
        } else {
            single_child_dir(&work_parent)
        }
    } else {
        None
    };
    let transcript_dir = fs::read_dir(&root)
        .ok()
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("TRANSCRIPT"))
        });
    DocPaths {
        doc_id,
        root,
        work_dir,
        transcript_dir,
    }
}

fn single_child_dir(parent: &Path) -> Option<PathBuf> {
    let mut children = fs::read_dir(parent)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir());
    let first = children.next()?;
    if children.next().is_some() {
        return None;
    }
    Some(first)
}
