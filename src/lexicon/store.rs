use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::{
    chosen_source, file_fingerprint, normalize_rules, LexiconError, Rule, RuleSet, Stamp,
    MAX_SERIALIZED_BYTES,
};
use crate::resolver::DocPaths;
use crate::shared::fs_atomic::{atomic_write_file, backup_then_replace};
use crate::shared::time::utc_now_iso;

#[derive(Debug, Clone)]
pub struct SuggestedRules {
    pub rules: Vec<Rule>,
    /// Revision token of the rule-set state at read time, covering both
    /// the suggested and the validated file. `None` when neither exists.
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Written {
        rule_count: usize,
        /// Token for the post-write rule-set state, usable for a follow-up
        /// write without re-reading.
        revision_fingerprint: String,
    },
    /// The suggested file changed since the caller read it; nothing was
    /// written.
    Conflict {
        expected: Option<String>,
        current: Option<String>,
    },
}

/// Reads and writes the per-document rule sets. Writes are optimistic:
/// the caller presents the fingerprint it read the suggested rules under,
/// and loses if a fresher scan landed in between.
#[derive(Debug, Default)]
pub struct LexiconStore {
    // Serializes the check-then-write of every validated write; two
    // concurrent writers with the same stale fingerprint must not both win.
    write_gate: Mutex<()>,
}

impl LexiconStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_suggested(&self, paths: &DocPaths) -> Result<SuggestedRules, LexiconError> {
        let rules = match paths.suggested_rules().filter(|p| p.is_file()) {
            Some(suggested) => read_rule_file(&suggested)?,
            None => Vec::new(),
        };
        Ok(SuggestedRules {
            fingerprint: revision_fingerprint(paths),
            rules,
        })
    }

    pub fn read_validated(&self, paths: &DocPaths) -> Result<Vec<Rule>, LexiconError> {
        match paths.validated_rules().filter(|p| p.is_file()) {
            Some(path) => read_rule_file(&path),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_stamp(&self, paths: &DocPaths) -> Option<Stamp> {
        let path = paths.stamp_path()?;
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Persist a validated rule set. The fingerprint check and the write
    /// form one critical section; on success the previous validated file
    /// (if any) survives as a timestamped backup and the stamp records the
    /// chosen source artifact's content hash.
    pub fn write_validated(
        &self,
        paths: &DocPaths,
        rules: &[Rule],
        expected_fingerprint: Option<&str>,
    ) -> Result<WriteOutcome, LexiconError> {
        let doc_id = paths.doc_id.to_string();
        let work_dir = paths
            .work_dir
            .as_ref()
            .ok_or_else(|| LexiconError::MissingWorkDir(doc_id.clone()))?;
        let (source_name, source_path) =
            chosen_source(work_dir).ok_or_else(|| LexiconError::NoSourceArtifact(doc_id.clone()))?;

        let normalized = normalize_rules(rules)?;
        let payload = RuleSet {
            version: 1,
            doc_id: doc_id.clone(),
            rules: normalized.clone(),
        };
        let serialized = serde_yaml::to_string(&payload).map_err(LexiconError::Serialize)?;
        if serialized.len() > MAX_SERIALIZED_BYTES {
            return Err(LexiconError::Oversize(serialized.len()));
        }

        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());

        let current = revision_fingerprint(paths);
        if expected_fingerprint != current.as_deref() {
            return Ok(WriteOutcome::Conflict {
                expected: expected_fingerprint.map(str::to_string),
                current,
            });
        }

        let validated_path = work_dir.join(crate::resolver::VALIDATED_RULES_FILE);
        let backup = backup_then_replace(&validated_path, serialized.as_bytes()).map_err(
            |source| LexiconError::Io {
                path: validated_path.display().to_string(),
                source,
            },
        )?;

        let source_hash = file_fingerprint(&source_path)
            .ok_or_else(|| LexiconError::NoSourceArtifact(doc_id.clone()))?;
        let stamp = Stamp {
            doc_id,
            source_file_name: source_name,
            source_content_hash: source_hash,
            rule_count: normalized.len(),
            updated_at: utc_now_iso(),
        };
        let stamp_path = work_dir.join(crate::resolver::STAMP_FILE);
        let stamp_bytes =
            serde_json::to_vec_pretty(&stamp).expect("stamp serialization cannot fail");
        if let Err(source) = atomic_write_file(&stamp_path, &stamp_bytes) {
            // The validated file is already in place; without its stamp it
            // would read as stale, so roll back to the previous content.
            if let Some(backup_path) = backup.as_ref() {
                let _ = fs::copy(backup_path, &validated_path);
                return Err(LexiconError::RolledBack {
                    backup: backup_path.display().to_string(),
                    reason: source.to_string(),
                });
            }
            let _ = fs::remove_file(&validated_path);
            return Err(LexiconError::Io {
                path: stamp_path.display().to_string(),
                source,
            });
        }

        Ok(WriteOutcome::Written {
            rule_count: normalized.len(),
            revision_fingerprint: revision_fingerprint(paths).unwrap_or_default(),
        })
    }
}

/// Revision token for the rule-set state: a hash over the suggested and
/// validated files together. Any accepted write moves it, so a caller
/// holding a pre-write token always conflicts.
fn revision_fingerprint(paths: &DocPaths) -> Option<String> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    let mut any = false;
    for path in [paths.suggested_rules(), paths.validated_rules()]
        .into_iter()
        .flatten()
    {
        if let Ok(bytes) = fs::read(&path) {
            hasher.update(&bytes);
            any = true;
        }
    }
    any.then(|| super::hex_digest(&hasher.finalize()))
}

fn read_rule_file(path: &Path) -> Result<Vec<Rule>, LexiconError> {
    let raw = fs::read_to_string(path).map_err(|source| LexiconError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let payload: RuleSet = serde_yaml::from_str(&raw).map_err(|source| LexiconError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(payload.rules)
}
