pub mod store;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use store::{LexiconStore, SuggestedRules, WriteOutcome};

pub const MAX_RULES: usize = 500;
pub const MAX_SERIALIZED_BYTES: usize = 200_000;
pub const MAX_PATTERN_BYTES: usize = 512;

/// Source artifacts a rule set may be derived from, best tier first.
pub const SOURCE_PRIORITY: [&str; 3] = ["05_polished.json", "04_cleaned.json", "02_merged_raw.json"];

#[derive(Debug, thiserror::Error)]
pub enum LexiconError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rule file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize rule set: {0}")]
    Serialize(#[source] serde_yaml::Error),
    #[error("rule {index} is invalid: {reason}")]
    InvalidRule { index: usize, reason: String },
    #[error("too many rules ({0}, max {MAX_RULES})")]
    TooManyRules(usize),
    #[error("rule set too large ({0} bytes, max {MAX_SERIALIZED_BYTES})")]
    Oversize(usize),
    #[error("document `{0}` has no working directory")]
    MissingWorkDir(String),
    #[error("document `{0}` has no source artifact to stamp against")]
    NoSourceArtifact(String),
    #[error("validated write failed, previous file restored from {backup}: {reason}")]
    RolledBack { backup: String, reason: String },
}

/// One correction rule. Plain data; validated before acceptance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// On-disk payload for both the suggested and the validated rule files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSet {
    #[serde(default = "default_ruleset_version")]
    pub version: u32,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_ruleset_version() -> u32 {
    1
}

/// Audit record tying the validated rule set to the exact source artifact
/// content it was reviewed against.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Stamp {
    pub doc_id: String,
    pub source_file_name: String,
    pub source_content_hash: String,
    pub rule_count: usize,
    pub updated_at: String,
}

/// Validate, dedup by (pattern, replacement) and sort a rule list.
/// Rejects uncompilable or oversized patterns before anything is written.
pub fn normalize_rules(rules: &[Rule]) -> Result<Vec<Rule>, LexiconError> {
    if rules.len() > MAX_RULES {
        return Err(LexiconError::TooManyRules(rules.len()));
    }
    let mut seen: std::collections::BTreeMap<(String, String), Rule> = Default::default();
    for (index, rule) in rules.iter().enumerate() {
        let pattern = rule.pattern.trim();
        if pattern.is_empty() {
            return Err(LexiconError::InvalidRule {
                index,
                reason: "pattern is empty".to_string(),
            });
        }
        if pattern.len() > MAX_PATTERN_BYTES {
            return Err(LexiconError::InvalidRule {
                index,
                reason: format!("pattern exceeds {MAX_PATTERN_BYTES} bytes"),
            });
        }
        if let Err(err) = regex::Regex::new(pattern) {
            return Err(LexiconError::InvalidRule {
                index,
                reason: format!("pattern does not compile: {err}"),
            });
        }
        let key = (pattern.to_string(), rule.replacement.clone());
        seen.insert(
            key,
            Rule {
                pattern: pattern.to_string(),
                replacement: rule.replacement.clone(),
                confidence: rule.confidence,
                evidence: rule.evidence.clone(),
            },
        );
    }
    Ok(seen.into_values().collect())
}

/// SHA-256 hex of a file's bytes; `None` when the file is absent.
pub fn file_fingerprint(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex_digest(&hasher.finalize()))
}

/// Best existing source artifact in the working directory, by tier.
pub fn chosen_source(work_dir: &Path) -> Option<(String, PathBuf)> {
    SOURCE_PRIORITY.iter().find_map(|name| {
        let path = work_dir.join(name);
        path.is_file().then(|| (name.to_string(), path))
    })
}

pub(crate) fn hex_digest(digest: &[u8]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, replacement: &str) -> Rule {
        Rule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            confidence: None,
            evidence: Vec::new(),
        }
    }

    #[test]
    fn normalize_dedups_and_sorts() {
        let rules = vec![rule("zebra", "z"), rule("alpha", "a"), rule("zebra", "z")];
        let normalized = normalize_rules(&rules).expect("normalize");
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].pattern, "alpha");
        assert_eq!(normalized[1].pattern, "zebra");
    }

    #[test]
    fn normalize_rejects_bad_patterns() {
        assert!(matches!(
            normalize_rules(&[rule("", "x")]),
            Err(LexiconError::InvalidRule { index: 0, .. })
        ));
        assert!(matches!(
            normalize_rules(&[rule("(unclosed", "x")]),
            Err(LexiconError::InvalidRule { index: 0, .. })
        ));
    }

    #[test]
    fn normalize_bounds_rule_count() {
        let rules: Vec<Rule> = (0..MAX_RULES + 1)
            .map(|i| rule(&format!("p{i}"), "r"))
            .collect();
        assert!(matches!(
            normalize_rules(&rules),
            Err(LexiconError::TooManyRules(_))
        ));
    }
}
