use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A named argument preset for one action family. `args` is appended to
/// the pre-validated command template verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileEntry {
    pub label: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfilesConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub asr: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub lexicon: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub rag: BTreeMap<String, ProfileEntry>,
}

fn default_version() -> u32 {
    1
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        let mut asr = BTreeMap::new();
        asr.insert(
            "default".to_string(),
            ProfileEntry {
                label: "ASR default".to_string(),
                args: Vec::new(),
            },
        );
        asr.insert(
            "talkshow".to_string(),
            ProfileEntry {
                label: "ASR talkshow".to_string(),
                args: vec!["--profile".to_string(), "talkshow".to_string()],
            },
        );
        let mut lexicon = BTreeMap::new();
        lexicon.insert(
            "default".to_string(),
            ProfileEntry {
                label: "Lexicon standard".to_string(),
                args: Vec::new(),
            },
        );
        let mut rag = BTreeMap::new();
        rag.insert(
            "default".to_string(),
            ProfileEntry {
                label: "RAG default".to_string(),
                args: Vec::new(),
            },
        );
        rag.insert(
            "nas".to_string(),
            ProfileEntry {
                label: "RAG NAS".to_string(),
                args: vec!["--version-tag".to_string(), "nas_v1".to_string()],
            },
        );
        Self {
            version: 1,
            asr,
            lexicon,
            rag,
        }
    }
}

/// Load presets from a YAML file. A missing or unparseable file falls back
/// to the built-in defaults, as does any group left empty.
pub fn load_profiles(path: &Path) -> ProfilesConfig {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return ProfilesConfig::default(),
    };
    let mut config: ProfilesConfig = match serde_yaml::from_str(&raw) {
        Ok(config) => config,
        Err(_) => return ProfilesConfig::default(),
    };
    let defaults = ProfilesConfig::default();
    if config.asr.is_empty() {
        config.asr = defaults.asr;
    }
    if config.lexicon.is_empty() {
        config.lexicon = defaults.lexicon;
    }
    if config.rag.is_empty() {
        config.rag = defaults.rag;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = load_profiles(&dir.path().join("absent.yaml"));
        assert!(config.asr.contains_key("default"));
        assert!(config.rag.contains_key("nas"));
    }

    #[test]
    fn partial_file_backfills_empty_groups() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.yaml");
        fs::write(
            &path,
            "version: 2\nasr:\n  fast:\n    label: Fast pass\n    args: [\"--fast\"]\n",
        )
        .expect("write profiles");

        let config = load_profiles(&path);
        assert_eq!(config.version, 2);
        assert_eq!(
            config.asr.get("fast").expect("fast profile").args,
            vec!["--fast".to_string()]
        );
        assert!(config.lexicon.contains_key("default"));
    }

    #[test]
    fn unparseable_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.yaml");
        fs::write(&path, "asr: [unclosed").expect("write garbage");
        let config = load_profiles(&path);
        assert_eq!(config, ProfilesConfig::default());
    }
}
