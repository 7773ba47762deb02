use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: expected a positive integer")]
    InvalidNumber { var: String, value: String },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub const DEFAULT_MAX_WORKERS: usize = 2;
pub const DEFAULT_PREVIEW_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_PREVIEW_EXCERPT_CHARS: usize = 1200;

/// Runtime settings for the console. Everything below `data_root` follows
/// the fixed tier layout of the shared pipeline volume.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_root: PathBuf,
    pub runner_path: PathBuf,
    pub jobs_db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub profiles_path: PathBuf,
    pub max_workers: usize,
    pub preview_timeout_ms: u64,
    pub preview_excerpt_chars: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_root = env_path("PIPEDECK_DATA_ROOT").unwrap_or_else(|| PathBuf::from("data"));
        let runner_path =
            env_path("PIPEDECK_RUNNER").unwrap_or_else(|| PathBuf::from("bin/run.sh"));
        let state_dir = env_path("PIPEDECK_STATE_DIR").unwrap_or_else(|| PathBuf::from("state"));
        let jobs_db_path =
            env_path("PIPEDECK_JOBS_DB").unwrap_or_else(|| state_dir.join("jobs.db"));
        let logs_dir = env_path("PIPEDECK_LOG_DIR").unwrap_or_else(|| state_dir.join("job_logs"));
        let profiles_path =
            env_path("PIPEDECK_PROFILES").unwrap_or_else(|| state_dir.join("profiles.yaml"));
        let max_workers = env_usize("PIPEDECK_MAX_WORKERS", DEFAULT_MAX_WORKERS)?;
        let preview_timeout_ms =
            env_u64("PIPEDECK_PREVIEW_TIMEOUT_MS", DEFAULT_PREVIEW_TIMEOUT_MS)?;

        Ok(Self {
            data_root,
            runner_path,
            jobs_db_path,
            logs_dir,
            profiles_path,
            max_workers: max_workers.max(1),
            preview_timeout_ms,
            preview_excerpt_chars: DEFAULT_PREVIEW_EXCERPT_CHARS,
        })
    }

    /// Settings rooted under a single directory. Used by tests and by
    /// embedders that manage their own layout.
    pub fn for_root(root: &Path) -> Self {
        Self {
            data_root: root.join("data"),
            runner_path: root.join("bin/run.sh"),
            jobs_db_path: root.join("state/jobs.db"),
            logs_dir: root.join("state/job_logs"),
            profiles_path: root.join("state/profiles.yaml"),
            max_workers: DEFAULT_MAX_WORKERS,
            preview_timeout_ms: DEFAULT_PREVIEW_TIMEOUT_MS,
            preview_excerpt_chars: DEFAULT_PREVIEW_EXCERPT_CHARS,
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_root.join("02_output_source").join("asr")
    }

    pub fn rag_output_dir(&self) -> PathBuf {
        self.data_root.join("03_output_RAG")
    }

    pub fn rag_doc_dir(&self, doc_id: &str) -> PathBuf {
        self.rag_output_dir().join(format!("RAG-{doc_id}"))
    }

    pub fn input_audio_dir(&self) -> PathBuf {
        self.data_root.join("01_input").join("audio")
    }

    pub fn input_video_dir(&self) -> PathBuf {
        self.data_root.join("01_input").join("video")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_root.join("04_archive")
    }

    /// Create the local state directories the console writes to. The data
    /// root itself is owned by the pipeline and never created here.
    pub fn bootstrap(&self) -> Result<(), ConfigError> {
        for dir in [
            self.logs_dir.as_path(),
            self.jobs_db_path.parent().unwrap_or(Path::new(".")),
        ] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

fn env_usize(var: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tier_paths_hang_off_the_data_root() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::for_root(dir.path());
        assert_eq!(
            settings.staging_dir(),
            dir.path().join("data/02_output_source/asr")
        );
        assert_eq!(
            settings.rag_doc_dir("board-2024"),
            dir.path().join("data/03_output_RAG/RAG-board-2024")
        );
    }

    #[test]
    fn bootstrap_creates_state_directories() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::for_root(dir.path());
        settings.bootstrap().expect("bootstrap");
        assert!(settings.logs_dir.is_dir());
        assert!(settings.jobs_db_path.parent().expect("parent").is_dir());
    }
}
