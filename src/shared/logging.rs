use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::time::now_secs;

pub fn console_log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join("console.log")
}

/// Append one structured line to the console log. Logging failures are
/// swallowed; the log is diagnostic, never load-bearing.
pub fn append_console_log(logs_dir: &Path, level: &str, event: &str, detail: &str) {
    let path = console_log_path(logs_dir);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let line = format!("{} {level} {event} {detail}\n", now_secs());
    let _ = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
}
