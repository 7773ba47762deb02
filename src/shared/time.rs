use chrono::{SecondsFormat, Utc};

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Timestamp fragment used in backup file names, sortable lexically.
pub fn backup_suffix() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}
