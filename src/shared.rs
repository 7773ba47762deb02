pub mod fs_atomic;
pub mod logging;
pub mod time;

pub use fs_atomic::{atomic_write_file, backup_then_replace};
pub use logging::append_console_log;
pub use time::{backup_suffix, now_millis, now_secs, utc_now_iso};
