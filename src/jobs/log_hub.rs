use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

pub const TAIL_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(String),
    /// Terminal marker: the job reached a terminal status, no more lines
    /// will follow.
    Closed,
}

#[derive(Debug)]
struct JobChannel {
    log_path: PathBuf,
    subscribers: Vec<Sender<LogEvent>>,
    tail: VecDeque<String>,
    closed: bool,
}

/// Per-job transcript fan-out. Persisting a line and broadcasting it
/// happen under the same per-job lock that a subscriber takes while
/// snapshotting the file, so a late subscriber sees the full transcript
/// exactly once: everything already persisted via the snapshot, then only
/// live lines.
#[derive(Debug, Default)]
pub struct LogHub {
    channels: Mutex<HashMap<i64, Arc<Mutex<JobChannel>>>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel and the (empty) transcript file for a job.
    pub fn register(&self, job_id: i64, log_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(log_path)?;
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.insert(
            job_id,
            Arc::new(Mutex::new(JobChannel {
                log_path: log_path.to_path_buf(),
                subscribers: Vec::new(),
                tail: VecDeque::new(),
                closed: false,
            })),
        );
        Ok(())
    }

    pub fn publish(&self, job_id: i64, line: &str) {
        let Some(channel) = self.channel(job_id) else {
            return;
        };
        let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
        if channel.closed {
            return;
        }
        let _ = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&channel.log_path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if channel.tail.len() == TAIL_CAPACITY {
            channel.tail.pop_front();
        }
        channel.tail.push_back(line.to_string());
        channel
            .subscribers
            .retain(|tx| tx.send(LogEvent::Line(line.to_string())).is_ok());
    }

    pub fn close(&self, job_id: i64) {
        let Some(channel) = self.channel(job_id) else {
            return;
        };
        let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
        channel.closed = true;
        for tx in channel.subscribers.drain(..) {
            let _ = tx.send(LogEvent::Closed);
        }
    }

    /// Snapshot of the persisted transcript plus a receiver for what
    /// follows. On an already-closed channel the receiver yields `Closed`
    /// immediately. `None` when the job was never registered in this
    /// process (history from a previous run).
    pub fn subscribe(&self, job_id: i64) -> Option<(String, Receiver<LogEvent>)> {
        let channel = self.channel(job_id)?;
        let mut channel = channel.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = fs::read_to_string(&channel.log_path).unwrap_or_default();
        let (tx, rx) = std::sync::mpsc::channel();
        if channel.closed {
            let _ = tx.send(LogEvent::Closed);
        } else {
            channel.subscribers.push(tx);
        }
        Some((snapshot, rx))
    }

    /// Recent lines, newest last. Used for failure classification.
    pub fn tail(&self, job_id: i64) -> String {
        let Some(channel) = self.channel(job_id) else {
            return String::new();
        };
        let channel = channel.lock().unwrap_or_else(|e| e.into_inner());
        channel
            .tail
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn channel(&self, job_id: i64) -> Option<Arc<Mutex<JobChannel>>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(&job_id).cloned()
    }
}
