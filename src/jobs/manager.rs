use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::scheduler::{derive_admission_key, AdmissionKey, AdmissionQueue};
use super::{
    classify, Classification, FailureKind, JobAction, JobCreate, JobError, JobRecord, JobStatus,
    JobStore, LogEvent, LogHub,
};
use crate::config::Settings;
use crate::shared::logging::append_console_log;
use crate::shared::time::now_millis;

const SCHEDULER_TICK: Duration = Duration::from_millis(100);
const CHILD_POLL: Duration = Duration::from_millis(50);
const CANCEL_GRACE: Duration = Duration::from_secs(5);
pub const LOG_READ_MAX_BYTES: usize = 200_000;
pub const CLASSIFY_TAIL_BYTES: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    pub locked: bool,
    pub job_id: Option<i64>,
    pub action: Option<JobAction>,
}

impl LockState {
    fn free() -> Self {
        Self {
            locked: false,
            job_id: None,
            action: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub record: JobRecord,
    /// False when the job was already terminal and the request was a
    /// no-op.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy)]
struct LockOwner {
    job_id: i64,
    action: JobAction,
}

enum SchedulerMsg {
    Submit { job_id: i64, key: AdmissionKey },
    Cancel { job_id: i64 },
    Finished { job_id: i64, key: AdmissionKey },
    Shutdown,
}

/// The single scheduling authority. Admission, per-document exclusion and
/// the worker cap all live on one scheduler thread; every mutation of
/// lock ownership goes through its mailbox.
pub struct JobManager {
    settings: Settings,
    store: JobStore,
    hub: Arc<LogHub>,
    tx: Sender<SchedulerMsg>,
    lock_view: Arc<Mutex<HashMap<String, LockOwner>>>,
}

impl JobManager {
    pub fn new(settings: Settings) -> Result<Self, JobError> {
        let store = JobStore::open(&settings.jobs_db_path)?;
        for (job_id, status) in store.reconcile_interrupted()? {
            append_console_log(
                &settings.logs_dir,
                "warn",
                "jobs.reconciled",
                &format!("job={job_id} status={status}"),
            );
        }

        let hub = Arc::new(LogHub::new());
        let lock_view = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel();

        let mut scheduler = SchedulerLoop {
            rx,
            worker_tx: tx.clone(),
            store: store.clone(),
            hub: hub.clone(),
            settings: settings.clone(),
            lock_view: lock_view.clone(),
            queue: AdmissionQueue::default(),
            in_flight: 0,
            cancel_flags: HashMap::new(),
        };
        thread::spawn(move || scheduler.run());

        Ok(Self {
            settings,
            store,
            hub,
            tx,
            lock_view,
        })
    }

    /// Admit a job: persist it as `queued`, open its transcript, hand it
    /// to the scheduler. Returns the stored record.
    pub fn submit(&self, payload: JobCreate) -> Result<JobRecord, JobError> {
        static LOG_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);
        let log_path = self
            .settings
            .logs_dir
            .join(format!("job_{}_{seq}.log", now_millis()));
        let job_id = self.store.insert(&payload, &log_path)?;
        self.hub
            .register(job_id, &log_path)
            .map_err(|source| JobError::Io {
                path: log_path.display().to_string(),
                source,
            })?;
        let key = derive_admission_key(job_id, payload.doc_id.as_deref(), payload.requires_write_lock);
        self.tx
            .send(SchedulerMsg::Submit { job_id, key })
            .map_err(|_| JobError::SchedulerUnavailable)?;
        append_console_log(
            &self.settings.logs_dir,
            "info",
            "jobs.submitted",
            &format!(
                "job={job_id} action={} doc={}",
                payload.action,
                payload.doc_id.as_deref().unwrap_or("-")
            ),
        );
        self.store
            .get(job_id)?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Request cancellation. Idempotent: a terminal job is returned
    /// unchanged. For live jobs the transition is asynchronous; callers
    /// observe it through the record.
    pub fn cancel(&self, job_id: i64) -> Result<CancelOutcome, JobError> {
        let record = self.store.get(job_id)?.ok_or(JobError::NotFound(job_id))?;
        if record.status.is_terminal() {
            return Ok(CancelOutcome {
                record,
                changed: false,
            });
        }
        self.tx
            .send(SchedulerMsg::Cancel { job_id })
            .map_err(|_| JobError::SchedulerUnavailable)?;
        let record = self.store.get(job_id)?.ok_or(JobError::NotFound(job_id))?;
        Ok(CancelOutcome {
            record,
            changed: true,
        })
    }

    pub fn get(&self, job_id: i64) -> Result<Option<JobRecord>, JobError> {
        Ok(self.store.get(job_id)?)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, JobError> {
        Ok(self.store.list(limit)?)
    }

    pub fn last_for_doc(
        &self,
        doc_id: &str,
        actions: Option<&[JobAction]>,
    ) -> Result<Option<JobRecord>, JobError> {
        Ok(self.store.last_for_doc(doc_id, actions)?)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Bounded tail of a job's persisted transcript.
    pub fn read_log(&self, job_id: i64, max_bytes: usize) -> Result<String, JobError> {
        let Some(record) = self.store.get(job_id)? else {
            return Ok(String::new());
        };
        let Ok(data) = fs::read_to_string(&record.log_path) else {
            return Ok(String::new());
        };
        if data.len() <= max_bytes {
            return Ok(data);
        }
        let cut = data.len() - max_bytes;
        let safe = data
            .char_indices()
            .map(|(idx, _)| idx)
            .find(|idx| *idx >= cut)
            .unwrap_or(0);
        Ok(data[safe..].to_string())
    }

    pub fn log_file_path(&self, job_id: i64) -> Result<Option<PathBuf>, JobError> {
        Ok(self
            .store
            .get(job_id)?
            .map(|record| record.log_path)
            .filter(|path| path.exists()))
    }

    /// Transcript snapshot plus live events. Jobs from a previous process
    /// have no live channel; the snapshot is read from disk and the
    /// receiver closes immediately.
    pub fn subscribe(&self, job_id: i64) -> Result<(String, Receiver<LogEvent>), JobError> {
        if let Some(subscription) = self.hub.subscribe(job_id) {
            return Ok(subscription);
        }
        let record = self.store.get(job_id)?.ok_or(JobError::NotFound(job_id))?;
        let snapshot = fs::read_to_string(&record.log_path).unwrap_or_default();
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(LogEvent::Closed);
        Ok((snapshot, rx))
    }

    pub fn doc_lock_state(&self, doc_id: &str) -> LockState {
        let owners = self.lock_view.lock().unwrap_or_else(|e| e.into_inner());
        match owners.get(doc_id) {
            Some(owner) => LockState {
                locked: true,
                job_id: Some(owner.job_id),
                action: Some(owner.action),
            },
            None => LockState::free(),
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        let _ = self.tx.send(SchedulerMsg::Shutdown);
    }
}

struct SchedulerLoop {
    rx: Receiver<SchedulerMsg>,
    worker_tx: Sender<SchedulerMsg>,
    store: JobStore,
    hub: Arc<LogHub>,
    settings: Settings,
    lock_view: Arc<Mutex<HashMap<String, LockOwner>>>,
    queue: AdmissionQueue,
    in_flight: usize,
    cancel_flags: HashMap<i64, Arc<AtomicBool>>,
}

impl SchedulerLoop {
    fn run(&mut self) {
        loop {
            match self.rx.recv_timeout(SCHEDULER_TICK) {
                Ok(SchedulerMsg::Submit { job_id, key }) => self.queue.enqueue(key, job_id),
                Ok(SchedulerMsg::Cancel { job_id }) => self.handle_cancel(job_id),
                Ok(SchedulerMsg::Finished { job_id, key }) => self.handle_finished(job_id, &key),
                Ok(SchedulerMsg::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.admit_runnable();
        }
    }

    fn handle_cancel(&mut self, job_id: i64) {
        if let Some(flag) = self.cancel_flags.get(&job_id) {
            flag.store(true, Ordering::Relaxed);
            return;
        }
        if self.queue.remove_pending(job_id) {
            let _ = self.store.finalize(
                job_id,
                JobStatus::Canceled,
                None,
                FailureKind::None,
                Some("Canceled before start."),
                None,
            );
            self.hub
                .publish(job_id, &format!("[console] job {job_id} canceled before start"));
            self.hub.close(job_id);
            append_console_log(
                &self.settings.logs_dir,
                "info",
                "jobs.canceled.queued",
                &format!("job={job_id}"),
            );
        }
        // Neither running nor pending: the job finished in the meantime;
        // cancellation of a terminal job is a no-op.
    }

    fn handle_finished(&mut self, job_id: i64, key: &AdmissionKey) {
        self.queue.complete(key);
        self.in_flight = self.in_flight.saturating_sub(1);
        self.cancel_flags.remove(&job_id);
        if let Some(lock_key) = key.lock_key() {
            let mut owners = self.lock_view.lock().unwrap_or_else(|e| e.into_inner());
            owners.remove(lock_key);
        }
    }

    fn admit_runnable(&mut self) {
        let available = self.settings.max_workers.saturating_sub(self.in_flight);
        if available == 0 {
            return;
        }
        for pending in self.queue.dequeue_runnable(available) {
            self.in_flight += 1;
            let cancel = Arc::new(AtomicBool::new(false));
            self.cancel_flags.insert(pending.job_id, cancel.clone());
            if let Some(lock_key) = pending.key.lock_key() {
                if let Ok(Some(record)) = self.store.get(pending.job_id) {
                    let mut owners = self.lock_view.lock().unwrap_or_else(|e| e.into_inner());
                    owners.insert(
                        lock_key.to_string(),
                        LockOwner {
                            job_id: pending.job_id,
                            action: record.action,
                        },
                    );
                }
            }
            let worker = JobWorker {
                store: self.store.clone(),
                hub: self.hub.clone(),
                settings: self.settings.clone(),
                job_id: pending.job_id,
                cancel,
            };
            let done_tx = self.worker_tx.clone();
            let key = pending.key.clone();
            let job_id = pending.job_id;
            thread::spawn(move || {
                worker.run();
                let _ = done_tx.send(SchedulerMsg::Finished { job_id, key });
            });
        }
    }
}

struct JobWorker {
    store: JobStore,
    hub: Arc<LogHub>,
    settings: Settings,
    job_id: i64,
    cancel: Arc<AtomicBool>,
}

impl JobWorker {
    fn run(&self) {
        let job_id = self.job_id;
        let Ok(Some(job)) = self.store.get(job_id) else {
            return;
        };
        if self.cancel.load(Ordering::Relaxed) {
            let _ = self.store.finalize(
                job_id,
                JobStatus::Canceled,
                None,
                FailureKind::None,
                Some("Canceled before start."),
                None,
            );
            self.hub.close(job_id);
            return;
        }

        if self.store.mark_running(job_id).is_err() {
            return;
        }
        let started = Instant::now();
        if job.argv.is_empty() {
            self.hub
                .publish(job_id, "[console] refusing to run an empty command line");
            self.finalize_with_tail(JobStatus::Fail, None, started);
            return;
        }
        self.hub.publish(
            job_id,
            &format!("[console] job {job_id} started: {}", job.action),
        );

        let mut command = Command::new(&job.argv[0]);
        command
            .args(&job.argv[1..])
            .env("PIPEDECK_DATA_ROOT", &self.settings.data_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = job.cwd.as_ref().filter(|p| p.is_dir()) {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.hub.publish(
                    job_id,
                    &format!("[console] failed to spawn `{}`: {err}", job.argv[0]),
                );
                self.finalize_with_tail(JobStatus::Fail, None, started);
                return;
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout, ""));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr, "[stderr] "));
        }

        let pid = child.id();
        let mut signaled_at: Option<Instant> = None;
        let mut force_killed = false;
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if self.cancel.load(Ordering::Relaxed) {
                        match signaled_at {
                            None => {
                                self.hub.publish(
                                    job_id,
                                    "[console] cancel requested, sending SIGTERM",
                                );
                                send_term_signal(pid, &mut child);
                                signaled_at = Some(Instant::now());
                            }
                            Some(at) if at.elapsed() > CANCEL_GRACE && !force_killed => {
                                self.hub.publish(
                                    job_id,
                                    "[console] grace period elapsed, force killing",
                                );
                                let _ = child.kill();
                                force_killed = true;
                            }
                            _ => {}
                        }
                    }
                    thread::sleep(CHILD_POLL);
                }
                Err(_) => break None,
            }
        };
        for reader in readers {
            let _ = reader.join();
        }

        let canceled = self.cancel.load(Ordering::Relaxed);
        let exit_code = exit_status.and_then(|status| status.code());
        let success = exit_status.map(|status| status.success()).unwrap_or(false);
        let status = if success {
            JobStatus::Success
        } else if canceled {
            JobStatus::Canceled
        } else {
            JobStatus::Fail
        };
        self.finalize_with_tail(status, exit_code, started);
    }

    fn spawn_reader<R: std::io::Read + Send + 'static>(
        &self,
        stream: R,
        prefix: &'static str,
    ) -> thread::JoinHandle<()> {
        let hub = self.hub.clone();
        let job_id = self.job_id;
        thread::spawn(move || {
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if prefix.is_empty() {
                    hub.publish(job_id, &line);
                } else {
                    hub.publish(job_id, &format!("{prefix}{line}"));
                }
            }
        })
    }

    fn finalize_with_tail(&self, status: JobStatus, exit_code: Option<i32>, started: Instant) {
        let job_id = self.job_id;
        let classification = match status {
            JobStatus::Success => Classification::none(),
            JobStatus::Canceled => Classification {
                kind: FailureKind::None,
                hint: Some("Canceled by operator.".to_string()),
            },
            _ => {
                let mut tail = self.hub.tail(job_id);
                if tail.len() > CLASSIFY_TAIL_BYTES {
                    let cut = tail.len() - CLASSIFY_TAIL_BYTES;
                    let safe = tail
                        .char_indices()
                        .map(|(idx, _)| idx)
                        .find(|idx| *idx >= cut)
                        .unwrap_or(0);
                    tail = tail[safe..].to_string();
                }
                classify(exit_code, &tail)
            }
        };
        let duration_ms = started.elapsed().as_millis() as i64;
        let _ = self.store.finalize(
            job_id,
            status,
            exit_code,
            classification.kind,
            classification.hint.as_deref(),
            Some(duration_ms),
        );
        self.hub.publish(
            job_id,
            &format!(
                "[console] job {job_id} finished: {status} (exit {})",
                exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
            ),
        );
        self.hub.close(job_id);
        append_console_log(
            &self.settings.logs_dir,
            "info",
            "jobs.finished",
            &format!("job={job_id} status={status}"),
        );
    }
}

#[cfg(unix)]
fn send_term_signal(pid: u32, _child: &mut std::process::Child) {
    let _ = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn send_term_signal(_pid: u32, child: &mut std::process::Child) {
    let _ = child.kill();
}
