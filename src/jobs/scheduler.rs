use std::collections::{HashSet, VecDeque};

use crate::resolver::GLOBAL_LOCK_KEY;

/// Key a job contends on while admitted. Write jobs share one key per
/// document (or the global key for volume-wide batches), so at most one
/// of them is in flight per key. Read-only jobs get a slot key unique to
/// the job id and therefore never exclude anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdmissionKey {
    DocWrite(String),
    GlobalWrite,
    ReadSlot(i64),
}

impl AdmissionKey {
    /// The lock-map key this admission holds, if it holds one at all.
    pub fn lock_key(&self) -> Option<&str> {
        match self {
            Self::DocWrite(doc) => Some(doc),
            Self::GlobalWrite => Some(GLOBAL_LOCK_KEY),
            Self::ReadSlot(_) => None,
        }
    }
}

pub fn derive_admission_key(
    job_id: i64,
    doc_id: Option<&str>,
    requires_write_lock: bool,
) -> AdmissionKey {
    if !requires_write_lock {
        return AdmissionKey::ReadSlot(job_id);
    }
    match doc_id {
        Some(doc) => AdmissionKey::DocWrite(doc.to_string()),
        None => AdmissionKey::GlobalWrite,
    }
}

#[derive(Debug, Clone)]
pub struct PendingJob {
    pub key: AdmissionKey,
    pub job_id: i64,
}

/// FCFS admission queue with per-key exclusion. Insertion order is the
/// only priority: among jobs contending for the same key, the earliest
/// submission always runs first.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    pending: VecDeque<PendingJob>,
    active_keys: HashSet<AdmissionKey>,
}

impl AdmissionQueue {
    pub fn enqueue(&mut self, key: AdmissionKey, job_id: i64) {
        self.pending.push_back(PendingJob { key, job_id });
    }

    /// Take up to `max_items` runnable jobs: skip any whose key is already
    /// active (or selected this round), keep the rest queued in order.
    pub fn dequeue_runnable(&mut self, max_items: usize) -> Vec<PendingJob> {
        if max_items == 0 || self.pending.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        let mut remaining = VecDeque::new();

        while let Some(item) = self.pending.pop_front() {
            let key_busy = self.active_keys.contains(&item.key);
            if !key_busy && selected.len() < max_items {
                self.active_keys.insert(item.key.clone());
                selected.push(item);
            } else {
                remaining.push_back(item);
            }
        }

        self.pending = remaining;
        selected
    }

    pub fn complete(&mut self, key: &AdmissionKey) {
        self.active_keys.remove(key);
    }

    /// Drop a queued job (cancellation path). Returns false when the job
    /// is not pending, i.e. already admitted or never submitted.
    pub fn remove_pending(&mut self, job_id: i64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|item| item.job_id != job_id);
        before != self.pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active_keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_doc_writes_run_one_at_a_time_in_order() {
        let mut queue = AdmissionQueue::default();
        queue.enqueue(AdmissionKey::DocWrite("doc-a".to_string()), 1);
        queue.enqueue(AdmissionKey::DocWrite("doc-a".to_string()), 2);
        queue.enqueue(AdmissionKey::DocWrite("doc-b".to_string()), 3);

        let first = queue.dequeue_runnable(4);
        assert_eq!(
            first.iter().map(|p| p.job_id).collect::<Vec<_>>(),
            vec![1, 3]
        );

        assert!(queue.dequeue_runnable(4).is_empty());
        queue.complete(&AdmissionKey::DocWrite("doc-a".to_string()));
        let second = queue.dequeue_runnable(4);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].job_id, 2);
    }

    #[test]
    fn read_slots_never_exclude_each_other() {
        let mut queue = AdmissionQueue::default();
        queue.enqueue(AdmissionKey::ReadSlot(1), 1);
        queue.enqueue(AdmissionKey::ReadSlot(2), 2);
        queue.enqueue(AdmissionKey::ReadSlot(3), 3);

        let batch = queue.dequeue_runnable(3);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn read_job_runs_while_write_job_waits_on_same_doc() {
        let mut queue = AdmissionQueue::default();
        queue.enqueue(AdmissionKey::DocWrite("doc-a".to_string()), 1);
        let _ = queue.dequeue_runnable(1);

        queue.enqueue(AdmissionKey::DocWrite("doc-a".to_string()), 2);
        queue.enqueue(AdmissionKey::ReadSlot(3), 3);
        let batch = queue.dequeue_runnable(2);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].job_id, 3);
    }

    #[test]
    fn slot_budget_caps_admission() {
        let mut queue = AdmissionQueue::default();
        queue.enqueue(AdmissionKey::DocWrite("a".to_string()), 1);
        queue.enqueue(AdmissionKey::DocWrite("b".to_string()), 2);
        queue.enqueue(AdmissionKey::DocWrite("c".to_string()), 3);

        let batch = queue.dequeue_runnable(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn remove_pending_only_touches_queued_jobs() {
        let mut queue = AdmissionQueue::default();
        queue.enqueue(AdmissionKey::DocWrite("a".to_string()), 1);
        let _ = queue.dequeue_runnable(1);
        queue.enqueue(AdmissionKey::DocWrite("a".to_string()), 2);

        assert!(queue.remove_pending(2));
        assert!(!queue.remove_pending(2));
        assert!(!queue.remove_pending(1));
    }

    #[test]
    fn global_write_key_is_shared() {
        let key_a = derive_admission_key(1, None, true);
        let key_b = derive_admission_key(2, None, true);
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.lock_key(), Some(GLOBAL_LOCK_KEY));
    }
}
