//! In-process priority queue over pending jobs.
//!
//! A binary heap ordered by priority descending, then creation time
//! ascending, then an insertion sequence for full determinism. Workers block
//! on [JobQueue::pop_blocking]; cancellation of a pending job tombstones it
//! so the heap never hands it to a worker. Backpressure is a hysteresis pair
//! of watermarks gating position-driven triggers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex};

use chrono::{DateTime, Utc};

use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedJob {
    priority: u8,
    created_at: DateTime<Utc>,
    seq: u64,
    job_id: JobId,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first; among ties, earlier created_at
        // then earlier insertion wins.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<QueuedJob>,
    tombstones: HashSet<JobId>,
    seq: u64,
    shutdown: bool,
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    high_watermark: usize,
    low_watermark: usize,
    accepting_triggers: AtomicBool,
}

impl JobQueue {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
            high_watermark: high_watermark.max(1),
            low_watermark: low_watermark.min(high_watermark).max(1),
            accepting_triggers: AtomicBool::new(true),
        }
    }

    pub fn push(&self, job_id: JobId, priority: u8, created_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.seq += 1;
        let seq = inner.seq;
        inner.tombstones.remove(&job_id);
        inner.heap.push(QueuedJob { priority, created_at, seq, job_id });
        self.update_watermark(&inner);
        drop(inner);
        self.available.notify_one();
    }

    /// Block until a job is available or the queue shuts down.
    pub fn pop_blocking(&self) -> Option<JobId> {
        let mut inner = self.inner.lock().expect("queue lock");
        loop {
            while let Some(next) = inner.heap.pop() {
                if inner.tombstones.remove(&next.job_id) {
                    continue;
                }
                self.update_watermark(&inner);
                return Some(next.job_id);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.available.wait(inner).expect("queue lock");
        }
    }

    /// Remove a pending job before a worker takes it. Returns whether the
    /// job was actually queued.
    pub fn remove(&self, job_id: JobId) -> bool {
        let mut inner = self.inner.lock().expect("queue lock");
        let queued = inner.heap.iter().any(|q| q.job_id == job_id);
        if queued {
            inner.tombstones.insert(job_id);
        }
        queued
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock");
        inner.heap.len() - inner.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether position-driven optimization triggers are currently admitted.
    pub fn accepting_triggers(&self) -> bool {
        self.accepting_triggers.load(AtomicOrdering::SeqCst)
    }

    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.shutdown = true;
        drop(inner);
        self.available.notify_all();
    }

    fn update_watermark(&self, inner: &Inner) {
        let len = inner.heap.len() - inner.tombstones.len();
        if len >= self.high_watermark {
            self.accepting_triggers.store(false, AtomicOrdering::SeqCst);
        } else if len < self.low_watermark {
            self.accepting_triggers.store(true, AtomicOrdering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(offset_s: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + chrono::Duration::seconds(offset_s)
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let queue = JobQueue::new(100, 50);
        let low = JobId::generate();
        let high_late = JobId::generate();
        let high_early = JobId::generate();
        queue.push(low, 2, t(0));
        queue.push(high_late, 8, t(30));
        queue.push(high_early, 8, t(10));

        assert_eq!(queue.pop_blocking(), Some(high_early));
        assert_eq!(queue.pop_blocking(), Some(high_late));
        assert_eq!(queue.pop_blocking(), Some(low));
    }

    #[test]
    fn equal_priority_and_time_pops_in_insertion_order() {
        let queue = JobQueue::new(100, 50);
        let first = JobId::generate();
        let second = JobId::generate();
        queue.push(first, 5, t(0));
        queue.push(second, 5, t(0));
        assert_eq!(queue.pop_blocking(), Some(first));
        assert_eq!(queue.pop_blocking(), Some(second));
    }

    #[test]
    fn removed_jobs_never_pop() {
        let queue = JobQueue::new(100, 50);
        let keep = JobId::generate();
        let drop_me = JobId::generate();
        queue.push(drop_me, 9, t(0));
        queue.push(keep, 1, t(1));

        assert!(queue.remove(drop_me));
        assert!(!queue.remove(drop_me), "second removal is a no-op");
        assert_eq!(queue.pop_blocking(), Some(keep));
        assert!(queue.is_empty());
    }

    #[test]
    fn shutdown_unblocks_workers() {
        let queue = std::sync::Arc::new(JobQueue::new(100, 50));
        let q = queue.clone();
        let handle = std::thread::spawn(move || q.pop_blocking());
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.shutdown();
        assert_eq!(handle.join().expect("join"), None);
    }

    #[test]
    fn watermark_hysteresis() {
        let queue = JobQueue::new(3, 2);
        assert!(queue.accepting_triggers());
        queue.push(JobId::generate(), 5, t(0));
        queue.push(JobId::generate(), 5, t(1));
        assert!(queue.accepting_triggers(), "below high watermark");
        queue.push(JobId::generate(), 5, t(2));
        assert!(!queue.accepting_triggers(), "at high watermark");

        queue.pop_blocking();
        // len == 2, still at/above the low watermark: stays closed.
        assert!(!queue.accepting_triggers());
        queue.pop_blocking();
        // len == 1 < low watermark: reopens.
        assert!(queue.accepting_triggers());
    }
}
