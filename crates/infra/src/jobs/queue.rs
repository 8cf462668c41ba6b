//! Per-tier FIFO queues.
//!
//! New work goes to the back, retries go to the front. Workers block on a
//! condition variable while the queue is empty, so idle workers do not spin.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hookq_core::Priority;

use super::types::Job;

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Thread-safe FIFO for a single tier.
#[derive(Debug)]
pub struct JobQueue {
    priority: Priority,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append new work.
    pub fn push_back(&self, job: Job) {
        self.lock().jobs.push_back(job);
        self.available.notify_one();
    }

    /// Insert a retry ahead of the backlog.
    pub fn push_front(&self, job: Job) {
        self.lock().jobs.push_front(job);
        self.available.notify_one();
    }

    /// Take the head without waiting. Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.jobs.pop_front()
    }

    /// Wait up to `timeout` for a job and claim it.
    ///
    /// `on_claim` runs while the queue lock is still held, so the job is never
    /// observable as neither queued nor claimed.
    pub fn claim<F>(&self, timeout: Duration, on_claim: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }
            if let Some(mut job) = state.jobs.pop_front() {
                on_claim(&mut job);
                return Some(job);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = match self.available.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything without processing it.
    pub fn clear(&self) -> Vec<Job> {
        self.lock().jobs.drain(..).collect()
    }

    /// Stop handing out jobs and wake every waiting worker.
    ///
    /// Jobs still in the queue stay there (and are abandoned).
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// One queue per tier.
#[derive(Debug)]
pub struct TierQueues {
    queues: [JobQueue; 4],
}

impl Default for TierQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl TierQueues {
    pub fn new() -> Self {
        Self {
            queues: Priority::ALL.map(JobQueue::new),
        }
    }

    pub fn get(&self, priority: Priority) -> &JobQueue {
        &self.queues[priority.index()]
    }

    pub fn depths(&self) -> BTreeMap<Priority, usize> {
        self.queues.iter().map(|q| (q.priority(), q.len())).collect()
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(JobQueue::len).sum()
    }

    /// Drain every tier; returns how many jobs were dropped.
    pub fn clear_all(&self) -> usize {
        self.queues.iter().map(|q| q.clear().len()).sum()
    }

    pub fn close_all(&self) {
        for q in &self.queues {
            q.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;
    use proptest::prelude::*;

    use hookq_core::JobType;

    use super::*;

    fn job(tag: u32) -> Job {
        Job::new(
            JobType::Email,
            "smtp",
            Priority::Normal,
            serde_json::json!({ "tag": tag }),
            3,
            Utc::now(),
        )
    }

    fn tag(job: &Job) -> u64 {
        job.payload["tag"].as_u64().unwrap()
    }

    #[test]
    fn back_pushes_are_fifo_and_front_pushes_jump_ahead() {
        let q = JobQueue::new(Priority::Normal);
        q.push_back(job(1));
        q.push_back(job(2));
        q.push_front(job(9));

        assert_eq!(tag(&q.pop().unwrap()), 9);
        assert_eq!(tag(&q.pop().unwrap()), 1);
        assert_eq!(tag(&q.pop().unwrap()), 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn claim_times_out_on_empty_queue() {
        let q = JobQueue::new(Priority::Low);
        let started = Instant::now();
        assert!(q.claim(Duration::from_millis(30), |_| {}).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn claim_wakes_when_a_job_arrives() {
        let q = Arc::new(JobQueue::new(Priority::High));
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.push_back(job(5));
            })
        };

        let claimed = q.claim(Duration::from_secs(5), |j| j.mark_processing());
        producer.join().unwrap();

        let claimed = claimed.unwrap();
        assert_eq!(tag(&claimed), 5);
        assert_eq!(claimed.attempts, 1);
    }

    #[test]
    fn close_wakes_waiters_and_blocks_claims() {
        let q = Arc::new(JobQueue::new(Priority::Urgent));
        q.push_back(job(1));
        q.close();

        assert!(q.claim(Duration::from_secs(5), |_| {}).is_none());
        assert!(q.pop().is_none());
        assert_eq!(q.len(), 1);

        let q2 = Arc::new(JobQueue::new(Priority::Urgent));
        let waiter = {
            let q2 = q2.clone();
            thread::spawn(move || q2.claim(Duration::from_secs(30), |_| {}))
        };
        thread::sleep(Duration::from_millis(20));
        q2.close();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn concurrent_producers_and_consumers_do_not_lose_or_duplicate() {
        let q = Arc::new(JobQueue::new(Priority::Normal));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push_back(job(p * 1000 + i));
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(j) = q.claim(Duration::from_millis(200), |_| {}) {
                        seen.push(tag(&j));
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let mut all = Vec::new();
        for c in consumers {
            all.extend(c.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 1000);
        assert_eq!(unique.len(), 1000);
    }

    #[test]
    fn tier_queues_report_depths_and_clear() {
        let tiers = TierQueues::new();
        tiers.get(Priority::Urgent).push_back(job(1));
        tiers.get(Priority::Low).push_back(job(2));
        tiers.get(Priority::Low).push_back(job(3));

        let depths = tiers.depths();
        assert_eq!(depths[&Priority::Urgent], 1);
        assert_eq!(depths[&Priority::High], 0);
        assert_eq!(depths[&Priority::Low], 2);
        assert_eq!(tiers.total_len(), 3);

        assert_eq!(tiers.clear_all(), 3);
        assert_eq!(tiers.total_len(), 0);
    }

    proptest! {
        // Back-pushes keep their relative order no matter how front-pushes interleave.
        #[test]
        fn back_pushes_keep_relative_order(ops in proptest::collection::vec(any::<bool>(), 1..60)) {
            let q = JobQueue::new(Priority::Normal);
            let mut expected_back = Vec::new();
            for (i, front) in ops.iter().enumerate() {
                let i = i as u32;
                if *front {
                    q.push_front(job(10_000 + i));
                } else {
                    q.push_back(job(i));
                    expected_back.push(i as u64);
                }
            }

            let mut backs = Vec::new();
            while let Some(j) = q.pop() {
                let t = tag(&j);
                if t < 10_000 {
                    backs.push(t);
                }
            }
            prop_assert_eq!(backs, expected_back);
        }
    }
}
