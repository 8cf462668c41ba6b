//! Delayed re-enqueueing of failed jobs.
//!
//! A failed job either goes into a delay queue (fixed per-tier delay, no
//! backoff growth) or, once `max_attempts` is reached, becomes terminally
//! `Failed`. A dedicated timer thread moves due retries to the *front* of
//! their tier queue; workers never sleep on a retry.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use hookq_core::Priority;

use super::clock::{Clock, add_saturating};
use super::dispatcher::DispatchError;
use super::events::{EventEmitter, QueueEvent};
use super::queue::TierQueues;
use super::stats::StatsCollector;
use super::types::Job;

/// Upper bound on how long the timer thread sleeps between checks. Keeps a
/// manually advanced clock responsive.
const TIMER_TICK: Duration = Duration::from_millis(250);

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The job will be re-queued at `at`.
    Scheduled { at: DateTime<Utc> },
    /// `max_attempts` reached; the job is terminally failed.
    Exhausted,
}

#[derive(Debug)]
struct DelayedJob {
    due: DateTime<Utc>,
    seq: u64,
    job: Job,
}

// BinaryHeap is a max-heap; reverse so the earliest (due, seq) is on top.
impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct TimerState {
    delayed: BinaryHeap<DelayedJob>,
    next_seq: u64,
    stopped: bool,
}

/// Decides retry-or-fail and owns the delay queue.
pub struct RetryScheduler {
    delays: [Duration; 4],
    queues: Arc<TierQueues>,
    stats: Arc<StatsCollector>,
    events: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
    state: Mutex<TimerState>,
    wake: Condvar,
    timer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RetryScheduler {
    /// `delays` is indexed by [`Priority::index`].
    pub fn new(
        delays: [Duration; 4],
        queues: Arc<TierQueues>,
        stats: Arc<StatsCollector>,
        events: Arc<EventEmitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            delays,
            queues,
            stats,
            events,
            clock,
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
            timer: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn delay_for(&self, priority: Priority) -> Duration {
        self.delays[priority.index()]
    }

    /// Handle a failed attempt of a claimed job.
    pub fn on_failure(&self, mut job: Job, error: &DispatchError) -> RetryDecision {
        job.record_failure(error.to_string());

        if !job.can_retry() {
            job.mark_failed();
            self.stats.record_failure();
            warn!(
                job_id = %job.id,
                priority = %job.priority,
                job_type = %job.job_type,
                attempts = job.attempts,
                error = %error,
                "job exhausted retries"
            );
            self.events.emit(QueueEvent::Failed(job));
            return RetryDecision::Exhausted;
        }

        let at = add_saturating(self.clock.now(), self.delay_for(job.priority));
        job.schedule_retry(at);
        self.stats.record_retry_scheduled();
        debug!(
            job_id = %job.id,
            priority = %job.priority,
            attempt = job.attempts,
            retry_at = %at,
            error = %error,
            "retry scheduled"
        );
        self.events.emit(QueueEvent::RetryScheduled(job.clone()));

        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.delayed.push(DelayedJob { due: at, seq, job });
        }
        self.wake.notify_one();

        RetryDecision::Scheduled { at }
    }

    /// Move every retry whose delay has elapsed back onto its queue.
    ///
    /// Returns how many jobs were re-queued. Retries that are due together
    /// keep their due order at the head of the queue.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<Job> = {
            let mut state = self.lock();
            let mut due = Vec::new();
            while state.delayed.peek().is_some_and(|d| d.due <= now) {
                if let Some(d) = state.delayed.pop() {
                    due.push(d.job);
                }
            }
            due
        };

        let count = due.len();
        for mut job in due.into_iter().rev() {
            job.mark_requeued();
            self.stats.record_retry_fired();
            debug!(job_id = %job.id, priority = %job.priority, attempt = job.attempts, "retry re-queued");
            self.queues.get(job.priority).push_front(job);
        }
        count
    }

    /// Number of jobs waiting out their retry delay.
    pub fn scheduled_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Drop every waiting retry.
    pub fn clear_scheduled(&self) -> Vec<Job> {
        self.lock().delayed.drain().map(|d| d.job).collect()
    }

    /// Start the timer thread. Returns `false` if it is already running or
    /// the scheduler was stopped.
    pub fn start(self: &Arc<Self>) -> std::io::Result<bool> {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.is_some() || self.lock().stopped {
            return Ok(false);
        }

        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("hookq-retry-timer".to_string())
            .spawn(move || scheduler.timer_loop())?;
        *timer = Some(handle);
        Ok(true)
    }

    /// Stop the timer thread and wait for it. Waiting retries are abandoned.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.wake.notify_all();

        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("retry timer thread panicked");
            }
        }
    }

    fn timer_loop(&self) {
        info!("retry timer started");

        loop {
            self.run_due();

            let state = self.lock();
            if state.stopped {
                break;
            }

            let wait = match state.delayed.peek() {
                Some(next) => (next.due - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(TIMER_TICK),
                None => TIMER_TICK,
            };
            if wait.is_zero() {
                continue;
            }

            drop(
                self.wake
                    .wait_timeout(state, wait)
                    .unwrap_or_else(|e| e.into_inner()),
            );
        }

        info!(abandoned = self.scheduled_len(), "retry timer stopped");
    }
}

impl core::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("delays", &self.delays)
            .field("scheduled", &self.scheduled_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use hookq_core::JobType;

    use super::super::clock::ManualClock;
    use super::*;

    struct Fixture {
        clock: Arc<ManualClock>,
        queues: Arc<TierQueues>,
        stats: Arc<StatsCollector>,
        events: Arc<EventEmitter>,
        scheduler: RetryScheduler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let queues = Arc::new(TierQueues::new());
        let stats = Arc::new(StatsCollector::new());
        let events = Arc::new(EventEmitter::new(clock.clone()));
        let scheduler = RetryScheduler::new(
            [
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            queues.clone(),
            stats.clone(),
            events.clone(),
            clock.clone(),
        );
        Fixture {
            clock,
            queues,
            stats,
            events,
            scheduler,
        }
    }

    fn claimed_job(priority: Priority, max_attempts: u32, clock: &ManualClock) -> Job {
        let mut job = Job::new(
            JobType::WhatsApp,
            "meta",
            priority,
            serde_json::json!({"text": "hi"}),
            max_attempts,
            clock.now(),
        );
        job.mark_processing();
        job
    }

    #[test]
    fn schedules_with_tier_delay_and_requeues_at_front() {
        let f = fixture();
        let sub = f.events.subscribe();
        f.queues.get(Priority::Normal).push_back(claimed_job(Priority::Normal, 3, &f.clock));

        let job = claimed_job(Priority::Normal, 3, &f.clock);
        let id = job.id;
        f.stats.record_claim();
        let decision = f.scheduler.on_failure(job, &DispatchError::transient("503"));

        let expected_at = f.clock.now() + chrono::Duration::seconds(5);
        assert_eq!(decision, RetryDecision::Scheduled { at: expected_at });
        assert_eq!(f.scheduler.scheduled_len(), 1);
        assert_eq!(f.stats.snapshot(1).retrying, 1);

        // Not yet due.
        f.clock.advance(Duration::from_millis(4999));
        assert_eq!(f.scheduler.run_due(), 0);

        f.clock.advance(Duration::from_millis(1));
        assert_eq!(f.scheduler.run_due(), 1);

        let head = f.queues.get(Priority::Normal).pop().unwrap();
        assert_eq!(head.id, id);
        assert_eq!(head.next_retry_at, None);
        assert_eq!(head.last_error.as_deref(), Some("dispatch failed: 503"));
        assert_eq!(f.stats.snapshot(0).retrying, 0);

        let names: Vec<_> = sub.drain().iter().map(|e| e.payload().name()).collect();
        assert_eq!(names, vec!["retry_scheduled"]);
    }

    #[test]
    fn delay_is_fixed_across_attempts() {
        let f = fixture();
        let mut job = claimed_job(Priority::Urgent, 5, &f.clock);

        for _ in 0..3 {
            let before = f.clock.now();
            let decision = f.scheduler.on_failure(job.clone(), &DispatchError::transient("x"));
            assert_eq!(
                decision,
                RetryDecision::Scheduled { at: before + chrono::Duration::seconds(1) }
            );
            f.clock.advance(Duration::from_secs(1));
            f.scheduler.run_due();
            job = f.queues.get(Priority::Urgent).pop().unwrap();
            job.mark_processing();
        }
    }

    #[test]
    fn exhausted_job_fails_terminally() {
        let f = fixture();
        let sub = f.events.subscribe();
        let mut job = claimed_job(Priority::High, 2, &f.clock);
        job.mark_processing();
        assert_eq!(job.attempts, 2);

        f.stats.record_claim();
        let decision = f.scheduler.on_failure(job, &DispatchError::transient("gone"));

        assert_eq!(decision, RetryDecision::Exhausted);
        assert_eq!(f.scheduler.scheduled_len(), 0);
        let snap = f.stats.snapshot(0);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.processing, 0);

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        let failed = events[0].payload().job();
        assert_eq!(events[0].payload().name(), "failed");
        assert_eq!(failed.last_error.as_deref(), Some("dispatch failed: gone"));
    }

    #[test]
    fn simultaneous_retries_keep_due_order_at_head() {
        let f = fixture();
        let first = claimed_job(Priority::Low, 3, &f.clock);
        let second = claimed_job(Priority::Low, 3, &f.clock);
        let (first_id, second_id) = (first.id, second.id);

        f.scheduler.on_failure(first, &DispatchError::transient("a"));
        f.clock.advance(Duration::from_millis(10));
        f.scheduler.on_failure(second, &DispatchError::transient("b"));
        f.queues.get(Priority::Low).push_back(claimed_job(Priority::Low, 3, &f.clock));

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.scheduler.run_due(), 2);

        let q = f.queues.get(Priority::Low);
        assert_eq!(q.pop().unwrap().id, first_id);
        assert_eq!(q.pop().unwrap().id, second_id);
    }

    #[test]
    fn timer_thread_fires_due_retries() {
        let f = fixture();
        let scheduler = Arc::new(f.scheduler);
        assert!(scheduler.start().unwrap());
        assert!(!scheduler.start().unwrap());

        let job = claimed_job(Priority::Urgent, 3, &f.clock);
        scheduler.on_failure(job, &DispatchError::transient("x"));
        f.clock.advance(Duration::from_secs(2));

        let q = f.queues.get(Priority::Urgent);
        assert!(q.claim(Duration::from_secs(5), |_| {}).is_some());

        scheduler.stop();
        assert!(!scheduler.start().unwrap());
    }

    #[test]
    fn out_of_range_delay_is_clamped_not_panicking() {
        let clock = Arc::new(ManualClock::default());
        let queues = Arc::new(TierQueues::new());
        let stats = Arc::new(StatsCollector::new());
        let events = Arc::new(EventEmitter::new(clock.clone()));
        let scheduler = RetryScheduler::new(
            [Duration::MAX; 4],
            queues.clone(),
            stats.clone(),
            events,
            clock.clone(),
        );

        stats.record_claim();
        let decision = scheduler
            .on_failure(claimed_job(Priority::Normal, 3, &clock), &DispatchError::transient("x"));

        assert_eq!(
            decision,
            RetryDecision::Scheduled { at: DateTime::<Utc>::MAX_UTC }
        );
        assert_eq!(scheduler.scheduled_len(), 1);
        let snap = stats.snapshot(0);
        assert_eq!(snap.processing, 0);
        assert_eq!(snap.pending, 1);

        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(scheduler.run_due(), 0);
    }

    #[test]
    fn clear_drops_waiting_retries() {
        let f = fixture();
        f.scheduler
            .on_failure(claimed_job(Priority::Normal, 3, &f.clock), &DispatchError::transient("x"));
        assert_eq!(f.scheduler.clear_scheduled().len(), 1);
        f.clock.advance(Duration::from_secs(10));
        assert_eq!(f.scheduler.run_due(), 0);
    }
}
