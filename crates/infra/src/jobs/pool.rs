//! Per-tier worker pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use hookq_core::Priority;

use super::clock::{Clock, elapsed_ms};
use super::dispatcher::{Dispatcher, dispatch_guarded};
use super::events::{EventEmitter, QueueEvent};
use super::queue::TierQueues;
use super::retry::RetryScheduler;
use super::stats::StatsCollector;
use super::types::Job;

/// Count of claimed jobs across all pools, waitable for shutdown.
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enter(&self) {
        *self.lock() += 1;
    }

    pub fn exit(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Wait until nothing is in flight. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            count = match self.idle.wait_timeout(count, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Everything a worker needs, shared by all pools.
pub(crate) struct WorkerContext {
    pub(crate) queues: Arc<TierQueues>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) retry: Arc<RetryScheduler>,
    pub(crate) stats: Arc<StatsCollector>,
    pub(crate) events: Arc<EventEmitter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) in_flight: Arc<InFlight>,
}

/// Fixed-size set of worker threads draining one tier queue.
pub struct WorkerPool {
    priority: Priority,
    concurrency: usize,
    idle_poll: Duration,
    ctx: Arc<WorkerContext>,
    started: AtomicBool,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(
        priority: Priority,
        concurrency: usize,
        idle_poll: Duration,
        ctx: Arc<WorkerContext>,
    ) -> Self {
        Self {
            priority,
            concurrency,
            idle_poll,
            ctx,
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the workers. Returns `false` if this pool was already started.
    ///
    /// If a spawn fails the pool stays unstarted; calling `start` again only
    /// spawns the workers that are missing.
    pub fn start(&self) -> std::io::Result<bool> {
        self.start_with(|name, work| thread::Builder::new().name(name).spawn(work))
    }

    fn start_with<S>(&self, mut spawn: S) -> std::io::Result<bool>
    where
        S: FnMut(String, Box<dyn FnOnce() + Send>) -> std::io::Result<thread::JoinHandle<()>>,
    {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if self.started.load(Ordering::SeqCst) {
            return Ok(false);
        }

        for i in handles.len()..self.concurrency {
            let name = format!("hookq-{}-{}", self.priority, i);
            let ctx = self.ctx.clone();
            let priority = self.priority;
            let idle_poll = self.idle_poll;
            let worker_name = name.clone();
            let handle = spawn(
                name,
                Box::new(move || worker_loop(&worker_name, priority, idle_poll, &ctx)),
            )?;
            handles.push(handle);
        }

        self.started.store(true, Ordering::SeqCst);
        info!(priority = %self.priority, concurrency = self.concurrency, "worker pool started");
        Ok(true)
    }

    /// Worker threads spawned and not yet joined or detached.
    pub fn worker_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for every worker to exit. Only returns once the tier queue is closed.
    pub fn join(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!(priority = %self.priority, "worker thread panicked");
            }
        }
    }

    /// Forget the worker threads without waiting for them.
    pub fn detach(&self) {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("priority", &self.priority)
            .field("concurrency", &self.concurrency)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

fn worker_loop(name: &str, priority: Priority, idle_poll: Duration, ctx: &WorkerContext) {
    debug!(worker = name, "worker started");
    let queue = ctx.queues.get(priority);

    loop {
        if queue.is_closed() {
            break;
        }

        let claimed = queue.claim(idle_poll, |job| {
            job.mark_processing();
            ctx.stats.record_claim();
            ctx.in_flight.enter();
        });

        if let Some(job) = claimed {
            process_claimed(name, ctx, job);
            ctx.in_flight.exit();
        }
    }

    debug!(worker = name, "worker stopped");
}

fn process_claimed(worker: &str, ctx: &WorkerContext, mut job: Job) {
    debug!(
        worker,
        job_id = %job.id,
        job_type = %job.job_type,
        attempt = job.attempts,
        "claimed job"
    );

    let started = ctx.clock.now();
    let result = dispatch_guarded(ctx.dispatcher.as_ref(), &job);
    let duration_ms = elapsed_ms(started, ctx.clock.now());

    match result {
        Ok(()) => {
            job.mark_completed();
            ctx.stats.record_success(duration_ms);
            info!(
                worker,
                job_id = %job.id,
                priority = %job.priority,
                attempt = job.attempts,
                duration_ms,
                "job completed"
            );
            ctx.events.emit(QueueEvent::Completed(job));
        }
        Err(err) => {
            warn!(
                worker,
                job_id = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                error = %err,
                "job attempt failed"
            );
            ctx.retry.on_failure(job, &err);
        }
    }
}
