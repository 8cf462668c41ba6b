//! Queue façade: owns the tier queues, worker pools and retry timer.
//!
//! A `QueueManager` is an explicit value created by the composition root and
//! shared (usually behind an `Arc`) with webhook receivers and admin tooling.
//! There is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use hookq_core::{JobId, JobType, Priority};
use hookq_events::Subscription;

use crate::config::QueueConfig;

use super::classifier::PriorityClassifier;
use super::clock::{Clock, SystemClock};
use super::dispatcher::Dispatcher;
use super::error::QueueError;
use super::events::{EventEmitter, QueueEvent, QueueEventEnvelope};
use super::pool::{InFlight, WorkerContext, WorkerPool};
use super::queue::TierQueues;
use super::retry::RetryScheduler;
use super::stats::{StatsCollector, StatsSnapshot};
use super::types::{Job, JobSpec};

/// How often [`QueueManager::wait_for_drain`] re-reads the counters.
const DRAIN_POLL: Duration = Duration::from_millis(10);

pub struct QueueManager {
    config: QueueConfig,
    classifier: PriorityClassifier,
    clock: Arc<dyn Clock>,
    queues: Arc<TierQueues>,
    stats: Arc<StatsCollector>,
    events: Arc<EventEmitter>,
    retry: Arc<RetryScheduler>,
    in_flight: Arc<InFlight>,
    pools: Vec<WorkerPool>,
    accepting: AtomicBool,
}

impl QueueManager {
    /// Build a manager on the system clock. Workers are not started yet.
    pub fn new(config: QueueConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_clock(config, dispatcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: QueueConfig,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queues = Arc::new(TierQueues::new());
        let stats = Arc::new(StatsCollector::new());
        let events = Arc::new(EventEmitter::new(clock.clone()));
        let in_flight = Arc::new(InFlight::new());
        let retry = Arc::new(RetryScheduler::new(
            config.tiers.retry_delays(),
            queues.clone(),
            stats.clone(),
            events.clone(),
            clock.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            queues: queues.clone(),
            dispatcher,
            retry: retry.clone(),
            stats: stats.clone(),
            events: events.clone(),
            clock: clock.clone(),
            in_flight: in_flight.clone(),
        });

        let pools = Priority::ALL
            .iter()
            .map(|p| {
                WorkerPool::new(
                    *p,
                    config.tiers.get(*p).concurrency,
                    config.idle_poll,
                    ctx.clone(),
                )
            })
            .collect();

        Self {
            classifier: PriorityClassifier::new(config.classifier.clone()),
            config,
            clock,
            queues,
            stats,
            events,
            retry,
            in_flight,
            pools,
            accepting: AtomicBool::new(true),
        }
    }

    /// Build and start in one step.
    pub fn start_new(config: QueueConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self, QueueError> {
        let manager = Self::new(config, dispatcher);
        manager.start()?;
        Ok(manager)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn classifier(&self) -> &PriorityClassifier {
        &self.classifier
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler {
        &self.retry
    }

    /// Start the retry timer and every tier's pool. Idempotent.
    pub fn start(&self) -> Result<(), QueueError> {
        self.retry.start()?;
        for p in Priority::ALL {
            self.start_tier(p)?;
        }
        Ok(())
    }

    /// Start a single tier's pool. Returns `false` if it was already running.
    pub fn start_tier(&self, priority: Priority) -> Result<bool, QueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        self.retry.start()?;
        Ok(self.pools[priority.index()].start()?)
    }

    /// Accept a job and return immediately; processing happens on the workers.
    pub fn enqueue(&self, spec: JobSpec) -> Result<JobId, QueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let job_type: JobType = spec
            .job_type
            .parse()
            .map_err(|_| QueueError::UnsupportedJobType(spec.job_type.clone()))?;

        let max_attempts = spec.max_attempts.unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidMaxAttempts(max_attempts));
        }

        let classified = spec.priority.is_none();
        let priority = spec
            .priority
            .unwrap_or_else(|| self.classifier.classify(&spec.payload));

        let job = Job::new(
            job_type,
            spec.provider,
            priority,
            spec.payload,
            max_attempts,
            self.clock.now(),
        );
        let id = job.id;

        self.stats.record_enqueue();
        self.events.emit(QueueEvent::Enqueued(job.clone()));
        self.queues.get(priority).push_back(job);

        debug!(job_id = %id, job_type = %job_type, priority = %priority, classified, "job enqueued");
        Ok(id)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.queues.total_len())
    }

    pub fn get_queue_depths(&self) -> BTreeMap<Priority, usize> {
        self.queues.depths()
    }

    /// Number of jobs currently claimed by workers.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Drop every queued job and every waiting retry without processing them.
    /// Jobs already being processed are not affected.
    pub fn clear(&self) -> usize {
        let queued = self.queues.clear_all();
        let scheduled = self.retry.clear_scheduled().len();
        self.stats.record_cleared(queued, scheduled);

        info!(queued, scheduled, "queues cleared");
        queued + scheduled
    }

    /// Lifecycle events published after this call.
    pub fn subscribe(&self) -> Subscription<QueueEventEnvelope> {
        self.events.subscribe()
    }

    /// Block until every accepted job is completed, failed or cleared.
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let stats = self.get_stats();
            if stats.settled() >= stats.enqueued {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    /// Stop claiming, let in-flight jobs finish (up to `timeout`), stop workers.
    ///
    /// Queued jobs and waiting retries are abandoned. If in-flight jobs are
    /// still running when the timeout elapses they are left to finish on
    /// their own and `ShutdownTimeout` is returned.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        self.accepting.store(false, Ordering::SeqCst);
        self.queues.close_all();
        self.retry.stop();

        let abandoned = self.queues.total_len() + self.retry.scheduled_len();

        if !self.in_flight.wait_idle(timeout) {
            let in_flight = self.in_flight.count();
            warn!(in_flight, abandoned, "shutdown timed out waiting for in-flight jobs");
            for pool in &self.pools {
                pool.detach();
            }
            return Err(QueueError::ShutdownTimeout { in_flight });
        }

        for pool in &self.pools {
            pool.join();
        }
        info!(abandoned, dropped_events = self.events.dropped_events(), "queue shut down");
        Ok(())
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        // Let idle workers and the timer exit even without an explicit shutdown.
        self.accepting.store(false, Ordering::SeqCst);
        self.queues.close_all();
        self.retry.stop();
    }
}

impl core::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueManager")
            .field("pools", &self.pools)
            .field("stats", &self.get_stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::dispatcher::DispatchError;
    use super::*;

    fn ok_dispatcher() -> Arc<dyn Dispatcher> {
        Arc::new(|_job: &Job| -> Result<(), DispatchError> { Ok(()) })
    }

    fn test_config() -> QueueConfig {
        QueueConfig::default()
            .with_idle_poll(Duration::from_millis(20))
            .with_retry_delay(Duration::from_millis(10))
    }

    #[test]
    fn enqueue_classifies_when_priority_is_absent() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());

        manager
            .enqueue(JobSpec::new("whatsapp", "meta", json!("errore pagamento")))
            .unwrap();
        manager
            .enqueue(JobSpec::new("sms", "twilio", json!({"text": "preventivo?"})))
            .unwrap();
        manager
            .enqueue(JobSpec::new("email", "ses", json!({"text": "grazie"})).with_priority(Priority::Urgent))
            .unwrap();

        let depths = manager.get_queue_depths();
        assert_eq!(depths[&Priority::Urgent], 2);
        assert_eq!(depths[&Priority::High], 1);
        assert_eq!(depths[&Priority::Low], 0);
    }

    #[test]
    fn unsupported_type_is_rejected_synchronously() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());
        let err = manager
            .enqueue(JobSpec::new("telegram", "tg", json!("ciao")))
            .unwrap_err();

        assert!(matches!(err, QueueError::UnsupportedJobType(ref t) if t == "telegram"));
        assert_eq!(manager.get_stats().enqueued, 0);
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());
        let err = manager
            .enqueue(JobSpec::new("sms", "x", json!("ciao")).with_max_attempts(0))
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidMaxAttempts(0)));
    }

    #[test]
    fn enqueue_emits_event_and_counts_pending() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());
        let sub = manager.subscribe();

        let id = manager
            .enqueue(JobSpec::new("messenger", "meta", json!({"text": "ciao"})))
            .unwrap();

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload().name(), "enqueued");
        assert_eq!(events[0].payload().job().id, id);
        assert_eq!(events[0].payload().job().max_attempts, 3);

        let stats = manager.get_stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.enqueued, 1);
    }

    #[test]
    fn clear_drops_pending_jobs() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());
        for _ in 0..4 {
            manager.enqueue(JobSpec::new("sms", "x", json!("ciao"))).unwrap();
        }

        assert_eq!(manager.clear(), 4);
        let stats = manager.get_stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.cleared, 4);
        assert!(manager.wait_for_drain(Duration::ZERO));
    }

    #[test]
    fn start_is_idempotent_per_tier() {
        let manager = QueueManager::new(test_config(), ok_dispatcher());
        assert!(manager.start_tier(Priority::High).unwrap());
        assert!(!manager.start_tier(Priority::High).unwrap());
        manager.start().unwrap();
        manager.start().unwrap();

        manager.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn enqueue_after_shutdown_is_rejected() {
        let manager = QueueManager::start_new(test_config(), ok_dispatcher()).unwrap();
        manager.shutdown(Duration::from_secs(5)).unwrap();

        let err = manager.enqueue(JobSpec::new("sms", "x", json!("ciao"))).unwrap_err();
        assert!(matches!(err, QueueError::ShuttingDown));
        assert!(matches!(manager.start_tier(Priority::Low), Err(QueueError::ShuttingDown)));
    }

    #[test]
    fn processes_jobs_end_to_end() {
        let manager = QueueManager::start_new(test_config(), ok_dispatcher()).unwrap();
        let sub = manager.subscribe();

        for i in 0..20 {
            manager
                .enqueue(JobSpec::new("email", "ses", json!({ "text": format!("msg {i}") })))
                .unwrap();
        }

        assert!(manager.wait_for_drain(Duration::from_secs(10)));
        let stats = manager.get_stats();
        assert_eq!(stats.completed, 20);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);

        manager.shutdown(Duration::from_secs(5)).unwrap();
        let completed = sub
            .drain()
            .into_iter()
            .filter(|e| e.payload().name() == "completed")
            .count();
        assert_eq!(completed, 20);
    }
}
