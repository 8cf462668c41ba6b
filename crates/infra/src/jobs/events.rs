//! Lifecycle events emitted by the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::warn;

use hookq_core::EventId;
use hookq_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};

use super::clock::Clock;
use super::types::Job;

/// What happened to a job. Each event carries a snapshot of the job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "job", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued(Job),
    Completed(Job),
    RetryScheduled(Job),
    Failed(Job),
}

impl QueueEvent {
    pub fn job(&self) -> &Job {
        match self {
            QueueEvent::Enqueued(job)
            | QueueEvent::Completed(job)
            | QueueEvent::RetryScheduled(job)
            | QueueEvent::Failed(job) => job,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued(_) => "enqueued",
            QueueEvent::Completed(_) => "completed",
            QueueEvent::RetryScheduled(_) => "retry_scheduled",
            QueueEvent::Failed(_) => "failed",
        }
    }
}

pub type QueueEventEnvelope = EventEnvelope<QueueEvent>;

/// Wraps events in envelopes and publishes them without blocking the caller.
pub struct EventEmitter {
    bus: Arc<InMemoryEventBus<QueueEventEnvelope>>,
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl EventEmitter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bus: Arc::new(InMemoryEventBus::new()),
            sequence: AtomicU64::new(0),
            clock,
        }
    }

    pub fn emit(&self, event: QueueEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let name = event.name();
        let job_id = event.job().id;
        let envelope = EventEnvelope::new(EventId::new(), seq, self.clock.now(), event);

        if let Err(err) = self.bus.publish(envelope) {
            warn!(event = name, job_id = %job_id, error = %err, "failed to publish queue event");
        }
    }

    pub fn subscribe(&self) -> Subscription<QueueEventEnvelope> {
        self.bus.subscribe()
    }

    /// Event copies that reached a subscriber which had already gone away.
    pub fn dropped_events(&self) -> u64 {
        self.bus.dropped_count()
    }
}

impl core::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("dropped", &self.bus.dropped_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use hookq_core::{JobType, Priority};

    use super::super::clock::SystemClock;
    use super::*;

    #[test]
    fn envelopes_are_sequenced() {
        let emitter = EventEmitter::new(Arc::new(SystemClock));
        let sub = emitter.subscribe();
        let job = Job::new(
            JobType::Messenger,
            "meta",
            Priority::High,
            serde_json::json!({}),
            3,
            Utc::now(),
        );

        emitter.emit(QueueEvent::Enqueued(job.clone()));
        emitter.emit(QueueEvent::Completed(job.clone()));

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence_number(), 1);
        assert_eq!(events[1].sequence_number(), 2);
        assert_eq!(events[1].payload().name(), "completed");
        assert_eq!(events[1].payload().job().id, job.id);
    }

    #[test]
    fn events_for_departed_subscribers_are_counted() {
        let emitter = EventEmitter::new(Arc::new(SystemClock));
        let live = emitter.subscribe();
        drop(emitter.subscribe());
        let job = Job::new(JobType::Email, "smtp", Priority::Normal, serde_json::json!({}), 3, Utc::now());

        emitter.emit(QueueEvent::Enqueued(job.clone()));
        emitter.emit(QueueEvent::Completed(job));

        assert_eq!(emitter.dropped_events(), 1);
        assert_eq!(live.drain().len(), 2);
        assert!(format!("{emitter:?}").contains("dropped: 1"));
    }

    #[test]
    fn serializes_with_event_tag() {
        let job = Job::new(JobType::Sms, "x", Priority::Low, serde_json::json!(null), 1, Utc::now());
        let json = serde_json::to_value(QueueEvent::Failed(job)).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["job"]["job_type"], "sms");
    }
}
