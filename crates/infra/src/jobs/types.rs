//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hookq_core::{JobId, JobType, Priority};

/// Attempt ceiling used when the caller does not supply one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Where a job currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Sitting in its tier queue, waiting to be claimed
    Queued,
    /// Claimed by a worker, dispatcher call in progress
    Processing,
    /// Last attempt failed, waiting for the tier retry delay
    RetryScheduled,
    /// Dispatched successfully
    Completed,
    /// Exhausted `max_attempts`
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Enqueue request as received from a webhook receiver.
///
/// `job_type` is kept as a raw string so that unsupported channels can be
/// rejected with a proper error instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl JobSpec {
    pub fn new(
        job_type: impl Into<String>,
        provider: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            provider: provider.into(),
            payload,
            priority: None,
            max_attempts: None,
        }
    }

    /// Skip classification and pin the job to a tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// One inbound webhook event travelling through the queue.
///
/// `id`, `job_type`, `priority` and `enqueued_at` are fixed once the job is
/// enqueued; only the attempt bookkeeping changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub provider: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times a worker has claimed this job
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(
        job_type: JobType,
        provider: impl Into<String>,
        priority: Priority,
        payload: serde_json::Value,
        max_attempts: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            provider: provider.into(),
            priority,
            payload,
            enqueued_at,
            attempts: 0,
            max_attempts,
            next_retry_at: None,
            last_error: None,
            status: JobStatus::Queued,
        }
    }

    /// Whether another attempt is allowed after the current one failed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Mark job as claimed by a worker.
    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.attempts = (self.attempts + 1).min(self.max_attempts);
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
    }

    /// Remember why the current attempt failed.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn schedule_retry(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::RetryScheduled;
        self.next_retry_at = Some(at);
    }

    /// Back in its queue after the retry delay elapsed.
    pub fn mark_requeued(&mut self) {
        self.status = JobStatus::Queued;
        self.next_retry_at = None;
    }

    pub fn mark_failed(&mut self) {
        self.status = JobStatus::Failed;
        self.next_retry_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(max_attempts: u32) -> Job {
        Job::new(
            JobType::Sms,
            "twilio",
            Priority::Normal,
            serde_json::json!({"text": "ciao"}),
            max_attempts,
            Utc::now(),
        )
    }

    #[test]
    fn job_lifecycle() {
        let mut job = test_job(3);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);

        job.mark_processing();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        job.mark_completed();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn job_failure_and_retry() {
        let mut job = test_job(2);

        job.mark_processing();
        job.record_failure("timeout");
        assert!(job.can_retry());

        let at = Utc::now();
        job.schedule_retry(at);
        assert_eq!(job.next_retry_at, Some(at));
        assert_eq!(job.status, JobStatus::RetryScheduled);

        job.mark_requeued();
        assert_eq!(job.next_retry_at, None);

        job.mark_processing();
        job.record_failure("timeout again");
        assert!(!job.can_retry());
        job.mark_failed();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("timeout again"));
    }

    #[test]
    fn attempts_never_exceed_max() {
        let mut job = test_job(1);
        job.mark_processing();
        job.mark_processing();
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn spec_deserializes_with_optional_fields() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"type": "whatsapp", "provider": "meta", "payload": "errore pagamento"}"#,
        )
        .unwrap();

        assert_eq!(spec.job_type, "whatsapp");
        assert_eq!(spec.priority, None);
        assert_eq!(spec.max_attempts, None);

        let spec: JobSpec =
            serde_json::from_str(r#"{"type": "sms", "priority": "low", "max_attempts": 5}"#)
                .unwrap();
        assert_eq!(spec.priority, Some(Priority::Low));
        assert_eq!(spec.max_attempts, Some(5));
        assert!(spec.payload.is_null());
    }
}
