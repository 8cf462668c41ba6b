//! Errors surfaced synchronously by the queue façade.
//!
//! Per-job processing failures are not here: they are retried, and a job that
//! exhausts its attempts is reported through the `failed` event and the
//! `failed` counter only.

/// Queue façade error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The job type is not one of whatsapp/sms/email/messenger.
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    #[error("max_attempts must be at least 1 (got {0})")]
    InvalidMaxAttempts(u32),

    /// Enqueue after shutdown began.
    #[error("queue is shutting down")]
    ShuttingDown,

    /// In-flight jobs did not finish within the shutdown timeout; they were
    /// left running, not killed.
    #[error("shutdown timed out with {in_flight} job(s) still in flight")]
    ShutdownTimeout { in_flight: usize },

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
