//! Priority webhook job queue.
//!
//! ## Design
//!
//! - Four independent tiers (urgent, high, normal, low), each with its own
//!   FIFO queue and fixed-size worker pool
//! - Priority comes from the caller or from keyword classification of the payload
//! - Failed attempts are retried after a fixed per-tier delay, at the head of
//!   the tier queue, until `max_attempts` is reached
//! - Lifecycle events (`enqueued`, `completed`, `retry_scheduled`, `failed`)
//!   are published on an in-process bus
//! - Everything is in memory; jobs do not survive a restart
//!
//! ## Components
//!
//! - `QueueManager`: façade used by webhook receivers and admin tooling
//! - `PriorityClassifier`: payload → tier
//! - `WorkerPool`: threads draining one tier
//! - `RetryScheduler`: delay queue and timer thread
//! - `Dispatcher`: injected per-job processing (`ChannelDispatcher` routes by channel)

pub mod classifier;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod types;

pub use classifier::{ClassifierConfig, PriorityClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{ChannelDispatcher, ChannelHandler, DispatchError, Dispatcher};
pub use error::QueueError;
pub use events::{EventEmitter, QueueEvent, QueueEventEnvelope};
pub use manager::QueueManager;
pub use pool::{InFlight, WorkerPool};
pub use queue::{JobQueue, TierQueues};
pub use retry::{RetryDecision, RetryScheduler};
pub use stats::{StatsCollector, StatsSnapshot};
pub use types::{DEFAULT_MAX_ATTEMPTS, Job, JobSpec, JobStatus};
