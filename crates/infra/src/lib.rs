//! Queue runtime: configuration, tier queues, worker pools, retries.

pub mod config;
pub mod jobs;


pub use config::{ConfigError, QueueConfig, TierConfig, TierTable};
pub use jobs::{JobSpec, QueueError, QueueManager};
