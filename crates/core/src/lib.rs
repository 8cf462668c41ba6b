//! `hookq-core`: shared vocabulary for the webhook queue.
//!
//! This crate contains **pure domain** primitives (no threads, no IO).

pub mod channel;
pub mod error;
pub mod id;
pub mod priority;

pub use channel::JobType;
pub use error::{CoreError, CoreResult};
pub use id::{EventId, JobId};
pub use priority::Priority;
