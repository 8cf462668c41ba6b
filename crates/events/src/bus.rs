//! Event publishing/subscription abstraction (mechanics only).
//!
//! The queue emits lifecycle events (`enqueued`, `completed`, `retry_scheduled`,
//! `failed`) for logging and notification collaborators. Emission is
//! **fire-and-forget**:
//!
//! - Publishing never waits for a subscriber to consume
//! - A slow or dropped subscriber never affects the emitting worker
//! - No persistence: events that nobody is subscribed to are gone

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every event published after it was created
/// (broadcast semantics).
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => log(event),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Wait until `deadline` for the first message matching `pred`.
    ///
    /// Non-matching messages are consumed and discarded. Returns `None` on
    /// timeout or once every publisher is gone.
    pub fn recv_matching<F>(&self, deadline: Instant, mut pred: F) -> Option<M>
    where
        F: FnMut(&M) -> bool,
    {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = self.receiver.recv_timeout(remaining).ok()?;
            if pred(&message) {
                return Some(message);
            }
        }
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// Implementations must be `Send + Sync`: every worker thread publishes
/// concurrently. `publish` must not block on subscribers.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
