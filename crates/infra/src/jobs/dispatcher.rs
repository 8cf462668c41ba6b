//! Dispatcher seam between the queue and the messaging channels.
//!
//! The queue never delivers anything itself. Workers hand each claimed job to
//! a [`Dispatcher`]; [`ChannelDispatcher`] routes by [`JobType`] to one
//! injected [`ChannelHandler`] per channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hookq_core::JobType;

use super::types::Job;

/// Failure reported by a dispatcher. Every variant is retried until the job
/// runs out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Expected downstream failure (provider down, rate limited, rejected...).
    #[error("dispatch failed: {0}")]
    Transient(String),
    /// The handler panicked; the worker survived.
    #[error("dispatcher panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

/// Processes one job. Called concurrently from many workers.
pub trait Dispatcher: Send + Sync + 'static {
    fn process(&self, job: &Job) -> Result<(), DispatchError>;
}

impl<F> Dispatcher for F
where
    F: Fn(&Job) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    fn process(&self, job: &Job) -> Result<(), DispatchError> {
        self(job)
    }
}

/// Channel-specific processing (WhatsApp, SMS, email, messenger).
pub trait ChannelHandler: Send + Sync + 'static {
    fn handle(&self, job: &Job) -> Result<(), DispatchError>;
}

impl<F> ChannelHandler for F
where
    F: Fn(&Job) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> Result<(), DispatchError> {
        self(job)
    }
}

/// Routes jobs to the handler registered for their channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    whatsapp: Arc<dyn ChannelHandler>,
    sms: Arc<dyn ChannelHandler>,
    email: Arc<dyn ChannelHandler>,
    messenger: Arc<dyn ChannelHandler>,
}

impl ChannelDispatcher {
    pub fn new(
        whatsapp: Arc<dyn ChannelHandler>,
        sms: Arc<dyn ChannelHandler>,
        email: Arc<dyn ChannelHandler>,
        messenger: Arc<dyn ChannelHandler>,
    ) -> Self {
        Self {
            whatsapp,
            sms,
            email,
            messenger,
        }
    }

    /// Same handler for every channel.
    pub fn uniform(handler: Arc<dyn ChannelHandler>) -> Self {
        Self::new(handler.clone(), handler.clone(), handler.clone(), handler)
    }

    pub fn handler(&self, job_type: JobType) -> &dyn ChannelHandler {
        match job_type {
            JobType::WhatsApp => self.whatsapp.as_ref(),
            JobType::Sms => self.sms.as_ref(),
            JobType::Email => self.email.as_ref(),
            JobType::Messenger => self.messenger.as_ref(),
        }
    }
}

impl core::fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelDispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher for ChannelDispatcher {
    fn process(&self, job: &Job) -> Result<(), DispatchError> {
        self.handler(job.job_type).handle(job)
    }
}

/// Run the dispatcher, turning a panic into a [`DispatchError::Panicked`].
pub(crate) fn dispatch_guarded(dispatcher: &dyn Dispatcher, job: &Job) -> Result<(), DispatchError> {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatcher.process(job))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(DispatchError::Panicked(msg))
        }
    }
}
