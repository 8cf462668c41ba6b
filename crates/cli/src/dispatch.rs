//! Stand-in channel handlers: log the delivery instead of calling a provider.

use std::sync::Arc;

use tracing::info;

use hookq_core::JobType;
use hookq_infra::jobs::{ChannelDispatcher, ChannelHandler, DispatchError, Job};

#[derive(Debug, Clone, Copy)]
pub struct LoggingHandler {
    channel: JobType,
}

impl LoggingHandler {
    pub fn new(channel: JobType) -> Self {
        Self { channel }
    }
}

impl ChannelHandler for LoggingHandler {
    fn handle(&self, job: &Job) -> Result<(), DispatchError> {
        info!(
            channel = %self.channel,
            job_id = %job.id,
            provider = %job.provider,
            priority = %job.priority,
            attempt = job.attempts,
            "delivered"
        );
        Ok(())
    }
}

pub fn logging_dispatcher() -> ChannelDispatcher {
    let handler = |channel| -> Arc<dyn ChannelHandler> { Arc::new(LoggingHandler::new(channel)) };
    ChannelDispatcher::new(
        handler(JobType::WhatsApp),
        handler(JobType::Sms),
        handler(JobType::Email),
        handler(JobType::Messenger),
    )
}
