//! Supported inbound channels.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Channel a webhook event arrived on.
///
/// Dispatch is a match over this enum, so adding a channel is a compile error
/// everywhere a handler is missing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Sms,
    Email,
    Messenger,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::WhatsApp,
        JobType::Sms,
        JobType::Email,
        JobType::Messenger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::WhatsApp => "whatsapp",
            JobType::Sms => "sms",
            JobType::Email => "email",
            JobType::Messenger => "messenger",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(JobType::WhatsApp),
            "sms" => Ok(JobType::Sms),
            "email" => Ok(JobType::Email),
            "messenger" => Ok(JobType::Messenger),
            _ => Err(CoreError::unsupported_job_type(s)),
        }
    }
}
