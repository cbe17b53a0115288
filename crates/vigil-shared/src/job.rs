//! Notification jobs: one event, one recipient, one channel.

use crate::alert::AlertId;
use crate::event::AlertEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Live subscriber connection, best-effort
    Realtime,
    Push,
    Email,
    Sms,
}

impl ChannelKind {
    /// Asynchronous channels get queued, retried jobs
    pub const ASYNC: [ChannelKind; 3] = [ChannelKind::Push, ChannelKind::Email, ChannelKind::Sms];

    pub fn is_async(&self) -> bool {
        !matches!(self, Self::Realtime)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realtime => write!(f, "realtime"),
            Self::Push => write!(f, "push"),
            Self::Email => write!(f, "email"),
            Self::Sms => write!(f, "sms"),
        }
    }
}

/// Deduplication key for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub alert_id: AlertId,
    pub sequence: u64,
    pub channel: ChannelKind,
    pub recipient_id: String,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}/{}/{}",
            self.alert_id, self.sequence, self.channel, self.recipient_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Sent,
    /// Last attempt failed, more attempts remain
    Failed,
    /// Retries exhausted
    Dead,
    /// A newer event for the same recipient was already delivered
    Superseded,
}

impl JobStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Sent | Self::Dead | Self::Superseded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub key: JobKey,
    pub payload: AlertEvent,
    pub attempt_count: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl NotificationJob {
    pub fn new(channel: ChannelKind, recipient_id: &str, event: &AlertEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: JobKey {
                alert_id: event.alert_id,
                sequence: event.sequence,
                channel,
                recipient_id: recipient_id.to_string(),
            },
            payload: event.clone(),
            attempt_count: 0,
            status: JobStatus::Pending,
            last_error: None,
        }
    }
}

/// Operational signal raised when a job exhausts its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub key: JobKey,
    pub attempts: u32,
    pub last_error: String,
    pub at: DateTime<Utc>,
}
