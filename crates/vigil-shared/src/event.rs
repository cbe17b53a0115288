//! Alert lifecycle events, as delivered to subscribers and channels.
//!
//! Consumers keep the last `sequence` seen per alert; a gap means an event
//! was missed and the client should resync from the active-alert snapshot.

use crate::alert::{Alert, AlertId, AlertStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Escalated,
    Acknowledged,
    /// A response was recorded without changing status or ownership
    ResponseAdded,
    Resolved,
    Expired,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Escalated => write!(f, "escalated"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::ResponseAdded => write!(f, "response_added"),
            Self::Resolved => write!(f, "resolved"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub facility_id: String,
    pub location: String,
    pub alert_type: String,
    pub urgency: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Wire shape: `{sequence, alert_id, event_type, tier, status, timestamp, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub sequence: u64,
    pub alert_id: AlertId,
    pub event_type: EventType,
    pub tier: u32,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl AlertEvent {
    /// Snapshot an event from the alert's committed state
    pub fn from_alert(
        alert: &Alert,
        event_type: EventType,
        actor: Option<&str>,
        note: Option<&str>,
    ) -> Self {
        Self {
            sequence: alert.sequence,
            alert_id: alert.id,
            event_type,
            tier: alert.current_tier,
            status: alert.status,
            timestamp: alert.updated_at,
            payload: EventPayload {
                facility_id: alert.facility_id.clone(),
                location: alert.location.clone(),
                alert_type: alert.alert_type.clone(),
                urgency: alert.urgency,
                actor: actor.map(str::to_string),
                acknowledged_by: alert.acknowledged_by.clone(),
                note: note.map(str::to_string),
            },
        }
    }
}
