//! Immutable audit entries, one per committed transition.

use crate::alert::{AlertId, AlertStatus};
use crate::event::{AlertEvent, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub alert_id: AlertId,
    pub sequence: u64,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Status before the transition, `None` for creation
    pub from_status: Option<AlertStatus>,
    pub to_status: AlertStatus,
    pub tier: u32,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditEntry {
    pub fn for_event(event: &AlertEvent, from_status: Option<AlertStatus>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            alert_id: event.alert_id,
            sequence: event.sequence,
            event_type: event.event_type,
            actor: event.payload.actor.clone(),
            from_status,
            to_status: event.status,
            tier: event.tier,
            recorded_at: event.timestamp,
            note: event.payload.note.clone(),
        }
    }
}
