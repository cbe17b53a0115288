//! Audit emitter - one immutable entry per committed transition

use crate::store::AlertStore;
use std::sync::Arc;
use tracing::debug;
use vigil_shared::{AlertEvent, AlertId, AlertStatus, AuditEntry, Result};

/// Writes audit entries through the store's append-only log
pub struct AuditEmitter {
    store: Arc<dyn AlertStore>,
}

impl AuditEmitter {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Record the transition that produced `event`. `from` is the status
    /// before the transition (`None` on creation).
    pub async fn record(&self, event: &AlertEvent, from: Option<AlertStatus>) -> Result<AuditEntry> {
        let entry = AuditEntry::for_event(event, from);
        self.store.persist_audit_entry(&entry).await?;
        debug!(
            alert_id = %entry.alert_id,
            sequence = entry.sequence,
            tier = entry.tier,
            "Audit: {} ({:?} -> {})",
            entry.event_type,
            entry.from_status,
            entry.to_status
        );
        Ok(entry)
    }

    /// Full history of one alert, oldest first
    pub async fn history(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>> {
        let mut entries = self.store.load_audit(alert_id).await?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use vigil_shared::{Alert, CreateAlertRequest, EscalationTiers, EventType, VigilError};

    fn created_event() -> AlertEvent {
        let now = Utc::now();
        let mut alert = Alert::new(
            CreateAlertRequest {
                facility_id: "north".to_string(),
                location: "bed 4".to_string(),
                alert_type: "fall".to_string(),
                urgency: 4,
                description: String::new(),
                created_by: "sensor-2".to_string(),
            },
            EscalationTiers::from_timeouts(&[(vec!["nurse"], 60)]).unwrap(),
            now,
        );
        alert.bump_sequence(now);
        AlertEvent::from_alert(&alert, EventType::Created, Some("sensor-2"), None)
    }

    #[tokio::test]
    async fn test_record_and_history() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditEmitter::new(store.clone());
        let event = created_event();

        let entry = audit.record(&event, None).await.unwrap();
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.actor.as_deref(), Some("sensor-2"));
        assert_eq!(entry.to_status, AlertStatus::Active);

        let history = audit.history(event.alert_id).await.unwrap();
        assert_eq!(history, vec![entry]);
    }

    #[tokio::test]
    async fn test_record_fails_when_store_rejects() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let audit = AuditEmitter::new(store.clone());

        let err = audit.record(&created_event(), None).await.unwrap_err();
        assert!(matches!(err, VigilError::Persistence(_)));
        assert!(store.audit_log().is_empty());
    }
}
