//! Engine state: the alert book and the write-ahead commit path.

use crate::audit::AuditEmitter;
use crate::directory::{FacilityDirectory, Recipients};
use crate::dispatcher::Dispatcher;
use crate::store::AlertStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use vigil_shared::{
    AcknowledgmentRecord, Alert, AlertEvent, AlertId, AlertStatus, AuditEntry, Result, VigilError,
};

/// Everything guarded by one alert's lock
#[derive(Debug, Clone)]
pub struct AlertSlot {
    pub alert: Alert,
    /// Recipients of the current tier, fixed at the last tier transition
    pub recipients: Recipients,
}

pub type SharedSlot = Arc<Mutex<AlertSlot>>;

/// Every alert the engine owns, each behind its own lock
#[derive(Default)]
pub struct AlertBook {
    slots: RwLock<HashMap<AlertId, SharedSlot>>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, alert_id: AlertId) -> Option<SharedSlot> {
        self.slots.read().await.get(&alert_id).cloned()
    }

    pub async fn insert(&self, alert: Alert, recipients: Recipients) -> SharedSlot {
        let slot = Arc::new(Mutex::new(AlertSlot { alert, recipients }));
        let id = slot.lock().await.alert.id;
        self.slots.write().await.insert(id, slot.clone());
        slot
    }

    /// Committed copy of every alert
    pub async fn snapshot(&self) -> Vec<Alert> {
        let slots: Vec<SharedSlot> = self.slots.read().await.values().cloned().collect();
        let mut alerts = Vec::with_capacity(slots.len());
        for slot in slots {
            alerts.push(slot.lock().await.alert.clone());
        }
        alerts
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

/// Collaborators shared by the scheduler and the coordinator
pub struct EngineState {
    pub book: AlertBook,
    pub store: Arc<dyn AlertStore>,
    pub directory: Arc<dyn FacilityDirectory>,
    pub dispatcher: Dispatcher,
    pub audit: AuditEmitter,
}

impl EngineState {
    pub fn new(
        store: Arc<dyn AlertStore>,
        directory: Arc<dyn FacilityDirectory>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            book: AlertBook::new(),
            audit: AuditEmitter::new(store.clone()),
            store,
            directory,
            dispatcher,
        }
    }

    /// Persist a transition before it is applied in memory. The
    /// acknowledgment record (if any) and the audit entry go first; the alert
    /// snapshot is written last and is the commit point. A failure at any
    /// step leaves the stored alert at its previous sequence, and the
    /// fragments already written are ignored by the readers below.
    pub async fn persist(
        &self,
        alert: &Alert,
        record: Option<&AcknowledgmentRecord>,
        event: &AlertEvent,
        from: Option<AlertStatus>,
    ) -> Result<AuditEntry> {
        alert.check_invariant().map_err(VigilError::Internal)?;

        if let Some(record) = record {
            self.store.persist_acknowledgment(record).await?;
        }
        let entry = self.audit.record(event, from).await?;
        self.store.persist_alert(alert).await?;
        Ok(entry)
    }

    /// Committed acknowledgment records of one alert, in append order
    pub async fn acknowledgments(&self, alert_id: AlertId) -> Result<Vec<AcknowledgmentRecord>> {
        let sequence = self.committed_sequence(alert_id).await?;
        let records = self.store.load_acknowledgments(alert_id).await?;
        Ok(committed(records, sequence, |r| r.sequence))
    }

    /// Committed audit history of one alert, oldest first
    pub async fn history(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>> {
        let sequence = self.committed_sequence(alert_id).await?;
        let entries = self.audit.history(alert_id).await?;
        Ok(committed(entries, sequence, |e| e.sequence))
    }

    async fn committed_sequence(&self, alert_id: AlertId) -> Result<u64> {
        let slot = self
            .book
            .get(alert_id)
            .await
            .ok_or_else(|| VigilError::NotFound(alert_id.to_string()))?;
        let sequence = slot.lock().await.alert.sequence;
        Ok(sequence)
    }
}

/// Drop fragments of transitions that never committed: anything past the
/// committed sequence, and every write but the last for a retried sequence.
fn committed<T>(items: Vec<T>, committed: u64, sequence: impl Fn(&T) -> u64) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let seq = sequence(&item);
        if seq > committed {
            continue;
        }
        kept.retain(|k| sequence(k) != seq);
        kept.push(item);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_shared::{CreateAlertRequest, EscalationTiers};

    fn alert(location: &str) -> Alert {
        Alert::new(
            CreateAlertRequest {
                facility_id: "north".to_string(),
                location: location.to_string(),
                alert_type: "fall".to_string(),
                urgency: 3,
                description: String::new(),
                created_by: "x".to_string(),
            },
            EscalationTiers::from_timeouts(&[(vec!["nurse"], 60)]).unwrap(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_book_insert_get_snapshot() {
        let book = AlertBook::new();
        assert!(book.is_empty().await);

        let a = alert("bed 1");
        let id = a.id;
        book.insert(a, Recipients::default()).await;
        book.insert(alert("bed 2"), Recipients::default()).await;

        assert_eq!(book.len().await, 2);
        let slot = book.get(id).await.unwrap();
        assert_eq!(slot.lock().await.alert.location, "bed 1");
        assert!(book.get(AlertId::new()).await.is_none());
        assert_eq!(book.snapshot().await.len(), 2);
    }

    #[test]
    fn test_committed_drops_orphans_and_keeps_retry() {
        // seq 2 failed once and was retried; seq 3 never committed
        let writes = vec![(1, "created"), (2, "first try"), (2, "retry"), (3, "torn")];
        let kept = committed(writes, 2, |w| w.0);
        assert_eq!(kept, vec![(1, "created"), (2, "retry")]);
    }
}
