//! In-memory store for tests and ephemeral runs.

use super::AlertStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use vigil_shared::{AcknowledgmentRecord, Alert, AlertId, AuditEntry, Result, VigilError};

#[derive(Default)]
struct Inner {
    alerts: HashMap<AlertId, Alert>,
    acknowledgments: Vec<AcknowledgmentRecord>,
    audit: Vec<AuditEntry>,
}

/// Store backed by process memory. Writes can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every audit entry across all alerts, in append order
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.lock().map(|inner| inner.audit.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| VigilError::Persistence("memory store poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VigilError::Persistence(
                "memory store rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn persist_alert(&self, alert: &Alert) -> Result<()> {
        self.check_writable()?;
        self.lock()?.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn persist_acknowledgment(&self, record: &AcknowledgmentRecord) -> Result<()> {
        self.check_writable()?;
        self.lock()?.acknowledgments.push(record.clone());
        Ok(())
    }

    async fn persist_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.check_writable()?;
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.lock()?.alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn load_acknowledgments(&self, alert_id: AlertId) -> Result<Vec<AcknowledgmentRecord>> {
        Ok(self
            .lock()?
            .acknowledgments
            .iter()
            .filter(|r| r.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn load_audit(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect())
    }
}
