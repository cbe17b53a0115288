//! Durable storage contract.
//!
//! The engine treats a successful write as the precondition for committing a
//! transition: state in memory never runs ahead of what the store holds.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use vigil_shared::{AcknowledgmentRecord, Alert, AlertId, AuditEntry, Result};

/// Storage collaborator. All errors are `VigilError::Persistence`.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Write the latest version of an alert
    async fn persist_alert(&self, alert: &Alert) -> Result<()>;

    async fn persist_acknowledgment(&self, record: &AcknowledgmentRecord) -> Result<()>;

    async fn persist_audit_entry(&self, entry: &AuditEntry) -> Result<()>;

    /// Latest version of every alert ever persisted
    async fn load_alerts(&self) -> Result<Vec<Alert>>;

    /// Records for one alert, in append order
    async fn load_acknowledgments(&self, alert_id: AlertId) -> Result<Vec<AcknowledgmentRecord>>;

    /// Audit entries for one alert, in append order
    async fn load_audit(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>>;
}
