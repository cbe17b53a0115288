//! JSONL store - append-only, fsync'd logs under the data directory.
//!
//! Alerts are appended as full snapshots; loading keeps the last snapshot
//! seen per alert id. Acknowledgments and audit entries are never rewritten.

use super::AlertStore;
use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use vigil_shared::{AcknowledgmentRecord, Alert, AlertId, AuditEntry, Result, VigilError};

const ALERTS_FILE: &str = "alerts.jsonl";
const ACKS_FILE: &str = "acknowledgments.jsonl";
const AUDIT_FILE: &str = "audit.jsonl";

/// One append-only JSONL file
struct LogFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn append<T: Serialize>(&self, value: &T) -> AnyResult<()> {
        let json = serde_json::to_string(value)? + "\n";

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        file.write_all(json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {}", self.path.display()))?;

        Ok(())
    }

    async fn read_all<T: DeserializeOwned>(&self) -> AnyResult<Vec<T>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line after a crash is expected; skip it.
                Err(e) => warn!(
                    "Skipping unreadable line {} in {}: {}",
                    lineno + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}

/// Durable store backed by three JSONL files
pub struct JsonlStore {
    dir: PathBuf,
    alerts: LogFile,
    acknowledgments: LogFile,
    audit: LogFile,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> AnyResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

        info!("JSONL store initialized: {}", dir.display());

        Ok(Self {
            alerts: LogFile::new(dir.join(ALERTS_FILE)),
            acknowledgments: LogFile::new(dir.join(ACKS_FILE)),
            audit: LogFile::new(dir.join(AUDIT_FILE)),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn persistence(e: anyhow::Error) -> VigilError {
    VigilError::Persistence(format!("{:#}", e))
}

#[async_trait]
impl AlertStore for JsonlStore {
    async fn persist_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.append(alert).await.map_err(persistence)
    }

    async fn persist_acknowledgment(&self, record: &AcknowledgmentRecord) -> Result<()> {
        self.acknowledgments.append(record).await.map_err(persistence)
    }

    async fn persist_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.append(entry).await.map_err(persistence)
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>> {
        let snapshots: Vec<Alert> = self.alerts.read_all().await.map_err(persistence)?;

        let mut latest: HashMap<AlertId, Alert> = HashMap::new();
        for alert in snapshots {
            latest.insert(alert.id, alert);
        }

        let mut alerts: Vec<Alert> = latest.into_values().collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn load_acknowledgments(&self, alert_id: AlertId) -> Result<Vec<AcknowledgmentRecord>> {
        let records: Vec<AcknowledgmentRecord> =
            self.acknowledgments.read_all().await.map_err(persistence)?;
        Ok(records.into_iter().filter(|r| r.alert_id == alert_id).collect())
    }

    async fn load_audit(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>> {
        let entries: Vec<AuditEntry> = self.audit.read_all().await.map_err(persistence)?;
        Ok(entries.into_iter().filter(|e| e.alert_id == alert_id).collect())
    }
}
