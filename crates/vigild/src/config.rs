//! Configuration management for vigild.
//!
//! Loads settings from /etc/vigil/config.toml or uses defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use vigil_shared::{ChannelKind, EscalationTier, EscalationTiers};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vigil/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/vigil/config.toml";

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Jsonl,
    /// Nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory holding the JSONL logs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/vigil")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// One tier as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub roles: Vec<String>,
    pub timeout_secs: u64,
}

/// Convert config tiers into a validated, 1-numbered tier list
pub fn build_tiers(tiers: &[TierConfig]) -> vigil_shared::Result<EscalationTiers> {
    EscalationTiers::new(
        tiers
            .iter()
            .enumerate()
            .map(|(idx, t)| EscalationTier::new(idx as u32 + 1, t.roles.iter().cloned(), t.timeout_secs))
            .collect(),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Delay before retrying an escalation whose persistence failed
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Tiers for facilities without their own list
    #[serde(default = "default_tiers")]
    pub default_tiers: Vec<TierConfig>,
}

fn default_retry_secs() -> u64 {
    5
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            roles: vec!["responder".to_string()],
            timeout_secs: 120,
        },
        TierConfig {
            roles: vec!["supervisor".to_string()],
            timeout_secs: 180,
        },
        TierConfig {
            roles: vec!["manager".to_string()],
            timeout_secs: 120,
        },
    ]
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            retry_secs: default_retry_secs(),
            default_tiers: default_tiers(),
        }
    }
}

impl EscalationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs.max(1))
    }
}

/// Notification dispatch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attempts per asynchronous job before it is marked dead
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Concurrent in-flight channel deliveries
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Job keys remembered for deduplication
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// Per-subscriber realtime buffer; a full buffer drops the event
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_workers() -> usize {
    16
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_dedup_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            workers: default_workers(),
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Webhook endpoints for the asynchronous channels. A channel without a URL
/// only logs its deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub push_url: Option<String>,
    #[serde(default)]
    pub email_url: Option<String>,
    #[serde(default)]
    pub sms_url: Option<String>,
    #[serde(default = "default_channel_timeout")]
    pub timeout_secs: u64,
}

fn default_channel_timeout() -> u64 {
    10
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            email_url: None,
            sms_url: None,
            timeout_secs: default_channel_timeout(),
        }
    }
}

impl ChannelsConfig {
    pub fn url_for(&self, kind: ChannelKind) -> Option<&str> {
        match kind {
            ChannelKind::Push => self.push_url.as_deref(),
            ChannelKind::Email => self.email_url.as_deref(),
            ChannelKind::Sms => self.sms_url.as_deref(),
            ChannelKind::Realtime => None,
        }
    }
}

/// A responder on a facility roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub id: String,
    pub roles: Vec<String>,
    #[serde(default = "default_responder_channels")]
    pub channels: Vec<ChannelKind>,
}

fn default_responder_channels() -> Vec<ChannelKind> {
    vec![ChannelKind::Push]
}

/// Per-facility escalation tiers and roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityConfig {
    pub id: String,
    /// Empty means the default tiers apply
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub responders: Vec<ResponderConfig>,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub facilities: Vec<FacilityConfig>,
}

impl Config {
    /// Load config from the default locations. Only a missing file falls
    /// back to defaults; a file that exists but does not parse or validate
    /// is an error.
    pub fn load() -> Result<Self> {
        Self::load_first(&[Path::new(CONFIG_PATH), Path::new(DEFAULT_CONFIG_PATH)])
    }

    /// Load the first candidate that exists, or defaults if none does
    pub fn load_first(candidates: &[&Path]) -> Result<Self> {
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load_from_path(path),
            None => {
                warn!("No config file found, using defaults");
                Ok(Config::default())
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject configs the engine could not run with
    pub fn validate(&self) -> Result<()> {
        build_tiers(&self.escalation.default_tiers)
            .context("invalid [escalation] default_tiers")?;
        for facility in &self.facilities {
            if !facility.tiers.is_empty() {
                build_tiers(&facility.tiers)
                    .with_context(|| format!("invalid tiers for facility {}", facility.id))?;
            }
        }
        if self.dispatch.max_attempts == 0 {
            bail!("[dispatch] max_attempts must be at least 1");
        }
        if self.dispatch.workers == 0 || self.dispatch.subscriber_buffer == 0 {
            bail!("[dispatch] workers and subscriber_buffer must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, "127.0.0.1:7870");
        assert_eq!(config.escalation.default_tiers.len(), 3);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[storage]
backend = "memory"

[dispatch]
max_attempts = 3

[channels]
sms_url = "http://sms-gateway.local/send"

[[facilities]]
id = "north-wing"
tiers = [
    { roles = ["nurse"], timeout_secs = 60 },
    { roles = ["charge_nurse", "physician"], timeout_secs = 90 },
]
responders = [
    { id = "alice", roles = ["nurse"], channels = ["push", "sms"] },
    { id = "bob", roles = ["physician"] },
]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.dispatch.max_attempts, 3);
        // Defaults for missing fields
        assert_eq!(config.dispatch.base_backoff_ms, 500);
        assert_eq!(config.escalation.retry_secs, 5);
        assert_eq!(
            config.channels.url_for(ChannelKind::Sms),
            Some("http://sms-gateway.local/send")
        );
        assert!(config.channels.url_for(ChannelKind::Push).is_none());

        let facility = &config.facilities[0];
        assert_eq!(facility.tiers.len(), 2);
        assert_eq!(facility.responders[1].channels, vec![ChannelKind::Push]);
    }

    #[test]
    fn test_invalid_tiers_rejected() {
        let toml_str = r#"
[escalation]
default_tiers = [{ roles = ["nurse"], timeout_secs = 0 }]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nlisten = \"0.0.0.0:9000\"\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert!(Config::load_from_path(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_but_broken_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let fallback = dir.path().join("fallback.toml");

        let config = Config::load_first(&[missing.as_path(), fallback.as_path()]).unwrap();
        assert_eq!(config.escalation.default_tiers.len(), 3);

        fs::write(&fallback, "[server]\nlisten = \"0.0.0.0:9100\"\n").unwrap();
        let config = Config::load_first(&[missing.as_path(), fallback.as_path()]).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9100");

        fs::write(&missing, "[escalation\ndefault_tiers = ").unwrap();
        assert!(Config::load_first(&[missing.as_path(), fallback.as_path()]).is_err());

        fs::write(&missing, "[dispatch]\nmax_attempts = 0\n").unwrap();
        assert!(Config::load_first(&[missing.as_path(), fallback.as_path()]).is_err());
    }
}
