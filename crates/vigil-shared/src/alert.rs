//! Alert record and its status machine.
//!
//! An alert moves Active -> (Escalated)* -> Acknowledged -> Resolved, or runs
//! out of tiers and becomes Expired. Resolved and Expired are terminal.

use crate::error::{Result, VigilError};
use crate::tier::EscalationTiers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum accepted length of a location identifier
pub const MAX_LOCATION_LEN: usize = 128;

/// Maximum accepted length of a free-form description
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Alert identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| VigilError::Validation(format!("malformed alert id: {}", s)))
    }
}

/// Alert status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Escalated,
    Resolved,
    Expired,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Expired)
    }

    /// Statuses in which the escalation timer keeps running
    pub fn is_escalating(&self) -> bool {
        matches!(self, Self::Active | Self::Escalated)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Escalated => write!(f, "escalated"),
            Self::Resolved => write!(f, "resolved"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Inbound request to raise an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    pub facility_id: String,
    pub location: String,
    pub alert_type: String,
    pub urgency: u8,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
}

impl CreateAlertRequest {
    /// Reject malformed urgency, location, or missing identity fields
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.urgency) {
            return Err(VigilError::Validation(format!(
                "urgency must be between 1 and 5, got {}",
                self.urgency
            )));
        }
        validate_location(&self.location)?;
        if self.facility_id.trim().is_empty() {
            return Err(VigilError::Validation("facility_id is required".to_string()));
        }
        if self.alert_type.trim().is_empty() {
            return Err(VigilError::Validation("alert_type is required".to_string()));
        }
        if self.created_by.trim().is_empty() {
            return Err(VigilError::Validation("created_by is required".to_string()));
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(VigilError::Validation(format!(
                "description exceeds {} bytes",
                MAX_DESCRIPTION_LEN
            )));
        }
        Ok(())
    }
}

fn validate_location(location: &str) -> Result<()> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(VigilError::Validation("location is required".to_string()));
    }
    if trimmed.len() > MAX_LOCATION_LEN {
        return Err(VigilError::Validation(format!(
            "location exceeds {} bytes",
            MAX_LOCATION_LEN
        )));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(VigilError::Validation(
            "location contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// An alert, owned by the engine once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub facility_id: String,
    pub location: String,
    pub alert_type: String,
    pub urgency: u8,
    #[serde(default)]
    pub description: String,
    pub status: AlertStatus,
    pub current_tier: u32,
    /// Deadline of the next tier transition
    pub next_escalation_at: Option<DateTime<Utc>>,
    /// Deadline at which the last tier expires
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Per-alert event counter, bumped on every emitted event
    pub sequence: u64,
    /// Tier configuration frozen at creation
    pub tiers: EscalationTiers,
}

impl Alert {
    /// Build a fresh tier-1 alert. The request must already be validated.
    pub fn new(req: CreateAlertRequest, tiers: EscalationTiers, now: DateTime<Utc>) -> Self {
        let mut alert = Self {
            id: AlertId::new(),
            facility_id: req.facility_id,
            location: req.location.trim().to_string(),
            alert_type: req.alert_type,
            urgency: req.urgency,
            description: req.description,
            status: AlertStatus::Active,
            current_tier: 1,
            next_escalation_at: None,
            expires_at: None,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
            acknowledged_by: None,
            resolved_by: None,
            resolved_at: None,
            sequence: 0,
            tiers,
        };
        alert.reschedule(now);
        alert
    }

    pub fn max_tier(&self) -> u32 {
        self.tiers.max_tier()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whichever deadline is armed, escalation or expiry
    pub fn pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_escalation_at.or(self.expires_at)
    }

    /// Recompute deadlines for the current status and tier, counting from `now`
    pub fn reschedule(&mut self, now: DateTime<Utc>) {
        self.next_escalation_at = None;
        self.expires_at = None;
        if !self.status.is_escalating() {
            return;
        }
        let Some(tier) = self.tiers.get(self.current_tier) else {
            return;
        };
        let deadline = now + tier.timeout();
        if self.current_tier < self.max_tier() {
            self.next_escalation_at = Some(deadline);
        } else {
            self.expires_at = Some(deadline);
        }
    }

    /// Allocate the next event sequence number
    pub fn bump_sequence(&mut self, now: DateTime<Utc>) -> u64 {
        self.sequence += 1;
        self.updated_at = now;
        self.sequence
    }

    /// Check the deadline invariant: `next_escalation_at` is set exactly when
    /// the alert is escalating below its last tier.
    pub fn check_invariant(&self) -> std::result::Result<(), String> {
        let should_escalate =
            self.status.is_escalating() && self.current_tier < self.max_tier();
        if self.next_escalation_at.is_some() != should_escalate {
            return Err(format!(
                "alert {}: next_escalation_at={:?} with status={} tier={}/{}",
                self.id,
                self.next_escalation_at,
                self.status,
                self.current_tier,
                self.max_tier()
            ));
        }
        if self.expires_at.is_some() && !self.status.is_escalating() {
            return Err(format!(
                "alert {}: expiry armed in status {}",
                self.id, self.status
            ));
        }
        if self.current_tier == 0 || self.current_tier > self.max_tier() {
            return Err(format!(
                "alert {}: tier {} outside 1..={}",
                self.id,
                self.current_tier,
                self.max_tier()
            ));
        }
        Ok(())
    }
}
