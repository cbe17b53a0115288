//! Escalation tier configuration.
//!
//! Tiers are resolved from the facility directory when an alert is created
//! and then frozen on the alert: later configuration edits never touch an
//! in-flight alert.

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One escalation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTier {
    /// 1-based tier number
    pub tier: u32,
    /// Responder roles notified while the alert sits in this tier
    pub roles: BTreeSet<String>,
    /// Seconds before the alert leaves this tier unattended
    pub timeout_secs: u64,
}

impl EscalationTier {
    pub fn new<I, S>(tier: u32, roles: I, timeout_secs: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tier,
            roles: roles.into_iter().map(Into::into).collect(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs.min(i64::MAX as u64) as i64)
    }
}

/// Ordered, validated list of tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationTiers(Vec<EscalationTier>);

impl EscalationTiers {
    /// Validate and wrap a tier list.
    ///
    /// Tiers must be non-empty, numbered 1..=n in order, and have non-zero
    /// timeouts.
    pub fn new(tiers: Vec<EscalationTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(VigilError::Validation(
                "escalation config must have at least one tier".to_string(),
            ));
        }
        for (idx, tier) in tiers.iter().enumerate() {
            let expected = idx as u32 + 1;
            if tier.tier != expected {
                return Err(VigilError::Validation(format!(
                    "tier {} out of order (expected {})",
                    tier.tier, expected
                )));
            }
            if tier.timeout_secs == 0 {
                return Err(VigilError::Validation(format!(
                    "tier {} has a zero timeout",
                    tier.tier
                )));
            }
        }
        Ok(Self(tiers))
    }

    /// Build tiers from plain timeouts, one role set per tier
    pub fn from_timeouts(timeouts: &[(Vec<&str>, u64)]) -> Result<Self> {
        let tiers = timeouts
            .iter()
            .enumerate()
            .map(|(idx, (roles, secs))| {
                EscalationTier::new(idx as u32 + 1, roles.iter().copied(), *secs)
            })
            .collect();
        Self::new(tiers)
    }

    pub fn max_tier(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn get(&self, tier: u32) -> Option<&EscalationTier> {
        if tier == 0 {
            return None;
        }
        self.0.get(tier as usize - 1)
    }

    /// Roles targeted at `tier`, empty if the tier does not exist
    pub fn roles(&self, tier: u32) -> BTreeSet<String> {
        self.get(tier).map(|t| t.roles.clone()).unwrap_or_default()
    }

    /// Roles of every tier up to and including `tier`. An alert stays
    /// visible to each role it has already reached.
    pub fn roles_through(&self, tier: u32) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|t| t.tier <= tier)
            .flat_map(|t| t.roles.iter().cloned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EscalationTier> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_validate_ordering() {
        let bad = vec![
            EscalationTier::new(1, ["nurse"], 60),
            EscalationTier::new(3, ["doctor"], 60),
        ];
        assert!(matches!(
            EscalationTiers::new(bad),
            Err(VigilError::Validation(_))
        ));
    }

    #[test]
    fn test_tiers_reject_empty_and_zero_timeout() {
        assert!(EscalationTiers::new(vec![]).is_err());
        assert!(EscalationTiers::new(vec![EscalationTier::new(1, ["nurse"], 0)]).is_err());
    }

    #[test]
    fn test_tier_lookup() {
        let tiers =
            EscalationTiers::from_timeouts(&[(vec!["nurse"], 120), (vec!["charge_nurse"], 180)])
                .unwrap();
        assert_eq!(tiers.max_tier(), 2);
        assert!(tiers.get(0).is_none());
        assert_eq!(tiers.get(2).unwrap().timeout_secs, 180);
        assert!(tiers.roles(2).contains("charge_nurse"));
        assert!(tiers.roles(3).is_empty());
    }

    #[test]
    fn test_roles_through_accumulates_reached_tiers() {
        let tiers = EscalationTiers::from_timeouts(&[
            (vec!["nurse"], 120),
            (vec!["charge_nurse"], 180),
            (vec!["physician"], 120),
        ])
        .unwrap();
        assert_eq!(tiers.roles_through(1).len(), 1);
        let reached = tiers.roles_through(2);
        assert!(reached.contains("nurse") && reached.contains("charge_nurse"));
        assert!(!reached.contains("physician"));
        assert_eq!(tiers.roles_through(3).len(), 3);
    }
}
