//! Facility directory - where escalation tiers and responder rosters come from.
//!
//! The directory is an external collaborator; `StaticDirectory` serves it
//! from the `[[facilities]]` config section.

use crate::config::{build_tiers, Config, FacilityConfig, TierConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;
use vigil_shared::{Alert, ChannelKind, EscalationTiers, Result};

/// Someone who can be notified over asynchronous channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responder {
    pub id: String,
    pub channels: Vec<ChannelKind>,
}

#[async_trait]
pub trait FacilityDirectory: Send + Sync {
    /// Tier configuration for a new alert; read once at creation
    async fn escalation_tiers(&self, facility_id: &str, alert_type: &str) -> Result<EscalationTiers>;

    /// Responders holding any of `roles` in the facility, ordered by id
    async fn responders(&self, facility_id: &str, roles: &BTreeSet<String>) -> Result<Vec<Responder>>;
}

/// Directory served from configuration
pub struct StaticDirectory {
    facilities: HashMap<String, FacilityConfig>,
    default_tiers: Vec<TierConfig>,
}

impl StaticDirectory {
    pub fn new(facilities: Vec<FacilityConfig>, default_tiers: Vec<TierConfig>) -> Self {
        Self {
            facilities: facilities.into_iter().map(|f| (f.id.clone(), f)).collect(),
            default_tiers,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.facilities.clone(),
            config.escalation.default_tiers.clone(),
        )
    }
}

#[async_trait]
impl FacilityDirectory for StaticDirectory {
    async fn escalation_tiers(&self, facility_id: &str, _alert_type: &str) -> Result<EscalationTiers> {
        let tiers = match self.facilities.get(facility_id) {
            Some(facility) if !facility.tiers.is_empty() => &facility.tiers,
            _ => &self.default_tiers,
        };
        build_tiers(tiers)
    }

    async fn responders(&self, facility_id: &str, roles: &BTreeSet<String>) -> Result<Vec<Responder>> {
        let Some(facility) = self.facilities.get(facility_id) else {
            return Ok(vec![]);
        };

        let mut by_id: BTreeMap<String, BTreeSet<ChannelKind>> = BTreeMap::new();
        for responder in &facility.responders {
            if responder.roles.iter().any(|r| roles.contains(r)) {
                by_id
                    .entry(responder.id.clone())
                    .or_default()
                    .extend(responder.channels.iter().copied().filter(|c| c.is_async()));
            }
        }

        Ok(by_id
            .into_iter()
            .map(|(id, channels)| Responder {
                id,
                channels: channels.into_iter().collect(),
            })
            .collect())
    }
}

/// Recipient list for one tier of one alert.
///
/// Computed once per tier transition and reused for every later event of the
/// same tier, so routing does not drift mid-tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recipients {
    pub tier: u32,
    /// Roles targeted by the current tier
    pub roles: BTreeSet<String>,
    /// Roles whose subscribers see the alert's events: every tier reached so far
    pub audience: BTreeSet<String>,
    pub responders: Vec<Responder>,
}

impl Recipients {
    /// Resolve recipients for the alert's current tier. A directory failure
    /// degrades to role-only routing rather than blocking the transition.
    pub async fn resolve(directory: &dyn FacilityDirectory, alert: &Alert) -> Self {
        let roles = alert.tiers.roles(alert.current_tier);
        let responders = match directory.responders(&alert.facility_id, &roles).await {
            Ok(responders) => responders,
            Err(e) => {
                warn!(
                    alert_id = %alert.id,
                    tier = alert.current_tier,
                    "Responder lookup failed, notifying subscribers only: {}",
                    e
                );
                vec![]
            }
        };
        Self {
            tier: alert.current_tier,
            roles,
            audience: alert.tiers.roles_through(alert.current_tier),
            responders,
        }
    }
}

/// Directory that always fails, for exercising degraded paths
#[cfg(test)]
pub struct UnavailableDirectory;

#[cfg(test)]
#[async_trait]
impl FacilityDirectory for UnavailableDirectory {
    async fn escalation_tiers(&self, _: &str, _: &str) -> Result<EscalationTiers> {
        Err(vigil_shared::VigilError::Internal("directory unavailable".to_string()))
    }

    async fn responders(&self, _: &str, _: &BTreeSet<String>) -> Result<Vec<Responder>> {
        Err(vigil_shared::VigilError::Internal("directory unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponderConfig;

    fn directory() -> StaticDirectory {
        StaticDirectory::new(
            vec![FacilityConfig {
                id: "north".to_string(),
                tiers: vec![TierConfig {
                    roles: vec!["nurse".to_string()],
                    timeout_secs: 30,
                }],
                responders: vec![
                    ResponderConfig {
                        id: "carol".to_string(),
                        roles: vec!["nurse".to_string(), "physician".to_string()],
                        channels: vec![ChannelKind::Sms, ChannelKind::Realtime],
                    },
                    ResponderConfig {
                        id: "alice".to_string(),
                        roles: vec!["nurse".to_string()],
                        channels: vec![ChannelKind::Push],
                    },
                    ResponderConfig {
                        id: "dave".to_string(),
                        roles: vec!["porter".to_string()],
                        channels: vec![ChannelKind::Email],
                    },
                ],
            }],
            Config::default().escalation.default_tiers,
        )
    }

    fn roles(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_facility_tiers_override_defaults() {
        let dir = directory();
        assert_eq!(dir.escalation_tiers("north", "fall").await.unwrap().max_tier(), 1);
        assert_eq!(dir.escalation_tiers("south", "fall").await.unwrap().max_tier(), 3);
    }

    #[tokio::test]
    async fn test_responders_filtered_by_role_and_sorted() {
        let dir = directory();
        let found = dir.responders("north", &roles(&["nurse"])).await.unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        // realtime is not an asynchronous channel
        assert_eq!(found[1].channels, vec![ChannelKind::Sms]);
        assert!(dir.responders("south", &roles(&["nurse"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recipients_degrade_when_directory_fails() {
        let tiers = EscalationTiers::from_timeouts(&[(vec!["nurse"], 60)]).unwrap();
        let alert = Alert::new(
            vigil_shared::CreateAlertRequest {
                facility_id: "north".to_string(),
                location: "bed 1".to_string(),
                alert_type: "fall".to_string(),
                urgency: 2,
                description: String::new(),
                created_by: "x".to_string(),
            },
            tiers,
            chrono::Utc::now(),
        );
        let recipients = Recipients::resolve(&UnavailableDirectory, &alert).await;
        assert_eq!(recipients.tier, 1);
        assert!(recipients.roles.contains("nurse"));
        assert!(recipients.responders.is_empty());
    }
}
