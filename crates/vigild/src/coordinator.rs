//! Acknowledgment coordinator - creation, acknowledgment and resolution.
//!
//! Every mutation takes the alert's lock, builds the next state on a copy,
//! persists it, and only then swaps it in and publishes the event. The
//! scheduler's timer callbacks go through the same lock, so an
//! acknowledgment and an escalation for one alert are totally ordered.

use crate::directory::Recipients;
use crate::scheduler::Scheduler;
use crate::state::{AlertSlot, EngineState};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use vigil_shared::{
    AcknowledgmentRecord, Alert, AlertEvent, AlertId, AlertStatus, CreateAlertRequest, EventType,
    ResponseType, Result, VigilError,
};

/// Result of an acknowledge call
#[derive(Debug, Clone, Serialize)]
pub struct AckOutcome {
    pub alert: Alert,
    pub record: AcknowledgmentRecord,
    /// Whether this response made the responder the owner
    pub took_ownership: bool,
}

/// Result of a resolve call
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub alert: Alert,
    /// `None` when the alert was already resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<AcknowledgmentRecord>,
    pub already_resolved: bool,
}

pub struct Coordinator {
    state: Arc<EngineState>,
    scheduler: Arc<Scheduler>,
}

fn require_responder(responder_id: &str) -> Result<&str> {
    let responder_id = responder_id.trim();
    if responder_id.is_empty() {
        return Err(VigilError::Validation("responder_id is required".to_string()));
    }
    Ok(responder_id)
}

impl Coordinator {
    pub fn new(state: Arc<EngineState>, scheduler: Arc<Scheduler>) -> Self {
        Self { state, scheduler }
    }

    /// Raise an alert at tier 1 and arm its first deadline
    pub async fn create(&self, request: CreateAlertRequest) -> Result<Alert> {
        request.validate()?;

        let tiers = self
            .state
            .directory
            .escalation_tiers(&request.facility_id, &request.alert_type)
            .await?;

        let now = Utc::now();
        let mut alert = Alert::new(request, tiers, now);
        alert.bump_sequence(now);
        let recipients = Recipients::resolve(self.state.directory.as_ref(), &alert).await;
        let event = AlertEvent::from_alert(
            &alert,
            EventType::Created,
            Some(alert.created_by.as_str()),
            None,
        );

        self.state.persist(&alert, None, &event, None).await?;

        let slot = self.state.book.insert(alert.clone(), recipients).await;
        let slot = slot.lock().await;
        self.state.dispatcher.publish(&event, &slot.recipients);
        if let Some(deadline) = alert.pending_deadline() {
            self.scheduler.arm(alert.id, alert.current_tier, deadline);
        }

        info!(
            alert_id = %alert.id,
            facility_id = %alert.facility_id,
            urgency = alert.urgency,
            "Alert created at {} ({} tiers)",
            alert.location,
            alert.max_tier()
        );
        Ok(alert)
    }

    /// Record a response. `responding` and `taking_over` can claim ownership,
    /// which halts escalation; anything else is appended without changing
    /// status. A `resolved` response resolves the alert.
    pub async fn acknowledge(
        &self,
        alert_id: AlertId,
        responder_id: &str,
        response_type: ResponseType,
        note: Option<String>,
    ) -> Result<AckOutcome> {
        let responder_id = require_responder(responder_id)?;
        let slot = self
            .state
            .book
            .get(alert_id)
            .await
            .ok_or_else(|| VigilError::NotFound(alert_id.to_string()))?;
        let mut slot = slot.lock().await;

        if slot.alert.is_terminal() {
            return Err(VigilError::Conflict(format!(
                "alert {} is {}",
                alert_id, slot.alert.status
            )));
        }

        if response_type == ResponseType::Resolved {
            let (alert, record) = self.resolve_locked(&mut slot, responder_id, note).await?;
            return Ok(AckOutcome {
                alert,
                record,
                took_ownership: false,
            });
        }

        let now = Utc::now();
        let from = slot.alert.status;
        let mut next = slot.alert.clone();

        let took_ownership = response_type.claims_ownership()
            && (next.acknowledged_by.is_none() || response_type == ResponseType::TakingOver);
        let event_type = if took_ownership {
            next.acknowledged_by = Some(responder_id.to_string());
            next.status = AlertStatus::Acknowledged;
            next.reschedule(now);
            EventType::Acknowledged
        } else {
            EventType::ResponseAdded
        };

        let sequence = next.bump_sequence(now);
        let record = AcknowledgmentRecord {
            alert_id,
            responder_id: responder_id.to_string(),
            response_type,
            timestamp: now,
            note: note.clone(),
            sequence,
        };
        let event = AlertEvent::from_alert(&next, event_type, Some(responder_id), note.as_deref());

        self.state
            .persist(&next, Some(&record), &event, Some(from))
            .await?;

        slot.alert = next;
        if took_ownership {
            self.scheduler.cancel(alert_id);
            info!(
                alert_id = %alert_id,
                tier = slot.alert.current_tier,
                sequence,
                "Alert acknowledged by {} ({})",
                responder_id,
                response_type
            );
        } else {
            debug!(alert_id = %alert_id, sequence, "Response recorded: {} {}", responder_id, response_type);
        }
        self.state.dispatcher.publish(&event, &slot.recipients);

        Ok(AckOutcome {
            alert: slot.alert.clone(),
            record,
            took_ownership,
        })
    }

    /// Resolve from any non-terminal status. Resolving a resolved alert
    /// returns it unchanged; resolving an expired one is a conflict.
    pub async fn resolve(
        &self,
        alert_id: AlertId,
        responder_id: &str,
        note: Option<String>,
    ) -> Result<ResolveOutcome> {
        let responder_id = require_responder(responder_id)?;
        let slot = self
            .state
            .book
            .get(alert_id)
            .await
            .ok_or_else(|| VigilError::NotFound(alert_id.to_string()))?;
        let mut slot = slot.lock().await;

        match slot.alert.status {
            AlertStatus::Resolved => {
                debug!(alert_id = %alert_id, "Already resolved");
                return Ok(ResolveOutcome {
                    alert: slot.alert.clone(),
                    record: None,
                    already_resolved: true,
                });
            }
            AlertStatus::Expired => {
                return Err(VigilError::Conflict(format!("alert {} is expired", alert_id)));
            }
            _ => {}
        }

        let (alert, record) = self.resolve_locked(&mut slot, responder_id, note).await?;
        Ok(ResolveOutcome {
            alert,
            record: Some(record),
            already_resolved: false,
        })
    }

    async fn resolve_locked(
        &self,
        slot: &mut AlertSlot,
        responder_id: &str,
        note: Option<String>,
    ) -> Result<(Alert, AcknowledgmentRecord)> {
        let now = Utc::now();
        let from = slot.alert.status;
        let mut next = slot.alert.clone();
        next.status = AlertStatus::Resolved;
        next.resolved_by = Some(responder_id.to_string());
        next.resolved_at = Some(now);
        next.reschedule(now);
        let sequence = next.bump_sequence(now);

        let record = AcknowledgmentRecord {
            alert_id: next.id,
            responder_id: responder_id.to_string(),
            response_type: ResponseType::Resolved,
            timestamp: now,
            note: note.clone(),
            sequence,
        };
        let event = AlertEvent::from_alert(
            &next,
            EventType::Resolved,
            Some(responder_id),
            note.as_deref(),
        );

        self.state
            .persist(&next, Some(&record), &event, Some(from))
            .await?;

        slot.alert = next;
        self.scheduler.cancel(slot.alert.id);
        self.state.dispatcher.publish(&event, &slot.recipients);
        info!(
            alert_id = %slot.alert.id,
            tier = slot.alert.current_tier,
            sequence,
            "Alert resolved by {}",
            responder_id
        );
        Ok((slot.alert.clone(), record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::directory::StaticDirectory;
    use crate::dispatcher::Dispatcher;
    use crate::registry::SubscriptionRegistry;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn setup() -> (Coordinator, Arc<Scheduler>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, _worker) = Dispatcher::new(
            &DispatchConfig::default(),
            Arc::new(SubscriptionRegistry::new()),
            vec![],
        );
        let state = Arc::new(EngineState::new(
            store.clone(),
            Arc::new(StaticDirectory::new(
                vec![],
                crate::config::Config::default().escalation.default_tiers,
            )),
            dispatcher,
        ));
        let scheduler = Arc::new(Scheduler::new(state.clone(), Duration::from_secs(5)));
        (Coordinator::new(state, scheduler.clone()), scheduler, store)
    }

    fn request() -> CreateAlertRequest {
        CreateAlertRequest {
            facility_id: "north".to_string(),
            location: "ward 3 bed 2".to_string(),
            alert_type: "code_blue".to_string(),
            urgency: 5,
            description: "unresponsive".to_string(),
            created_by: "nurse-7".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_arms_tier_one() {
        let (coordinator, scheduler, store) = setup();
        let alert = coordinator.create(request()).await.unwrap();

        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.current_tier, 1);
        assert_eq!(alert.sequence, 1);
        assert!(alert.next_escalation_at.is_some());
        assert_eq!(scheduler.armed_tier(alert.id), Some(1));
        assert_eq!(store.audit_log().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_urgency() {
        let (coordinator, _, store) = setup();
        let mut req = request();
        req.urgency = 9;
        let err = coordinator.create(req).await.unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
        assert!(store.audit_log().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_creator() {
        let (coordinator, _, store) = setup();
        let mut req = request();
        req.created_by = "  ".to_string();
        let err = coordinator.create(req).await.unwrap_err();
        assert!(matches!(err, VigilError::Validation(ref m) if m.contains("created_by")));
        assert!(store.audit_log().is_empty());
    }

    #[tokio::test]
    async fn test_second_responder_does_not_take_ownership() {
        let (coordinator, scheduler, _) = setup();
        let alert = coordinator.create(request()).await.unwrap();

        let first = coordinator
            .acknowledge(alert.id, "alice", ResponseType::Responding, None)
            .await
            .unwrap();
        assert!(first.took_ownership);
        assert_eq!(first.alert.status, AlertStatus::Acknowledged);
        assert!(!scheduler.is_armed(alert.id));

        let second = coordinator
            .acknowledge(alert.id, "bob", ResponseType::Responding, Some("on my way".to_string()))
            .await
            .unwrap();
        assert!(!second.took_ownership);
        assert_eq!(second.alert.acknowledged_by.as_deref(), Some("alice"));
        assert_eq!(second.record.sequence, 3);
    }

    #[tokio::test]
    async fn test_taking_over_replaces_owner() {
        let (coordinator, _, _) = setup();
        let alert = coordinator.create(request()).await.unwrap();
        coordinator
            .acknowledge(alert.id, "alice", ResponseType::Responding, None)
            .await
            .unwrap();

        let outcome = coordinator
            .acknowledge(alert.id, "dr-kim", ResponseType::TakingOver, None)
            .await
            .unwrap();
        assert!(outcome.took_ownership);
        assert_eq!(outcome.alert.acknowledged_by.as_deref(), Some("dr-kim"));
    }

    #[tokio::test]
    async fn test_unable_keeps_escalating() {
        let (coordinator, scheduler, _) = setup();
        let alert = coordinator.create(request()).await.unwrap();

        let outcome = coordinator
            .acknowledge(alert.id, "alice", ResponseType::Unable, None)
            .await
            .unwrap();
        assert!(!outcome.took_ownership);
        assert_eq!(outcome.alert.status, AlertStatus::Active);
        assert_eq!(outcome.alert.next_escalation_at, alert.next_escalation_at);
        assert!(scheduler.is_armed(alert.id));
    }

    #[tokio::test]
    async fn test_acknowledge_errors() {
        let (coordinator, _, _) = setup();
        let err = coordinator
            .acknowledge(AlertId::new(), "alice", ResponseType::Responding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));

        let alert = coordinator.create(request()).await.unwrap();
        let err = coordinator
            .acknowledge(alert.id, "  ", ResponseType::Responding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));

        coordinator.resolve(alert.id, "alice", None).await.unwrap();
        let err = coordinator
            .acknowledge(alert.id, "bob", ResponseType::Responding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_resolved_response_resolves() {
        let (coordinator, scheduler, _) = setup();
        let alert = coordinator.create(request()).await.unwrap();

        let outcome = coordinator
            .acknowledge(alert.id, "alice", ResponseType::Resolved, None)
            .await
            .unwrap();
        assert_eq!(outcome.alert.status, AlertStatus::Resolved);
        assert_eq!(outcome.alert.resolved_by.as_deref(), Some("alice"));
        assert_eq!(outcome.record.response_type, ResponseType::Resolved);
        assert!(!scheduler.is_armed(alert.id));
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_state_unchanged() {
        let (coordinator, scheduler, store) = setup();
        let alert = coordinator.create(request()).await.unwrap();

        store.set_fail_writes(true);
        let err = coordinator
            .acknowledge(alert.id, "alice", ResponseType::Responding, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Persistence(_)));
        assert!(scheduler.is_armed(alert.id));

        store.set_fail_writes(false);
        let retried = coordinator
            .acknowledge(alert.id, "alice", ResponseType::Responding, None)
            .await
            .unwrap();
        // Same sequence the failed attempt would have used
        assert_eq!(retried.record.sequence, 2);
        assert_eq!(retried.alert.status, AlertStatus::Acknowledged);
    }
}
