//! Engine facade - wires the components together and exposes the inbound API.

use crate::config::Config;
use crate::coordinator::{AckOutcome, Coordinator, ResolveOutcome};
use crate::directory::FacilityDirectory;
use crate::dispatcher::{Channel, Dispatcher};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::scheduler::{RecoveryReport, Scheduler};
use crate::state::EngineState;
use crate::store::AlertStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use vigil_shared::{
    AcknowledgmentRecord, Alert, AlertId, AuditEntry, CreateAlertRequest, DeadLetter,
    ResponseType, Result, Scope, VigilError,
};

pub struct Engine {
    state: Arc<EngineState>,
    scheduler: Arc<Scheduler>,
    coordinator: Coordinator,
    registry: Arc<SubscriptionRegistry>,
    subscriber_buffer: usize,
    worker: JoinHandle<()>,
    recovery: RecoveryReport,
}

impl Engine {
    /// Build the engine, start the dispatch worker and recover persisted
    /// alerts. Must be called inside a tokio runtime.
    pub async fn start(
        config: &Config,
        store: Arc<dyn AlertStore>,
        directory: Arc<dyn FacilityDirectory>,
        channels: Vec<Arc<dyn Channel>>,
    ) -> Result<Self> {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (dispatcher, worker) = Dispatcher::new(&config.dispatch, registry.clone(), channels);
        let worker = tokio::spawn(worker.run());

        let state = Arc::new(EngineState::new(store, directory, dispatcher));
        let scheduler = Arc::new(Scheduler::new(
            state.clone(),
            config.escalation.retry_delay(),
        ));
        let recovery = scheduler.recover().await?;
        let coordinator = Coordinator::new(state.clone(), scheduler.clone());

        Ok(Self {
            state,
            scheduler,
            coordinator,
            registry,
            subscriber_buffer: config.dispatch.subscriber_buffer,
            worker,
            recovery,
        })
    }

    pub async fn create_alert(&self, request: CreateAlertRequest) -> Result<Alert> {
        self.coordinator.create(request).await
    }

    pub async fn acknowledge_alert(
        &self,
        alert_id: AlertId,
        responder_id: &str,
        response_type: ResponseType,
        note: Option<String>,
    ) -> Result<AckOutcome> {
        self.coordinator
            .acknowledge(alert_id, responder_id, response_type, note)
            .await
    }

    pub async fn resolve_alert(
        &self,
        alert_id: AlertId,
        responder_id: &str,
        note: Option<String>,
    ) -> Result<ResolveOutcome> {
        self.coordinator.resolve(alert_id, responder_id, note).await
    }

    /// Open a realtime event stream for `scope`. Dropping the subscription
    /// unregisters the client.
    pub fn subscribe(&self, client_id: &str, scope: Scope) -> Result<Subscription> {
        if client_id.trim().is_empty() {
            return Err(VigilError::Validation("client_id is required".to_string()));
        }
        Ok(self
            .registry
            .subscribe(client_id.trim(), scope, self.subscriber_buffer))
    }

    /// Non-terminal alerts visible in `scope`, most urgent first, then oldest
    /// first. Clients call this to resync after a sequence gap.
    pub async fn get_active_alerts(&self, scope: &Scope) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .state
            .book
            .snapshot()
            .await
            .into_iter()
            .filter(|a| !a.is_terminal())
            .filter(|a| scope.matches(&a.facility_id, &a.tiers.roles_through(a.current_tier)))
            .collect();
        alerts.sort_by(|a, b| {
            b.urgency
                .cmp(&a.urgency)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        alerts
    }

    pub async fn get_alert(&self, alert_id: AlertId) -> Result<Alert> {
        let slot = self
            .state
            .book
            .get(alert_id)
            .await
            .ok_or_else(|| VigilError::NotFound(alert_id.to_string()))?;
        let alert = slot.lock().await.alert.clone();
        Ok(alert)
    }

    /// Acknowledgment records of one alert, in append order
    pub async fn acknowledgments(&self, alert_id: AlertId) -> Result<Vec<AcknowledgmentRecord>> {
        self.state.acknowledgments(alert_id).await
    }

    pub async fn audit_history(&self, alert_id: AlertId) -> Result<Vec<AuditEntry>> {
        self.state.history(alert_id).await
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.state.dispatcher.dead_letters()
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Stop timers and the dispatch worker. Queued jobs are abandoned.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.worker.abort();
        info!("Engine stopped");
    }
}
