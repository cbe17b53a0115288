//! Subscription registry - which live clients watch which scope.
//!
//! Indexed by facility so fan-out touches only the facility's subscribers.
//! The registry holds a `Weak` to each transport; the `Subscription` handle
//! owns the strong side, so dropping it (client disconnect) both unregisters
//! eagerly and leaves nothing that a later lookup could deliver to.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tracing::debug;
use vigil_shared::{AlertEvent, Scope};

/// Outcome of a non-blocking realtime send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Client is not draining its buffer; the event is dropped
    Full,
    /// Client went away
    Closed,
}

/// Sending half of a client connection
#[derive(Debug)]
pub struct Transport {
    client_id: String,
    tx: mpsc::Sender<AlertEvent>,
}

impl Transport {
    pub fn new(client_id: impl Into<String>, tx: mpsc::Sender<AlertEvent>) -> Self {
        Self {
            client_id: client_id.into(),
            tx,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn try_send(&self, event: AlertEvent) -> SendOutcome {
        match self.tx.try_send(event) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => SendOutcome::Full,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

struct Entry {
    scope: Scope,
    transport: Weak<Transport>,
}

/// Concurrent registry of live subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// facility -> client -> entry
    by_facility: DashMap<String, HashMap<String, Entry>>,
    /// client -> facility, for unregister
    clients: DashMap<String, String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id` for `scope`, replacing any earlier registration
    pub fn register(&self, client_id: &str, scope: Scope, transport: &Arc<Transport>) {
        self.unregister(client_id);

        let facility = scope.facility_id.clone();
        self.clients.insert(client_id.to_string(), facility.clone());
        self.by_facility.entry(facility).or_default().insert(
            client_id.to_string(),
            Entry {
                scope,
                transport: Arc::downgrade(transport),
            },
        );
        debug!(client_id, "Subscription registered");
    }

    /// Remove a client. Returns whether it was registered.
    pub fn unregister(&self, client_id: &str) -> bool {
        let Some((_, facility)) = self.clients.remove(client_id) else {
            return false;
        };
        if let Some(mut clients) = self.by_facility.get_mut(&facility) {
            clients.remove(client_id);
        }
        self.by_facility.remove_if(&facility, |_, clients| clients.is_empty());
        debug!(client_id, "Subscription removed");
        true
    }

    /// Remove `client_id` only if it is still bound to `transport`. A client
    /// that re-subscribed under the same id keeps its newer registration.
    fn unregister_transport(&self, client_id: &str, transport: &Weak<Transport>) {
        let facility = match self.clients.get(client_id) {
            Some(facility) => facility.clone(),
            None => return,
        };
        let same = self
            .by_facility
            .get(&facility)
            .and_then(|clients| clients.get(client_id).map(|e| e.transport.ptr_eq(transport)))
            .unwrap_or(false);
        if same {
            self.unregister(client_id);
        }
    }

    /// Client ids whose scope matches an event for `facility_id` targeting `roles`
    pub fn lookup(&self, facility_id: &str, roles: &BTreeSet<String>) -> BTreeSet<String> {
        self.live(facility_id, roles)
            .into_iter()
            .map(|(client_id, _)| client_id)
            .collect()
    }

    /// Live transports in scope. Entries whose transport is gone are pruned.
    pub fn live(&self, facility_id: &str, roles: &BTreeSet<String>) -> Vec<(String, Arc<Transport>)> {
        let mut live = Vec::new();
        let mut dead = Vec::new();

        if let Some(clients) = self.by_facility.get(facility_id) {
            for (client_id, entry) in clients.iter() {
                if !entry.scope.matches(facility_id, roles) {
                    continue;
                }
                match entry.transport.upgrade() {
                    Some(transport) => live.push((client_id.clone(), transport)),
                    None => dead.push(client_id.clone()),
                }
            }
        }

        for client_id in dead {
            self.unregister(&client_id);
        }
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Open a subscription: create the transport, register it, and hand back
    /// the receiving side. Dropping the handle unregisters.
    pub fn subscribe(self: &Arc<Self>, client_id: &str, scope: Scope, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let transport = Arc::new(Transport::new(client_id, tx));
        self.register(client_id, scope.clone(), &transport);
        Subscription {
            client_id: client_id.to_string(),
            scope,
            rx,
            transport,
            registry: Arc::downgrade(self),
        }
    }
}

/// Client-side end of a subscription; a stream of alert events
pub struct Subscription {
    client_id: String,
    scope: Scope,
    rx: mpsc::Receiver<AlertEvent>,
    transport: Arc<Transport>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn recv(&mut self) -> Option<AlertEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, `None` when nothing is buffered
    pub fn try_recv(&mut self) -> Option<AlertEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = AlertEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AlertEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_transport(&self.client_id, &Arc::downgrade(&self.transport));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_and_lookup_by_scope() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let _a = registry.subscribe("desk-a", Scope::facility("north"), 4);
        let _b = registry.subscribe("desk-b", Scope::facility("north").with_roles(["physician"]), 4);
        let _c = registry.subscribe("desk-c", Scope::facility("south"), 4);

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.lookup("north", &roles(&["nurse"])),
            roles(&["desk-a"])
        );
        assert_eq!(
            registry.lookup("north", &roles(&["physician"])),
            roles(&["desk-a", "desk-b"])
        );
        assert!(registry.lookup("east", &roles(&["nurse"])).is_empty());
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let sub = registry.subscribe("desk-a", Scope::facility("north"), 4);
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert!(registry.is_empty());
        assert!(registry.lookup("north", &roles(&[])).is_empty());
    }

    #[test]
    fn test_dead_transport_pruned_on_lookup() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let transport = Arc::new(Transport::new("desk-a", tx));
        registry.register("desk-a", Scope::facility("north"), &transport);
        drop(transport);

        assert!(registry.lookup("north", &roles(&[])).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resubscribe_keeps_newer_registration() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let old = registry.subscribe("desk-a", Scope::facility("north"), 4);
        let _new = registry.subscribe("desk-a", Scope::facility("south"), 4);
        drop(old);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("south", &roles(&[])), roles(&["desk-a"]));
    }

    #[tokio::test]
    async fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let sub = registry.subscribe(&format!("c{}", i), Scope::facility("north"), 1);
                let seen = registry.lookup("north", &BTreeSet::new());
                assert!(seen.contains(&format!("c{}", i)));
                drop(sub);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_full_buffer_reports_full() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let _sub = registry.subscribe("desk-a", Scope::facility("north"), 1);
        let live = registry.live("north", &BTreeSet::new());
        let transport = &live[0].1;

        let event = sample_event();
        assert_eq!(transport.try_send(event.clone()), SendOutcome::Delivered);
        assert_eq!(transport.try_send(event), SendOutcome::Full);
    }

    fn sample_event() -> AlertEvent {
        use vigil_shared::{Alert, CreateAlertRequest, EscalationTiers, EventType};
        let alert = Alert::new(
            CreateAlertRequest {
                facility_id: "north".to_string(),
                location: "bed 1".to_string(),
                alert_type: "fall".to_string(),
                urgency: 2,
                description: String::new(),
                created_by: "x".to_string(),
            },
            EscalationTiers::from_timeouts(&[(vec!["nurse"], 60)]).unwrap(),
            chrono::Utc::now(),
        );
        AlertEvent::from_alert(&alert, EventType::Created, None, None)
    }
}
