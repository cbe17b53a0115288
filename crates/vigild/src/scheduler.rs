//! Escalation scheduler - per-alert timers and tier transitions.
//!
//! One tokio task per armed alert sleeps until the deadline, then takes the
//! alert's lock and re-validates before acting. Cancellation aborts the task;
//! a timer that already got past its sleep is harmless because the
//! re-validation sees the new status or tier and does nothing.

use crate::directory::Recipients;
use crate::state::EngineState;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_shared::{AlertEvent, AlertId, AlertStatus, EventType, Result};

struct TimerEntry {
    tier: u32,
    generation: u64,
    handle: JoinHandle<()>,
}

/// What startup recovery found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub loaded: usize,
    pub rearmed: usize,
    /// Deadlines that passed while the engine was down; fired at once
    pub overdue: usize,
}

pub struct Scheduler {
    state: Arc<EngineState>,
    timers: DashMap<AlertId, TimerEntry>,
    generation: AtomicU64,
    retry_delay: Duration,
}

impl Scheduler {
    pub fn new(state: Arc<EngineState>, retry_delay: Duration) -> Self {
        Self {
            state,
            timers: DashMap::new(),
            generation: AtomicU64::new(0),
            retry_delay,
        }
    }

    /// Arm the timer for `tier`, firing at `deadline`. Replaces any timer
    /// already armed for the alert. Past deadlines fire immediately.
    pub fn arm(self: &Arc<Self>, alert_id: AlertId, tier: u32, deadline: DateTime<Utc>) {
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.arm_after(alert_id, tier, delay);
    }

    pub fn arm_after(self: &Arc<Self>, alert_id: AlertId, tier: u32, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::clone(self);
        // The task waits for its entry to be in the table before it can fire
        let (start, gate) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if gate.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            scheduler.fire(alert_id, tier, generation).await;
        });
        let armed = TimerEntry {
            tier,
            generation,
            handle,
        };

        match self.timers.entry(alert_id) {
            Entry::Occupied(current) if current.get().generation > generation => {
                debug!(alert_id = %alert_id, tier, "Newer timer already armed");
                return;
            }
            Entry::Occupied(mut current) => {
                let previous = current.insert(armed);
                previous.handle.abort();
            }
            Entry::Vacant(slot) => {
                slot.insert(armed);
            }
        }
        let _ = start.send(());
        debug!(alert_id = %alert_id, tier, "Timer armed, fires in {:?}", delay);
    }

    /// Abort the pending timer, if any
    pub fn cancel(&self, alert_id: AlertId) -> bool {
        match self.timers.remove(&alert_id) {
            Some((_, entry)) => {
                entry.handle.abort();
                debug!(alert_id = %alert_id, tier = entry.tier, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, alert_id: AlertId) -> bool {
        self.timers.contains_key(&alert_id)
    }

    pub fn armed_tier(&self, alert_id: AlertId) -> Option<u32> {
        self.timers.get(&alert_id).map(|entry| entry.tier)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Abort every timer (shutdown)
    pub fn cancel_all(&self) {
        self.timers.retain(|_, entry| {
            entry.handle.abort();
            false
        });
    }

    async fn fire(self: Arc<Self>, alert_id: AlertId, tier: u32, generation: u64) {
        // Our own entry; a newer arm may already have replaced it
        self.timers
            .remove_if(&alert_id, |_, entry| entry.generation == generation);

        let Some(slot) = self.state.book.get(alert_id).await else {
            return;
        };
        let mut slot = slot.lock().await;

        if !slot.alert.status.is_escalating() || slot.alert.current_tier != tier {
            debug!(
                alert_id = %alert_id,
                tier,
                status = %slot.alert.status,
                "Stale timer, nothing to do"
            );
            return;
        }

        let now = Utc::now();
        let from = slot.alert.status;
        let mut next = slot.alert.clone();
        let event_type = if next.current_tier < next.max_tier() {
            next.current_tier += 1;
            next.status = AlertStatus::Escalated;
            EventType::Escalated
        } else {
            next.status = AlertStatus::Expired;
            EventType::Expired
        };
        next.bump_sequence(now);
        next.reschedule(now);
        let event = AlertEvent::from_alert(&next, event_type, None, None);

        let recipients = if next.current_tier != slot.recipients.tier {
            Recipients::resolve(self.state.directory.as_ref(), &next).await
        } else {
            slot.recipients.clone()
        };

        if let Err(e) = self.state.persist(&next, None, &event, Some(from)).await {
            warn!(
                alert_id = %alert_id,
                tier,
                "Escalation not persisted, retrying in {:?}: {}",
                self.retry_delay,
                e
            );
            self.arm_after(alert_id, tier, self.retry_delay);
            return;
        }

        slot.alert = next;
        slot.recipients = recipients;
        self.state.dispatcher.publish(&event, &slot.recipients);

        match event_type {
            EventType::Expired => {
                warn!(alert_id = %alert_id, tier, "Alert expired without acknowledgment")
            }
            _ => info!(
                alert_id = %alert_id,
                tier = slot.alert.current_tier,
                sequence = slot.alert.sequence,
                "Alert escalated"
            ),
        }

        if let Some(deadline) = slot.alert.pending_deadline() {
            self.arm(alert_id, slot.alert.current_tier, deadline);
        }
    }

    /// Load every persisted alert and re-arm timers for the non-terminal ones.
    /// Terminal alerts are loaded too so lookups and idempotent resolves
    /// keep working after a restart.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for alert in self.state.store.load_alerts().await? {
            report.loaded += 1;
            let recipients = if alert.is_terminal() {
                Recipients {
                    tier: alert.current_tier,
                    roles: alert.tiers.roles(alert.current_tier),
                    audience: alert.tiers.roles_through(alert.current_tier),
                    responders: vec![],
                }
            } else {
                Recipients::resolve(self.state.directory.as_ref(), &alert).await
            };

            let id = alert.id;
            let tier = alert.current_tier;
            let deadline = if alert.is_terminal() {
                None
            } else {
                alert.pending_deadline()
            };
            self.state.book.insert(alert, recipients).await;

            if let Some(deadline) = deadline {
                if deadline <= now {
                    report.overdue += 1;
                }
                self.arm(id, tier, deadline);
                report.rearmed += 1;
            }
        }

        info!(
            "[BOOT] Recovered {} alerts, {} timers re-armed ({} overdue)",
            report.loaded, report.rearmed, report.overdue
        );
        Ok(report)
    }
}
