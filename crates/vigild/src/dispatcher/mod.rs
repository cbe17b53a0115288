//! Notification dispatcher - fans alert events out to recipients.
//!
//! Every event becomes one `NotificationJob` per (channel, recipient):
//! - realtime jobs go straight to live subscribers with a non-blocking send,
//!   at most once, never retried;
//! - push/email/SMS jobs are queued and delivered by `DispatchWorker` with
//!   exponential backoff, ending `sent` or `dead`.
//!
//! `publish` never awaits, so it is safe to call while an alert's lock is
//! held; all network I/O happens on worker tasks.

pub mod backoff;
pub mod channels;
pub mod dedup;

pub use backoff::{BackoffConfig, BackoffState};
pub use channels::{build_channels, Channel, LogChannel, WebhookChannel};
pub use dedup::DedupStore;

use crate::config::DispatchConfig;
use crate::directory::Recipients;
use crate::registry::{SendOutcome, SubscriptionRegistry};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use vigil_shared::{
    AlertEvent, AlertId, ChannelKind, DeadLetter, JobKey, JobStatus, NotificationJob,
};

/// Counts from one `publish` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub realtime_delivered: usize,
    pub realtime_dropped: usize,
    pub queued: usize,
    pub duplicates: usize,
}

type DeliveryKey = (AlertId, String, ChannelKind);

/// State shared by the publishing side and the worker
struct DispatchShared {
    channels: HashMap<ChannelKind, Arc<dyn Channel>>,
    jobs: DashMap<JobKey, NotificationJob>,
    /// Highest sequence delivered per (alert, recipient, channel)
    delivered: DashMap<DeliveryKey, u64>,
    dead_letters: broadcast::Sender<DeadLetter>,
    permits: Semaphore,
    backoff: BackoffConfig,
    max_attempts: u32,
}

impl DispatchShared {
    fn record(&self, job: &NotificationJob) {
        self.jobs.insert(job.key.clone(), job.clone());
    }

    fn delivery_key(key: &JobKey) -> DeliveryKey {
        (key.alert_id, key.recipient_id.clone(), key.channel)
    }

    fn is_stale(&self, key: &JobKey) -> bool {
        self.delivered
            .get(&Self::delivery_key(key))
            .map(|last| *last >= key.sequence)
            .unwrap_or(false)
    }

    fn mark_delivered(&self, key: &JobKey) {
        self.delivered
            .entry(Self::delivery_key(key))
            .and_modify(|last| *last = (*last).max(key.sequence))
            .or_insert(key.sequence);
    }

    fn bury(&self, mut job: NotificationJob, reason: String) {
        job.status = JobStatus::Dead;
        job.last_error = Some(reason.clone());
        self.record(&job);

        error!(
            job = %job.key,
            attempts = job.attempt_count,
            "Notification dead after retries: {}",
            reason
        );
        let _ = self.dead_letters.send(DeadLetter {
            key: job.key,
            attempts: job.attempt_count,
            last_error: reason,
            at: Utc::now(),
        });
    }

    /// Deliver one asynchronous job, retrying with backoff
    async fn deliver(&self, mut job: NotificationJob) {
        let Some(channel) = self.channels.get(&job.key.channel).cloned() else {
            let reason = format!("no {} channel configured", job.key.channel);
            self.bury(job, reason);
            return;
        };
        let mut backoff = BackoffState::new(self.backoff.clone());

        loop {
            if self.is_stale(&job.key) {
                job.status = JobStatus::Superseded;
                self.record(&job);
                debug!(job = %job.key, "Skipping job, newer event already delivered");
                return;
            }

            job.attempt_count += 1;
            let result = match self.permits.acquire().await {
                Ok(_permit) => {
                    channel
                        .deliver(&job.key.recipient_id, &job.payload)
                        .await
                }
                Err(_) => return,
            };

            match result {
                Ok(()) => {
                    job.status = JobStatus::Sent;
                    job.last_error = None;
                    self.mark_delivered(&job.key);
                    self.record(&job);
                    debug!(job = %job.key, attempts = job.attempt_count, "Notification sent");
                    return;
                }
                Err(e) => {
                    if job.attempt_count >= self.max_attempts {
                        self.bury(job, e.to_string());
                        return;
                    }
                    job.status = JobStatus::Failed;
                    job.last_error = Some(e.to_string());
                    self.record(&job);

                    let delay = backoff.next_backoff();
                    warn!(
                        job = %job.key,
                        attempt = job.attempt_count,
                        "Delivery failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Publishing side of the dispatcher
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    shared: Arc<DispatchShared>,
    queue: mpsc::UnboundedSender<NotificationJob>,
    dedup: DedupStore,
}

/// Background half that drains the job queue; spawn `run()` explicitly
pub struct DispatchWorker {
    rx: mpsc::UnboundedReceiver<NotificationJob>,
    shared: Arc<DispatchShared>,
}

impl Dispatcher {
    pub fn new(
        config: &DispatchConfig,
        registry: Arc<SubscriptionRegistry>,
        channels: Vec<Arc<dyn Channel>>,
    ) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (dead_letters, _) = broadcast::channel(256);

        let shared = Arc::new(DispatchShared {
            channels: channels.into_iter().map(|c| (c.kind(), c)).collect(),
            jobs: DashMap::new(),
            delivered: DashMap::new(),
            dead_letters,
            permits: Semaphore::new(config.workers.max(1)),
            backoff: BackoffConfig::from_millis(config.base_backoff_ms, config.max_backoff_ms),
            max_attempts: config.max_attempts.max(1),
        });

        let dispatcher = Self {
            registry,
            shared: shared.clone(),
            queue: tx,
            dedup: DedupStore::new(
                config.dedup_capacity,
                Duration::from_secs(config.dedup_ttl_secs),
            ),
        };
        (dispatcher, DispatchWorker { rx, shared })
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Turn one event into jobs: realtime for every live subscriber whose
    /// scope covers a tier the alert has reached, asynchronous for every
    /// responder of the current tier on each of their channels. Jobs already
    /// seen (same key) are skipped.
    pub fn publish(&self, event: &AlertEvent, recipients: &Recipients) -> PublishReport {
        let mut report = PublishReport::default();

        for (client_id, transport) in self
            .registry
            .live(&event.payload.facility_id, &recipients.audience)
        {
            let mut job = NotificationJob::new(ChannelKind::Realtime, &client_id, event);
            if self.dedup.check_and_insert(&job.key) {
                report.duplicates += 1;
                continue;
            }

            job.attempt_count = 1;
            match transport.try_send(event.clone()) {
                SendOutcome::Delivered => {
                    job.status = JobStatus::Sent;
                    report.realtime_delivered += 1;
                }
                SendOutcome::Full => {
                    job.status = JobStatus::Failed;
                    job.last_error = Some("subscriber buffer full".to_string());
                    report.realtime_dropped += 1;
                    debug!(client_id = %client_id, alert_id = %event.alert_id, "Realtime event dropped");
                }
                SendOutcome::Closed => {
                    job.status = JobStatus::Failed;
                    job.last_error = Some("subscriber disconnected".to_string());
                    report.realtime_dropped += 1;
                }
            }
            self.shared.record(&job);
        }

        for responder in &recipients.responders {
            for channel in responder.channels.iter().filter(|c| c.is_async()) {
                let job = NotificationJob::new(*channel, &responder.id, event);
                if self.dedup.check_and_insert(&job.key) {
                    report.duplicates += 1;
                    continue;
                }
                self.shared.record(&job);
                if let Err(mpsc::error::SendError(job)) = self.queue.send(job) {
                    self.shared
                        .bury(job, "dispatch worker not running".to_string());
                    continue;
                }
                report.queued += 1;
            }
        }

        debug!(
            alert_id = %event.alert_id,
            sequence = event.sequence,
            event_type = %event.event_type,
            ?report,
            "Event published"
        );
        report
    }

    /// All jobs known for an alert, ordered by sequence, channel, recipient
    pub fn jobs_for_alert(&self, alert_id: AlertId) -> Vec<NotificationJob> {
        let mut jobs: Vec<NotificationJob> = self
            .shared
            .jobs
            .iter()
            .filter(|entry| entry.key().alert_id == alert_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| {
            (a.key.sequence, a.key.channel, &a.key.recipient_id).cmp(&(
                b.key.sequence,
                b.key.channel,
                &b.key.recipient_id,
            ))
        });
        jobs
    }

    pub fn job(&self, key: &JobKey) -> Option<NotificationJob> {
        self.shared.jobs.get(key).map(|j| j.value().clone())
    }

    /// Operational signal stream for jobs that exhausted their retries
    pub fn dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.shared.dead_letters.subscribe()
    }

    /// Drop finished jobs from the job table and expired dedup keys.
    /// Returns the number of jobs removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.shared.jobs.len();
        self.shared.jobs.retain(|_, job| !job.status.is_final());
        let pruned = before.saturating_sub(self.shared.jobs.len());
        let expired = self.dedup.prune_expired();
        if pruned > 0 || expired > 0 {
            info!("Pruned {} finished jobs, {} dedup keys", pruned, expired);
        }
        pruned
    }
}

impl DispatchWorker {
    /// Drain the queue until every `Dispatcher` is dropped
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                shared.deliver(job).await;
            });
        }
        debug!("Dispatch worker stopped");
    }
}
