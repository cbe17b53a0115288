//! Asynchronous delivery channels (push, email, SMS).
//!
//! Each channel delivers one event to one recipient per call and reports
//! success or failure for that attempt; retrying is the dispatcher's job.

use crate::config::ChannelsConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vigil_shared::{AlertEvent, ChannelKind, Result, VigilError};

#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, recipient_id: &str, event: &AlertEvent) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    channel: ChannelKind,
    recipient_id: &'a str,
    event: &'a AlertEvent,
}

/// Posts deliveries as JSON to a gateway URL; any non-2xx is a failure
pub struct WebhookChannel {
    kind: ChannelKind,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(kind: ChannelKind, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VigilError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            kind,
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&self, recipient_id: &str, event: &AlertEvent) -> Result<()> {
        let body = WebhookBody {
            channel: self.kind,
            recipient_id,
            event,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VigilError::Dispatch(format!("{} gateway: {}", self.kind, e)))?;

        if !response.status().is_success() {
            return Err(VigilError::Dispatch(format!(
                "{} gateway returned {}",
                self.kind,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Channel with no gateway configured: records the delivery in the log only
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&self, recipient_id: &str, event: &AlertEvent) -> Result<()> {
        info!(
            channel = %self.kind,
            recipient_id,
            alert_id = %event.alert_id,
            sequence = event.sequence,
            "Notification ({}) for alert at {}",
            event.event_type,
            event.payload.location
        );
        Ok(())
    }
}

/// One channel per asynchronous kind: a webhook where a URL is configured,
/// otherwise a log-only channel
pub fn build_channels(config: &ChannelsConfig) -> Result<Vec<Arc<dyn Channel>>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    for kind in ChannelKind::ASYNC {
        match config.url_for(kind) {
            Some(url) => {
                info!("[BOOT] {} channel -> {}", kind, url);
                channels.push(Arc::new(WebhookChannel::new(kind, url, timeout)?));
            }
            None => channels.push(Arc::new(LogChannel::new(kind))),
        }
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_channels_covers_async_kinds() {
        let config = ChannelsConfig {
            sms_url: Some("http://127.0.0.1:9/sms".to_string()),
            ..ChannelsConfig::default()
        };
        let channels = build_channels(&config).unwrap();
        let kinds: Vec<_> = channels.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![ChannelKind::Push, ChannelKind::Email, ChannelKind::Sms]
        );
    }
}
