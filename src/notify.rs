//! Best-effort notification of suspicious session activity.
//!
//! Notifications run in a detached task. Delivery failures are logged here and
//! never reach the request that triggered them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

/// Webhook request timeout.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A refresh arrived from a different IP than the one the session was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpChangeEvent {
    pub guid: Uuid,
    pub old_ip: String,
    pub new_ip: String,
    pub user_agent: String,
    pub time: DateTime<Utc>,
}

/// JSON body delivered to the webhook.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    guid: String,
    old_ip: &'a str,
    new_ip: &'a str,
    user_agent: &'a str,
    time: String,
}

impl<'a> From<&'a IpChangeEvent> for WebhookPayload<'a> {
    fn from(event: &'a IpChangeEvent) -> Self {
        Self {
            guid: event.guid.to_string(),
            old_ip: &event.old_ip,
            new_ip: &event.new_ip,
            user_agent: &event.user_agent,
            time: event.time.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event. Must handle its own failures.
    async fn notify(&self, event: IpChangeEvent);
}

/// Spawn delivery on its own task, detached from the caller's lifetime.
pub fn dispatch(notifier: Arc<dyn Notifier>, event: IpChangeEvent) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        notifier.notify(event).await;
    })
}

/// Posts events as JSON to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: IpChangeEvent) {
        let payload = WebhookPayload::from(&event);

        match self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    guid = %event.guid,
                    status = %response.status(),
                    "IP change webhook rejected"
                );
            }
            Err(e) => {
                error!(guid = %event.guid, error = %e, "Failed to send IP change webhook");
            }
        }
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: IpChangeEvent) {
        info!(
            guid = %event.guid,
            old_ip = %event.old_ip,
            new_ip = %event.new_ip,
            user_agent = %event.user_agent,
            "Client IP changed"
        );
    }
}
