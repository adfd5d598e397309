//! Fire-and-forget owner notifications.
//!
//! Delivery is best effort. A notification failure is logged and
//! swallowed; it never blocks or fails the job that triggered it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Notification sink for job status changes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner_id: &str, status_text: &str);
}

/// Writes notifications to the log. The default sink when no delivery
/// channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner_id: &str, status_text: &str) {
        info!(owner_id, status_text, "job notification");
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    owner_id: &'a str,
    status_text: &'a str,
}

/// Posts notifications to a webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, owner_id: &str, status_text: &str) {
        let body = WebhookBody {
            owner_id,
            status_text,
        };

        let result = self.client.post(&self.url).json(&body).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(owner_id, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(owner_id, error = %e, "notification delivery failed");
            }
            Ok(_) => {}
        }
    }
}
