//! Webhook delivery of lifecycle events.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{LifecycleEvent, LifecycleSink};
use crate::background::BackgroundTasks;

/// Default timeout for a single webhook POST.
const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body posted to the webhook URL.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    source: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a LifecycleEvent,
}

/// Sink that POSTs each lifecycle event as JSON to a webhook URL.
///
/// Deliveries run as tracked background tasks so a slow endpoint never stalls
/// the state machine; pending deliveries are awaited at shutdown through the
/// shared [`BackgroundTasks`] registry. Failures are logged and dropped.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    http: Client,
    tasks: BackgroundTasks,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, tasks: BackgroundTasks) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(DEFAULT_WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            http,
            tasks,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(event: &LifecycleEvent) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(WebhookPayload {
            source: "herald",
            timestamp: Utc::now(),
            event,
        })
    }
}

#[async_trait]
impl LifecycleSink for WebhookSink {
    async fn notify(&self, event: &LifecycleEvent) {
        let body = match Self::payload(event) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, event = event.name(), "Failed to serialize webhook payload");
                return;
            }
        };

        let http = self.http.clone();
        let url = self.url.clone();
        let name = event.name();
        self.tasks.spawn(async move {
            match http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(event = name, "Webhook delivered");
                }
                Ok(response) => {
                    warn!(
                        event = name,
                        status = response.status().as_u16(),
                        "Webhook endpoint rejected event"
                    );
                }
                Err(e) => {
                    warn!(event = name, error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}
