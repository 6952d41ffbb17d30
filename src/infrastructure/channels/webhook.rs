//! Generic JSON webhook channel adapter.
//!
//! POSTs the rendered message to the contact's address. 2xx is
//! delivered; 5xx, 429 and connection errors are transient; other 4xx
//! responses are permanent.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

use crate::domain::models::ChannelKind;
use crate::domain::ports::{Channel, RateLimitSpec, RenderedMessage, SendOutcome};

pub struct WebhookChannel {
    client: reqwest::Client,
    kind: ChannelKind,
    rate_limit: RateLimitSpec,
}

impl WebhookChannel {
    /// Adapter for the generic `webhook` kind.
    pub fn new() -> Self {
        Self::with_kind(ChannelKind::Webhook)
    }

    /// The same JSON POST shape serves slack-style incoming webhooks.
    pub fn with_kind(kind: ChannelKind) -> Self {
        Self {
            client: reqwest::Client::new(),
            kind,
            rate_limit: RateLimitSpec {
                capacity: 10.0,
                refill_per_second: 2.0,
            },
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitSpec) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

impl Default for WebhookChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        address: &str,
        deadline: Duration,
    ) -> SendOutcome {
        let payload = json!({
            "subject": message.subject,
            "text": message.body,
        });

        let response = self
            .client
            .post(address)
            .timeout(deadline)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    SendOutcome::Delivered
                } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    SendOutcome::TransientError(format!("webhook returned {status}"))
                } else {
                    SendOutcome::PermanentError(format!("webhook returned {status}"))
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                SendOutcome::TransientError(e.to_string())
            }
            Err(e) => SendOutcome::PermanentError(e.to_string()),
        }
    }

    fn rate_limit(&self) -> RateLimitSpec {
        self.rate_limit
    }
}
