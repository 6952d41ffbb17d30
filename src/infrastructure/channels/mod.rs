//! Built-in channel adapters.
//!
//! Hosts supply their own adapters for anything with a proprietary wire
//! format; the crate ships a generic JSON webhook adapter (which also
//! covers slack-style incoming webhooks) and a tracing-backed adapter
//! for development.

pub mod webhook;

pub use webhook::WebhookChannel;

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::domain::models::ChannelKind;
use crate::domain::ports::{Channel, RenderedMessage, SendOutcome};

/// Development adapter: logs the message instead of delivering it.
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

    async fn send(
        &self,
        message: &RenderedMessage,
        address: &str,
        _deadline: Duration,
    ) -> SendOutcome {
        info!(
            channel = self.kind.as_str(),
            address,
            subject = %message.subject,
            "Notification (log channel)"
        );
        SendOutcome::Delivered
    }
}
