//! Notification channel adapter port.
//!
//! Adapters are supplied by the host process; the core routes by channel
//! kind and never prescribes wire formats.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::models::ChannelKind;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Token-bucket parameters an adapter advertises for its channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSpec {
    /// Burst capacity in tokens
    pub capacity: f64,
    /// Sustained refill rate in tokens per second
    pub refill_per_second: f64,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_second: 1.0,
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message reached the channel
    Delivered,
    /// Worth retrying: connect error, 5xx, rate-limit response
    TransientError(String),
    /// Not worth retrying: 4xx, unknown address, malformed payload
    PermanentError(String),
}

/// A notification delivery channel.
///
/// `send` must complete or fail within the supplied deadline; the
/// dispatcher enforces it regardless.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Which channel kind this adapter serves.
    fn kind(&self) -> ChannelKind;

    /// Deliver a rendered message to an address.
    async fn send(
        &self,
        message: &RenderedMessage,
        address: &str,
        deadline: Duration,
    ) -> SendOutcome;

    /// Token-bucket parameters for this channel.
    fn rate_limit(&self) -> RateLimitSpec {
        RateLimitSpec::default()
    }
}
