//! Delivery channels.
//!
//! - HTTP mail relay (`WebhookChannel`)
//! - Log-only dry run (`LogChannel`)

mod log;
mod webhook;

pub use log::LogChannel;
pub use webhook::{WebhookChannel, WebhookConfig};

use std::sync::Arc;

use async_trait::async_trait;
use crate::Result;

/// A rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Trait for delivery channels.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Deliver `message`. `Ok` means the transport accepted it.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    /// HTTP mail relay.
    Webhook(WebhookConfig),
    /// Log messages instead of sending them.
    Log,
}

impl ChannelConfig {
    pub fn build(&self) -> Result<Arc<dyn DeliveryChannel>> {
        Ok(match self {
            Self::Webhook(config) => Arc::new(WebhookChannel::new(config.clone())?),
            Self::Log => Arc::new(LogChannel),
        })
    }
}
