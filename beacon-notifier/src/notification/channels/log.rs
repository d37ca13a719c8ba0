//! Dry-run channel that only logs.

use async_trait::async_trait;
use tracing::info;

use super::{DeliveryChannel, OutgoingMessage};
use crate::Result;

pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn channel_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            lines = message.body.lines().count(),
            "Dry run, not sending:\n{}",
            message.body
        );
        Ok(())
    }
}
