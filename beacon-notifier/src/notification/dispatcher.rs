//! Concurrent delivery of one cycle's aggregate.
//!
//! Every recipient gets its own task: render, send, then record the included
//! subscriptions as sent. Tasks are capped by a semaphore and `dispatch` only
//! returns once all of them have finished.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::aggregate::{RecipientAggregate, RecipientNotifications};
use super::channels::{DeliveryChannel, OutgoingMessage};
use super::render::{NOTIFICATION_SUBJECT, render_body};
use crate::database::repositories::SubscriptionRepository;
use crate::database::time::now_ms;

pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 16;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent_deliveries: usize,
    /// Upper bound for a single `send`; exceeding it is a delivery failure.
    pub delivery_timeout: Duration,
    /// Explorer domain used for links in rendered messages.
    pub site_domain: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            site_domain: "beaconcha.in".to_string(),
        }
    }
}

/// What happened to one recipient's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Sent and recorded.
    Delivered { notifications: usize },
    /// Not accepted by the channel; nothing recorded.
    DeliveryFailed,
    /// Sent, but `last_sent_ts` could not be updated.
    RecordFailed { notifications: usize },
}

/// Summary of one `dispatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: usize,
    /// Messages accepted by the channel, recorded or not.
    pub delivered: usize,
    pub delivery_failures: usize,
    pub record_failures: usize,
    /// Notifications contained in accepted messages.
    pub notifications_sent: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: RecipientOutcome) {
        match outcome {
            RecipientOutcome::Delivered { notifications } => {
                self.delivered += 1;
                self.notifications_sent += notifications;
            }
            RecipientOutcome::DeliveryFailed => self.delivery_failures += 1,
            RecipientOutcome::RecordFailed { notifications } => {
                self.delivered += 1;
                self.record_failures += 1;
                self.notifications_sent += notifications;
            }
        }
    }
}

pub struct Dispatcher {
    channel: Arc<dyn DeliveryChannel>,
    repo: Arc<dyn SubscriptionRepository>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        repo: Arc<dyn SubscriptionRepository>,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1)));
        Self {
            channel,
            repo,
            config,
            semaphore,
        }
    }

    /// Deliver every recipient in `aggregate` and wait for all of them.
    pub async fn dispatch(&self, aggregate: RecipientAggregate) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut tasks = JoinSet::new();

        for (recipient, notifications) in aggregate.into_recipients() {
            if notifications.is_empty() {
                continue;
            }
            report.recipients += 1;

            let channel = self.channel.clone();
            let repo = self.repo.clone();
            let semaphore = self.semaphore.clone();
            let site_domain = self.config.site_domain.clone();
            let timeout = self.config.delivery_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    error!(to = %recipient, "Delivery semaphore closed");
                    return RecipientOutcome::DeliveryFailed;
                };
                deliver_recipient(
                    channel.as_ref(),
                    repo.as_ref(),
                    &site_domain,
                    timeout,
                    recipient,
                    notifications,
                )
                .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(error = %e, "Delivery task failed");
                    report.delivery_failures += 1;
                }
            }
        }

        report
    }
}

async fn deliver_recipient(
    channel: &dyn DeliveryChannel,
    repo: &dyn SubscriptionRepository,
    site_domain: &str,
    timeout: Duration,
    recipient: String,
    notifications: RecipientNotifications,
) -> RecipientOutcome {
    let message = OutgoingMessage {
        to: recipient,
        subject: NOTIFICATION_SUBJECT.to_string(),
        body: render_body(&notifications, site_domain),
    };
    let count = notifications.notification_count();

    let started = Instant::now();
    match tokio::time::timeout(timeout, channel.send(&message)).await {
        Ok(Ok(())) => {
            debug!(
                to = %message.to,
                channel = channel.channel_type(),
                notifications = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Message delivered"
            );
        }
        Ok(Err(e)) => {
            warn!(to = %message.to, channel = channel.channel_type(), error = %e, "Error sending message");
            return RecipientOutcome::DeliveryFailed;
        }
        Err(_) => {
            let err = crate::Error::Timeout {
                operation: "message delivery",
                elapsed: timeout,
            };
            warn!(to = %message.to, channel = channel.channel_type(), error = %err, "Error sending message");
            return RecipientOutcome::DeliveryFailed;
        }
    }

    let ids = notifications.subscription_ids();
    match repo.mark_sent(&ids, now_ms()).await {
        Ok(updated) => {
            if updated != ids.len() as u64 {
                info!(
                    to = %message.to,
                    expected = ids.len(),
                    updated,
                    "Some subscriptions disappeared before they could be marked as sent"
                );
            }
            RecipientOutcome::Delivered {
                notifications: count,
            }
        }
        Err(e) => {
            error!(
                to = %message.to,
                subscription_ids = ?ids,
                error = %e,
                "Error updating sent time of notified subscriptions"
            );
            RecipientOutcome::RecordFailed {
                notifications: count,
            }
        }
    }
}
