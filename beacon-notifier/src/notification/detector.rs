//! Event detectors.
//!
//! A detector turns the state of the chain at the current cycle boundary into
//! notifications for the subscriptions that match it. Each detector handles a
//! single event kind and is read-only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::events::{DetectedNotification, EventName, Notification};
use super::rate_limit::Cooldown;
use crate::Result;
use crate::database::repositories::{DetectionQuery, SubscriptionRepository};
use crate::database::time::now_ms;

/// The epoch a detection cycle runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBoundary {
    latest: u64,
}

impl CycleBoundary {
    pub fn new(latest: u64) -> Self {
        Self { latest }
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }

    /// The epoch immediately before `latest`. Only meaningful once established.
    pub fn previous(&self) -> u64 {
        self.latest.saturating_sub(1)
    }

    /// False until the first epoch past genesis has been recorded.
    pub fn is_established(&self) -> bool {
        self.latest > 0
    }
}

#[async_trait]
pub trait EventDetector: Send + Sync {
    fn event_name(&self) -> EventName;

    /// Detect notifications for `boundary`.
    ///
    /// Returns an empty list when the boundary is not established. Query
    /// errors are returned unchanged.
    async fn detect(&self, boundary: CycleBoundary) -> Result<Vec<DetectedNotification>>;
}

fn detection_query(
    event_name: EventName,
    latest_epoch: u64,
    previous_epoch: u64,
    cooldown: Cooldown,
) -> DetectionQuery {
    DetectionQuery {
        event_name,
        latest_epoch,
        previous_epoch,
        cutoff_ms: cooldown.cutoff_ms(now_ms()),
    }
}

/// Validators whose balance dropped between the previous and latest epoch.
pub struct BalanceDecreasedDetector {
    repo: Arc<dyn SubscriptionRepository>,
    cooldown: Cooldown,
}

impl BalanceDecreasedDetector {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, cooldown: Cooldown) -> Self {
        Self { repo, cooldown }
    }
}

#[async_trait]
impl EventDetector for BalanceDecreasedDetector {
    fn event_name(&self) -> EventName {
        EventName::ValidatorBalanceDecreased
    }

    async fn detect(&self, boundary: CycleBoundary) -> Result<Vec<DetectedNotification>> {
        if !boundary.is_established() {
            return Ok(Vec::new());
        }

        let query = detection_query(
            self.event_name(),
            boundary.latest(),
            boundary.previous(),
            self.cooldown,
        );
        let rows = self.repo.find_balance_decreased(&query).await?;
        debug!(
            epoch = boundary.latest(),
            matches = rows.len(),
            "balance decrease detection finished"
        );

        Ok(rows
            .into_iter()
            .map(|row| DetectedNotification {
                recipient: row.email,
                notification: Notification::ValidatorBalanceDecreased {
                    subscription_id: row.subscription_id,
                    validator_index: row.validator_index.max(0) as u64,
                    epoch: boundary.latest(),
                    prev_balance: row.prev_balance.max(0) as u64,
                    balance: row.balance.max(0) as u64,
                },
            })
            .collect())
    }
}

/// Validators slashed at the latest epoch.
pub struct ValidatorSlashedDetector {
    repo: Arc<dyn SubscriptionRepository>,
    cooldown: Cooldown,
}

impl ValidatorSlashedDetector {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, cooldown: Cooldown) -> Self {
        Self { repo, cooldown }
    }
}

#[async_trait]
impl EventDetector for ValidatorSlashedDetector {
    fn event_name(&self) -> EventName {
        EventName::ValidatorSlashed
    }

    async fn detect(&self, boundary: CycleBoundary) -> Result<Vec<DetectedNotification>> {
        if !boundary.is_established() {
            return Ok(Vec::new());
        }

        let query = detection_query(
            self.event_name(),
            boundary.latest(),
            boundary.previous(),
            self.cooldown,
        );
        let rows = self.repo.find_slashed(&query).await?;
        debug!(
            epoch = boundary.latest(),
            matches = rows.len(),
            "slashing detection finished"
        );

        Ok(rows
            .into_iter()
            .map(|row| DetectedNotification {
                recipient: row.email,
                notification: Notification::ValidatorSlashed {
                    subscription_id: row.subscription_id,
                    validator_index: row.validator_index.max(0) as u64,
                    epoch: boundary.latest(),
                },
            })
            .collect())
    }
}
