//! Notification scheduler.
//!
//! Runs `collect -> dispatch -> sleep` until cancelled. A failed collection
//! dispatches nothing and is retried after a short backoff; a successful one
//! is followed by the regular interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::aggregate::RecipientAggregate;
use super::detector::CycleBoundary;
use super::dispatcher::{DispatchReport, Dispatcher};
use super::registry::DetectorRegistry;
use crate::Result;
use crate::database::repositories::EpochRepository;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep after a successful cycle.
    pub interval: Duration,
    /// Sleep after a failed collection.
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

/// Counters accumulated over the scheduler's lifetime.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles_completed: AtomicU64,
    collection_failures: AtomicU64,
    messages_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    record_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatsSnapshot {
    pub cycles_completed: u64,
    pub collection_failures: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub record_failures: u64,
}

impl SchedulerStats {
    fn record_dispatch(&self, report: &DispatchReport) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.messages_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.delivery_failures as u64, Ordering::Relaxed);
        self.record_failures
            .fetch_add(report.record_failures as u64, Ordering::Relaxed);
    }

    fn record_collection_failure(&self) {
        self.collection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            collection_failures: self.collection_failures.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct NotificationScheduler {
    epochs: Arc<dyn EpochRepository>,
    registry: DetectorRegistry,
    dispatcher: Dispatcher,
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl NotificationScheduler {
    pub fn new(
        epochs: Arc<dyn EpochRepository>,
        registry: DetectorRegistry,
        dispatcher: Dispatcher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            epochs,
            registry,
            dispatcher,
            config,
            stats: SchedulerStats::default(),
        }
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one collection and, if it succeeds, one dispatch.
    ///
    /// On a collection error nothing is dispatched and the error is returned.
    pub async fn run_cycle(&self) -> Result<DispatchReport> {
        let started = Instant::now();

        let boundary = CycleBoundary::new(self.epochs.latest_epoch().await?);
        let mut aggregate = RecipientAggregate::new();
        let detected = self.registry.collect_into(&mut aggregate, boundary).await?;

        let report = self.dispatcher.dispatch(aggregate).await;
        self.stats.record_dispatch(&report);

        info!(
            epoch = boundary.latest(),
            notifications = detected,
            recipients = report.recipients,
            delivered = report.delivered,
            delivery_failures = report.delivery_failures,
            record_failures = report.record_failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Notification cycle finished"
        );
        Ok(report)
    }

    /// Loop until `cancel` fires. A cycle already running is completed first.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            events = ?self.registry.event_names(),
            "Notification scheduler started"
        );

        while !cancel.is_cancelled() {
            let delay = match self.run_cycle().await {
                Ok(_) => self.config.interval,
                Err(e) => {
                    self.stats.record_collection_failure();
                    error!(
                        error = %e,
                        retry_in_secs = self.config.error_backoff.as_secs_f64(),
                        "Error collecting notifications"
                    );
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(stats = ?self.stats(), "Notification scheduler stopped");
    }

    /// Spawn [`run`](Self::run) onto the runtime.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
