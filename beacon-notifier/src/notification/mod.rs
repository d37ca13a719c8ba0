//! Validator event notifications.
//!
//! Each scheduler cycle reads the latest epoch, runs every registered
//! detector, groups the results per recipient and event kind, and delivers
//! one message per recipient through the configured channel.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_notifier::notification::{
//!     BalanceDecreasedDetector, Cooldown, DetectorRegistry, Dispatcher, DispatcherConfig,
//!     LogChannel, NotificationScheduler, SchedulerConfig,
//! };
//!
//! let mut registry = DetectorRegistry::new();
//! registry.register(Arc::new(BalanceDecreasedDetector::new(repo.clone(), Cooldown::default())));
//!
//! let dispatcher = Dispatcher::new(Arc::new(LogChannel), repo, DispatcherConfig::default());
//! let scheduler = Arc::new(NotificationScheduler::new(
//!     epochs,
//!     registry,
//!     dispatcher,
//!     SchedulerConfig::default(),
//! ));
//! let handle = scheduler.start(cancel_token);
//! ```

pub mod aggregate;
pub mod channels;
pub mod detector;
pub mod dispatcher;
pub mod events;
pub mod rate_limit;
pub mod registry;
pub mod render;
pub mod service;

pub use aggregate::{RecipientAggregate, RecipientNotifications};
pub use channels::{ChannelConfig, DeliveryChannel, LogChannel, OutgoingMessage, WebhookConfig};
pub use detector::{BalanceDecreasedDetector, CycleBoundary, EventDetector, ValidatorSlashedDetector};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig, RecipientOutcome};
pub use events::{DetectedNotification, EventName, Notification};
pub use rate_limit::Cooldown;
pub use registry::DetectorRegistry;
pub use service::{NotificationScheduler, SchedulerConfig, SchedulerStatsSnapshot};
