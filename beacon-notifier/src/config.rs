//! Process configuration read from the environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::database::repositories::SubscriptionRepository;
use crate::notification::channels::{ChannelConfig, WebhookConfig};
use crate::notification::detector::{BalanceDecreasedDetector, ValidatorSlashedDetector};
use crate::notification::dispatcher::{
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_CONCURRENT_DELIVERIES, DispatcherConfig,
};
use crate::notification::rate_limit::{Cooldown, DEFAULT_COOLDOWN};
use crate::notification::registry::DetectorRegistry;
use crate::notification::service::SchedulerConfig;
use crate::notification::EventName;
use crate::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite:beacon-notifier.db?mode=rwc";
const DEFAULT_SITE_DOMAIN: &str = "beaconcha.in";

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub database_url: String,
    /// Explorer domain used in notification links.
    pub site_domain: String,
    pub scheduler: SchedulerConfig,
    pub cooldown: Cooldown,
    pub max_concurrent_deliveries: usize,
    pub delivery_timeout: Duration,
    /// Event kinds with a registered detector, in registration order.
    pub events: Vec<EventName>,
    pub channel: ChannelConfig,
    /// Directory for daily log files; console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Filter directive applied after logging is up, replacing the default.
    pub log_filter: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            site_domain: DEFAULT_SITE_DOMAIN.to_string(),
            scheduler: SchedulerConfig::default(),
            cooldown: Cooldown::new(DEFAULT_COOLDOWN),
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            events: vec![EventName::ValidatorBalanceDecreased],
            channel: ChannelConfig::Log,
            log_dir: None,
            log_filter: None,
        }
    }
}

impl NotifierConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// Unset or blank variables keep their defaults; malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(domain) = get("SITE_DOMAIN") {
            config.site_domain = domain;
        }
        if let Some(secs) = get("NOTIFY_INTERVAL_SECS") {
            config.scheduler.interval = parse_nonzero_secs("NOTIFY_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = get("NOTIFY_ERROR_BACKOFF_SECS") {
            config.scheduler.error_backoff = parse_secs("NOTIFY_ERROR_BACKOFF_SECS", &secs)?;
        }
        if let Some(secs) = get("NOTIFY_COOLDOWN_SECS") {
            config.cooldown = Cooldown::new(parse_secs("NOTIFY_COOLDOWN_SECS", &secs)?);
        }
        if let Some(value) = get("NOTIFY_MAX_CONCURRENT_DELIVERIES") {
            let parsed = value.parse::<usize>().map_err(|e| {
                Error::config(format!("NOTIFY_MAX_CONCURRENT_DELIVERIES={}: {}", value, e))
            })?;
            if parsed == 0 {
                return Err(Error::config(
                    "NOTIFY_MAX_CONCURRENT_DELIVERIES must be at least 1",
                ));
            }
            config.max_concurrent_deliveries = parsed;
        }
        if let Some(secs) = get("NOTIFY_DELIVERY_TIMEOUT_SECS") {
            config.delivery_timeout = parse_nonzero_secs("NOTIFY_DELIVERY_TIMEOUT_SECS", &secs)?;
        }
        if let Some(events) = get("NOTIFY_EVENTS") {
            config.events = parse_events(&events)?;
        }
        if let Some(url) = get("MAIL_RELAY_URL") {
            let mut webhook = WebhookConfig {
                url,
                bearer_token: get("MAIL_RELAY_TOKEN"),
                ..Default::default()
            };
            if let Some(from) = get("MAIL_FROM") {
                webhook.from_address = from;
            }
            config.channel = ChannelConfig::Webhook(webhook);
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        config.log_filter = get("LOG_FILTER");

        Ok(config)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            delivery_timeout: self.delivery_timeout,
            site_domain: self.site_domain.clone(),
        }
    }

    /// One detector per configured event kind.
    pub fn build_registry(&self, repo: Arc<dyn SubscriptionRepository>) -> DetectorRegistry {
        let mut registry = DetectorRegistry::new();
        for event in &self.events {
            match event {
                EventName::ValidatorBalanceDecreased => registry.register(Arc::new(
                    BalanceDecreasedDetector::new(repo.clone(), self.cooldown),
                )),
                EventName::ValidatorSlashed => registry.register(Arc::new(
                    ValidatorSlashedDetector::new(repo.clone(), self.cooldown),
                )),
            }
        }
        registry
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::config(format!("{}={}: {}", key, value, e)))
}

/// Like [`parse_secs`], for values where zero would stall or break the loop.
fn parse_nonzero_secs(key: &str, value: &str) -> Result<Duration> {
    let duration = parse_secs(key, value)?;
    if duration.is_zero() {
        return Err(Error::config(format!("{} must be at least 1", key)));
    }
    Ok(duration)
}

fn parse_events(value: &str) -> Result<Vec<EventName>> {
    let mut events = Vec::new();
    for raw in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let event = EventName::parse_lenient(raw)
            .ok_or_else(|| Error::config(format!("unknown event in NOTIFY_EVENTS: {}", raw)))?;
        if !events.contains(&event) {
            events.push(event);
        }
    }
    if events.is_empty() {
        return Err(Error::config("NOTIFY_EVENTS names no events"));
    }
    Ok(events)
}
