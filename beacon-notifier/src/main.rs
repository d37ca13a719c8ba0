use std::sync::Arc;

use beacon_notifier::config::NotifierConfig;
use beacon_notifier::database::repositories::{SqlxEpochRepository, SqlxSubscriptionRepository};
use beacon_notifier::database::{self, repositories::SubscriptionRepository};
use beacon_notifier::logging;
use beacon_notifier::notification::{DeliveryChannel, Dispatcher, NotificationScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = NotifierConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let (logging_config, _log_guard) = logging::init_logging(config.log_dir.as_deref())?;
    if let Some(directive) = &config.log_filter {
        if let Err(e) = logging_config.set_filter(directive) {
            warn!(error = %e, "Ignoring LOG_FILTER");
        }
    }
    info!(
        filter = %logging_config.get_filter(),
        log_dir = ?logging_config.log_dir(),
        cooldown_secs = config.cooldown.window().as_secs(),
        "Logging initialized"
    );

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.child_token());

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let subscriptions: Arc<dyn SubscriptionRepository> =
        Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
    let epochs = Arc::new(SqlxEpochRepository::new(pool.clone()));

    let channel = config.channel.build()?;
    info!(channel = channel.channel_type(), "Delivery channel ready");

    let registry = config.build_registry(subscriptions.clone());
    let dispatcher = Dispatcher::new(channel, subscriptions, config.dispatcher_config());
    let scheduler = Arc::new(NotificationScheduler::new(
        epochs,
        registry,
        dispatcher,
        config.scheduler.clone(),
    ));

    let handle = scheduler.clone().start(cancel.clone());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested, waiting for the current cycle to finish");
    cancel.cancel();

    if let Err(e) = handle.await {
        error!(error = %e, "Notification scheduler task failed");
    }

    pool.close().await;
    info!(stats = ?scheduler.stats(), "beacon-notifier stopped");

    Ok(())
}
