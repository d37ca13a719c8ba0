//! Integration tests for the notification pipeline.
//!
//! These tests run the real repositories, detectors and dispatcher against
//! an in-memory SQLite database with the schema migrated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use beacon_notifier::config::NotifierConfig;
use beacon_notifier::database::repositories::{
    DetectionQuery, SqlxEpochRepository, SqlxSubscriptionRepository, SubscriptionRepository,
};
use beacon_notifier::database::time::now_ms;
use beacon_notifier::database::{DbPool, init_pool_with_size, run_migrations};
use beacon_notifier::notification::{
    DeliveryChannel, Dispatcher, EventName, NotificationScheduler, OutgoingMessage,
};
use beacon_notifier::{Error, Result};

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db() -> DbPool {
    // One connection: every in-memory connection is a separate database.
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn pubkey(seed: u8) -> Vec<u8> {
    vec![seed; 48]
}

fn pubkey_hex(seed: u8) -> String {
    format!("0x{}", format!("{:02X}", seed).repeat(48))
}

async fn insert_validator(pool: &DbPool, index: i64, seed: u8, slashed_epoch: Option<i64>) {
    sqlx::query("INSERT INTO validators (validatorindex, pubkey, slashed_epoch) VALUES (?, ?, ?)")
        .bind(index)
        .bind(pubkey(seed))
        .bind(slashed_epoch)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_balance(pool: &DbPool, index: i64, epoch: i64, balance: i64) {
    sqlx::query("INSERT INTO validator_balances (validatorindex, epoch, balance) VALUES (?, ?, ?)")
        .bind(index)
        .bind(epoch)
        .bind(balance)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_epochs(pool: &DbPool, epochs: &[i64]) {
    for epoch in epochs {
        sqlx::query("INSERT INTO epochs (epoch) VALUES (?)")
            .bind(epoch)
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn set_last_sent(pool: &DbPool, subscription_id: i64, last_sent_ts: i64) {
    sqlx::query("UPDATE users_subscriptions SET last_sent_ts = ? WHERE id = ?")
        .bind(last_sent_ts)
        .bind(subscription_id)
        .execute(pool)
        .await
        .unwrap();
}

/// Records every message; refuses recipients whose address starts with `fail`.
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<OutgoingMessage>>,
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn channel_type(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        if message.to.starts_with("fail") {
            return Err(Error::delivery(&message.to, "mailbox unavailable"));
        }
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

struct Harness {
    pool: DbPool,
    repo: Arc<SqlxSubscriptionRepository>,
    channel: Arc<RecordingChannel>,
    scheduler: NotificationScheduler,
}

async fn harness(events: &str) -> Harness {
    let pool = setup_test_db().await;
    let repo = Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
    let channel = Arc::new(RecordingChannel::default());

    let config = NotifierConfig::from_lookup(|key| match key {
        "SITE_DOMAIN" => Some("beaconcha.in".to_string()),
        "NOTIFY_EVENTS" => Some(events.to_string()),
        _ => None,
    })
    .unwrap();

    let registry = config.build_registry(repo.clone());
    let dispatcher = Dispatcher::new(channel.clone(), repo.clone(), config.dispatcher_config());
    let scheduler = NotificationScheduler::new(
        Arc::new(SqlxEpochRepository::new(pool.clone())),
        registry,
        dispatcher,
        config.scheduler.clone(),
    );

    Harness {
        pool,
        repo,
        channel,
        scheduler,
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_balance_decrease_is_delivered_and_recorded() {
        let h = harness("validator_balance_decreased").await;
        insert_validator(&h.pool, 42, 0xab, None).await;
        insert_balance(&h.pool, 42, 99, 32_100_000_000).await;
        insert_balance(&h.pool, 42, 100, 32_050_000_000).await;
        insert_epochs(&h.pool, &[99, 100]).await;

        let user = h.repo.create_user("a@x.com").await.unwrap();
        let sub = h
            .repo
            .subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0xab))
            .await
            .unwrap();

        let before = now_ms();
        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.notifications_sent, 1);

        let sent = h.channel.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@x.com");
        assert_eq!(sent[0].subject, "beacon-notifier: Notification");
        assert_eq!(
            sent[0].body,
            "validator_balance_decreased\n====\n\n\
             The balance of validator 42 (https://beaconcha.in/validator/42) decreased by 0.05 ETH to 32.05 ETH at epoch 100 (https://beaconcha.in/epoch/100).\n"
        );

        let stored = h.repo.get_subscription(sub.id).await.unwrap();
        assert!(stored.last_sent_ts.unwrap() >= before);

        // The next pass is inside the cooldown window.
        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recipients, 0);
        assert_eq!(h.channel.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_delivery_is_suppressed() {
        let h = harness("validator_balance_decreased").await;
        insert_validator(&h.pool, 1, 0x01, None).await;
        insert_validator(&h.pool, 2, 0x02, None).await;
        for index in [1, 2] {
            insert_balance(&h.pool, index, 9, 32_000_000_000).await;
            insert_balance(&h.pool, index, 10, 31_000_000_000).await;
        }
        insert_epochs(&h.pool, &[9, 10]).await;

        let user = h.repo.create_user("a@x.com").await.unwrap();
        let recent = h
            .repo
            .subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0x01))
            .await
            .unwrap();
        let stale = h
            .repo
            .subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0x02))
            .await
            .unwrap();
        set_last_sent(&h.pool, recent.id, now_ms() - 5 * 60 * 1000).await;
        set_last_sent(&h.pool, stale.id, now_ms() - 11 * 60 * 1000).await;

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.notifications_sent, 1);

        let sent = h.channel.sent.lock().await;
        assert!(sent[0].body.contains("validator 2 "));
        assert!(!sent[0].body.contains("validator 1 "));
    }

    #[tokio::test]
    async fn test_grouping_and_failure_isolation() {
        let h = harness("validator_balance_decreased,validator_slashed").await;
        insert_validator(&h.pool, 1, 0x01, None).await;
        insert_validator(&h.pool, 2, 0x02, Some(10)).await;
        insert_balance(&h.pool, 1, 9, 32_000_000_000).await;
        insert_balance(&h.pool, 1, 10, 31_999_999_999).await;
        insert_epochs(&h.pool, &[9, 10]).await;

        let a = h.repo.create_user("a@x.com").await.unwrap();
        let failing = h.repo.create_user("fail@x.com").await.unwrap();

        let a_balance = h
            .repo
            .subscribe(a.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0x01))
            .await
            .unwrap();
        let a_slashed = h
            .repo
            .subscribe(a.id, EventName::ValidatorSlashed, &pubkey_hex(0x02))
            .await
            .unwrap();
        let failing_balance = h
            .repo
            .subscribe(failing.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0x01))
            .await
            .unwrap();

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.delivery_failures, 1);

        let sent = h.channel.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        let sections: Vec<&str> = sent[0].body.split("\n\n").collect();
        assert_eq!(sections[0], "validator_balance_decreased\n====");
        assert!(sections[1].contains("decreased by 0.000000001 ETH to 31.999999999 ETH"));
        assert_eq!(sections[2], "validator_slashed\n====");
        assert!(sections[3].starts_with("Validator 2 "));

        assert!(h.repo.get_subscription(a_balance.id).await.unwrap().last_sent_ts.is_some());
        assert!(h.repo.get_subscription(a_slashed.id).await.unwrap().last_sent_ts.is_some());
        assert!(
            h.repo
                .get_subscription(failing_balance.id)
                .await
                .unwrap()
                .last_sent_ts
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_no_epoch_yet_sends_nothing() {
        let h = harness("validator_balance_decreased").await;
        insert_validator(&h.pool, 1, 0x01, None).await;
        let user = h.repo.create_user("a@x.com").await.unwrap();
        h.repo
            .subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0x01))
            .await
            .unwrap();

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recipients, 0);
        assert!(h.channel.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_detection_error_aborts_cycle() {
        let h = harness("validator_balance_decreased").await;
        insert_epochs(&h.pool, &[1, 2]).await;
        sqlx::query("DROP TABLE validator_balances")
            .execute(&h.pool)
            .await
            .unwrap();

        let result = h.scheduler.run_cycle().await;
        assert!(matches!(result, Err(Error::DatabaseSqlx(_))));
        assert!(h.channel.sent.lock().await.is_empty());
        assert_eq!(h.scheduler.stats().cycles_completed, 0);
    }

    #[tokio::test]
    async fn test_unchanged_or_increased_balance_is_ignored() {
        let h = harness("validator_balance_decreased").await;
        insert_validator(&h.pool, 1, 0x01, None).await;
        insert_validator(&h.pool, 2, 0x02, None).await;
        insert_balance(&h.pool, 1, 9, 32_000_000_000).await;
        insert_balance(&h.pool, 1, 10, 32_000_000_000).await;
        insert_balance(&h.pool, 2, 9, 32_000_000_000).await;
        insert_balance(&h.pool, 2, 10, 32_000_000_001).await;
        insert_epochs(&h.pool, &[9, 10]).await;

        let user = h.repo.create_user("a@x.com").await.unwrap();
        for seed in [0x01, 0x02] {
            h.repo
                .subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(seed))
                .await
                .unwrap();
        }

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.recipients, 0);
    }
}

mod subscription_repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_crud() {
        let pool = setup_test_db().await;
        let repo = SqlxSubscriptionRepository::new(pool);

        let user = repo.create_user(" a@x.com ").await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_eq!(repo.get_user_by_email("a@x.com").await.unwrap().id, user.id);

        assert!(matches!(
            repo.create_user("not-an-address").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            repo.create_user("a@x.com").await,
            Err(Error::DatabaseSqlx(_))
        ));
        assert!(matches!(
            repo.get_user_by_email("b@x.com").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_and_normalized() {
        let pool = setup_test_db().await;
        let repo = SqlxSubscriptionRepository::new(pool.clone());
        let user = repo.create_user("a@x.com").await.unwrap();

        let first = repo
            .subscribe(user.id, EventName::ValidatorSlashed, &pubkey_hex(0xCD))
            .await
            .unwrap();
        assert_eq!(first.event_name, "validator_slashed");
        assert_eq!(first.event_filter, "cd".repeat(48));
        assert!(first.last_sent_ts.is_none());

        set_last_sent(&pool, first.id, 1_000).await;
        let again = repo
            .subscribe(user.id, EventName::ValidatorSlashed, &"cd".repeat(48))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.last_sent_ts, Some(1_000));

        repo.subscribe(user.id, EventName::ValidatorBalanceDecreased, &pubkey_hex(0xCD))
            .await
            .unwrap();
        assert_eq!(repo.list_subscriptions_for_user(user.id).await.unwrap().len(), 2);

        assert!(matches!(
            repo.subscribe(user.id, EventName::ValidatorSlashed, "0xnothex").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let pool = setup_test_db().await;
        let repo = SqlxSubscriptionRepository::new(pool);
        let user = repo.create_user("a@x.com").await.unwrap();
        let sub = repo
            .subscribe(user.id, EventName::ValidatorSlashed, &pubkey_hex(0x01))
            .await
            .unwrap();

        repo.unsubscribe(sub.id).await.unwrap();
        assert!(matches!(
            repo.get_subscription(sub.id).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            repo.unsubscribe(sub.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_detection_queries_exclude_sends_at_cutoff() {
        const CUTOFF: i64 = 1_700_000_000_000;

        let pool = setup_test_db().await;
        let repo = SqlxSubscriptionRepository::new(pool.clone());
        insert_validator(&pool, 1, 0x01, Some(10)).await;
        insert_balance(&pool, 1, 9, 32_000_000_000).await;
        insert_balance(&pool, 1, 10, 31_000_000_000).await;

        let at_cutoff = repo.create_user("at@x.com").await.unwrap();
        let before_cutoff = repo.create_user("before@x.com").await.unwrap();

        for event in [EventName::ValidatorBalanceDecreased, EventName::ValidatorSlashed] {
            let excluded = repo
                .subscribe(at_cutoff.id, event, &pubkey_hex(0x01))
                .await
                .unwrap();
            let included = repo
                .subscribe(before_cutoff.id, event, &pubkey_hex(0x01))
                .await
                .unwrap();
            set_last_sent(&pool, excluded.id, CUTOFF).await;
            set_last_sent(&pool, included.id, CUTOFF - 1).await;
        }

        let query = |event_name| DetectionQuery {
            event_name,
            latest_epoch: 10,
            previous_epoch: 9,
            cutoff_ms: CUTOFF,
        };

        let decreased = repo
            .find_balance_decreased(&query(EventName::ValidatorBalanceDecreased))
            .await
            .unwrap();
        let emails: Vec<&str> = decreased.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["before@x.com"]);
        assert_eq!(decreased[0].prev_balance, 32_000_000_000);
        assert_eq!(decreased[0].balance, 31_000_000_000);

        let slashed = repo
            .find_slashed(&query(EventName::ValidatorSlashed))
            .await
            .unwrap();
        let emails: Vec<&str> = slashed.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["before@x.com"]);
        assert_eq!(slashed[0].validator_index, 1);
    }

    #[tokio::test]
    async fn test_mark_sent_touches_only_given_ids() {
        let pool = setup_test_db().await;
        let repo = SqlxSubscriptionRepository::new(pool);
        let user = repo.create_user("a@x.com").await.unwrap();

        let mut ids = Vec::new();
        for seed in 1..=3u8 {
            let sub = repo
                .subscribe(user.id, EventName::ValidatorSlashed, &pubkey_hex(seed))
                .await
                .unwrap();
            ids.push(sub.id);
        }

        assert_eq!(repo.mark_sent(&[], 5).await.unwrap(), 0);
        assert_eq!(repo.mark_sent(&[ids[0], ids[2], 9_999], 5_000).await.unwrap(), 2);

        let subs = repo.list_subscriptions_for_user(user.id).await.unwrap();
        let last_sent: Vec<Option<i64>> = subs.iter().map(|s| s.last_sent_ts).collect();
        assert_eq!(last_sent, vec![Some(5_000), None, Some(5_000)]);
    }
}

mod scheduler_tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let h = harness("validator_balance_decreased").await;
        let scheduler = Arc::new(h.scheduler);

        let cancel = CancellationToken::new();
        let handle = scheduler.clone().start(cancel.clone());

        // Let at least one cycle run before shutting down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert!(scheduler.stats().cycles_completed >= 1);
        assert_eq!(scheduler.stats().collection_failures, 0);
    }
}
