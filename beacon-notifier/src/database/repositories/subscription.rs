//! Subscription repository.
//!
//! Owns users, their subscriptions, the per-detector detection queries and
//! the "mark sent" bookkeeping written after a successful delivery.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{
    BalanceDecreasedRow, SlashedRow, SubscriptionDbModel, UserDbModel, normalize_pubkey_filter,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::notification::EventName;
use crate::{Error, Result};

/// Keeps `IN (...)` lists well below SQLite's bound-parameter limit.
const MARK_SENT_CHUNK_SIZE: usize = 500;

/// Parameters shared by every detection query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionQuery {
    pub event_name: EventName,
    pub latest_epoch: u64,
    pub previous_epoch: u64,
    /// Subscriptions whose `last_sent_ts` is at or after this instant (Unix
    /// epoch milliseconds) are excluded.
    pub cutoff_ms: i64,
}

/// Subscription repository trait.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    // Users
    async fn create_user(&self, email: &str) -> Result<UserDbModel>;
    async fn get_user_by_email(&self, email: &str) -> Result<UserDbModel>;

    // Subscriptions
    async fn get_subscription(&self, id: i64) -> Result<SubscriptionDbModel>;
    async fn list_subscriptions_for_user(&self, user_id: i64) -> Result<Vec<SubscriptionDbModel>>;
    async fn subscribe(
        &self,
        user_id: i64,
        event_name: EventName,
        pubkey: &str,
    ) -> Result<SubscriptionDbModel>;
    async fn unsubscribe(&self, id: i64) -> Result<()>;

    // Detection
    async fn find_balance_decreased(&self, query: &DetectionQuery)
    -> Result<Vec<BalanceDecreasedRow>>;
    async fn find_slashed(&self, query: &DetectionQuery) -> Result<Vec<SlashedRow>>;

    // Delivery bookkeeping
    /// Set `last_sent_ts` for all `subscription_ids` in one transaction.
    async fn mark_sent(&self, subscription_ids: &[i64], sent_at_ms: i64) -> Result<u64>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn epoch_param(epoch: u64) -> Result<i64> {
    i64::try_from(epoch).map_err(|_| Error::validation(format!("epoch {} out of range", epoch)))
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn create_user(&self, email: &str) -> Result<UserDbModel> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::validation(format!("invalid email address: {:?}", email)));
        }

        let user = sqlx::query_as::<_, UserDbModel>(
            r#"
            INSERT INTO users (email, created_ts)
            VALUES (?, ?)
            RETURNING id, email, created_ts
            "#,
        )
        .bind(email)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<UserDbModel> {
        sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("User", email))
    }

    async fn get_subscription(&self, id: i64) -> Result<SubscriptionDbModel> {
        sqlx::query_as::<_, SubscriptionDbModel>("SELECT * FROM users_subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Subscription", id.to_string()))
    }

    async fn list_subscriptions_for_user(&self, user_id: i64) -> Result<Vec<SubscriptionDbModel>> {
        let subs = sqlx::query_as::<_, SubscriptionDbModel>(
            "SELECT * FROM users_subscriptions WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn subscribe(
        &self,
        user_id: i64,
        event_name: EventName,
        pubkey: &str,
    ) -> Result<SubscriptionDbModel> {
        let filter = normalize_pubkey_filter(pubkey)
            .ok_or_else(|| Error::validation(format!("invalid validator public key: {:?}", pubkey)))?;

        // Re-subscribing keeps the existing row and its last_sent_ts.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO users_subscriptions (user_id, event_name, event_filter, created_ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(event_name.as_str())
        .bind(&filter)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let sub = sqlx::query_as::<_, SubscriptionDbModel>(
            r#"
            SELECT * FROM users_subscriptions
            WHERE user_id = ? AND event_name = ? AND event_filter = ?
            "#,
        )
        .bind(user_id)
        .bind(event_name.as_str())
        .bind(&filter)
        .fetch_one(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn unsubscribe(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM users_subscriptions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Subscription", id.to_string()));
        }
        Ok(())
    }

    async fn find_balance_decreased(
        &self,
        query: &DetectionQuery,
    ) -> Result<Vec<BalanceDecreasedRow>> {
        let rows = sqlx::query_as::<_, BalanceDecreasedRow>(
            r#"
            WITH decreased_balance_validators AS (
                SELECT
                    vb.validatorindex,
                    lower(hex(v.pubkey)) AS pubkey,
                    vb.balance,
                    vb2.balance AS prevbalance
                FROM validator_balances vb
                    INNER JOIN validators v ON v.validatorindex = vb.validatorindex
                    INNER JOIN validator_balances vb2
                        ON vb2.validatorindex = vb.validatorindex AND vb2.epoch = ?
                WHERE vb.epoch = ? AND vb.balance < vb2.balance
            )
            SELECT us.id, u.email, dbv.validatorindex, dbv.balance, dbv.prevbalance
            FROM users_subscriptions us
                INNER JOIN users u ON u.id = us.user_id
                INNER JOIN decreased_balance_validators dbv ON dbv.pubkey = us.event_filter
            WHERE us.event_name = ?
                AND (us.last_sent_ts IS NULL OR us.last_sent_ts < ?)
            ORDER BY us.id
            "#,
        )
        .bind(epoch_param(query.previous_epoch)?)
        .bind(epoch_param(query.latest_epoch)?)
        .bind(query.event_name.as_str())
        .bind(query.cutoff_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_slashed(&self, query: &DetectionQuery) -> Result<Vec<SlashedRow>> {
        let rows = sqlx::query_as::<_, SlashedRow>(
            r#"
            SELECT us.id, u.email, v.validatorindex
            FROM users_subscriptions us
                INNER JOIN users u ON u.id = us.user_id
                INNER JOIN validators v ON lower(hex(v.pubkey)) = us.event_filter
            WHERE v.slashed_epoch = ?
                AND us.event_name = ?
                AND (us.last_sent_ts IS NULL OR us.last_sent_ts < ?)
            ORDER BY us.id
            "#,
        )
        .bind(epoch_param(query.latest_epoch)?)
        .bind(query.event_name.as_str())
        .bind(query.cutoff_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_sent(&self, subscription_ids: &[i64], sent_at_ms: i64) -> Result<u64> {
        if subscription_ids.is_empty() {
            return Ok(0);
        }

        retry_on_sqlite_busy("mark_sent", || async {
            let mut tx = self.pool.begin().await?;
            let mut updated = 0u64;

            for chunk in subscription_ids.chunks(MARK_SENT_CHUNK_SIZE) {
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new("UPDATE users_subscriptions SET last_sent_ts = ");
                builder.push_bind(sent_at_ms);
                builder.push(" WHERE id IN (");
                let mut ids = builder.separated(", ");
                for id in chunk {
                    ids.push_bind(*id);
                }
                ids.push_unseparated(")");

                updated += builder.build().execute(&mut *tx).await?.rows_affected();
            }

            tx.commit().await?;
            Ok(updated)
        })
        .await
    }
}
