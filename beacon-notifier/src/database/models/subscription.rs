//! User and subscription database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user receiving notifications at `email`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub id: i64,
    pub email: String,
    pub created_ts: i64,
}

/// A user's subscription to one event kind for one validator.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionDbModel {
    pub id: i64,
    pub user_id: i64,
    /// Canonical event name (see `EventName`).
    pub event_name: String,
    /// Validator public key, lower-case hex without `0x`.
    pub event_filter: String,
    /// Unix epoch milliseconds of the last delivered notification.
    pub last_sent_ts: Option<i64>,
    pub created_ts: i64,
}

/// Row produced by the balance-decreased detection query.
#[derive(Debug, Clone, FromRow)]
pub struct BalanceDecreasedRow {
    #[sqlx(rename = "id")]
    pub subscription_id: i64,
    pub email: String,
    #[sqlx(rename = "validatorindex")]
    pub validator_index: i64,
    /// Balance at the latest epoch, in Gwei.
    pub balance: i64,
    /// Balance at the previous epoch, in Gwei.
    #[sqlx(rename = "prevbalance")]
    pub prev_balance: i64,
}

/// Row produced by the validator-slashed detection query.
#[derive(Debug, Clone, FromRow)]
pub struct SlashedRow {
    #[sqlx(rename = "id")]
    pub subscription_id: i64,
    pub email: String,
    #[sqlx(rename = "validatorindex")]
    pub validator_index: i64,
}

/// Normalize a validator public key for use as a subscription filter.
///
/// Strips an optional `0x` prefix and lower-cases the hex digits. Returns
/// `None` when the remainder is empty or not hex.
pub fn normalize_pubkey_filter(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex.is_empty() || hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(hex.to_ascii_lowercase())
}
