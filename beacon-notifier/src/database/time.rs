//! Timestamp helpers for the database layer.
//!
//! `users_subscriptions.last_sent_ts` and `created_ts` are `INTEGER` Unix
//! epoch milliseconds (UTC).

use chrono::Utc;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
