//! Notification event kinds and the notifications detectors produce.

use serde::{Deserialize, Serialize};

/// Gwei per ETH.
const GWEI_PER_ETH: u64 = 1_000_000_000;

/// Kind of event a subscription can be made for.
///
/// The string form is what `users_subscriptions.event_name` stores and what
/// heads each section of a rendered message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    ValidatorBalanceDecreased,
    ValidatorSlashed,
}

/// Static metadata about a supported event kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventNameInfo {
    pub event_name: EventName,
    /// Additional accepted spellings.
    pub aliases: &'static [&'static str],
}

const EVENT_NAMES: &[EventNameInfo] = &[
    EventNameInfo {
        event_name: EventName::ValidatorBalanceDecreased,
        aliases: &["balance_decreased", "balance"],
    },
    EventNameInfo {
        event_name: EventName::ValidatorSlashed,
        aliases: &["slashed", "slashing"],
    },
];

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidatorBalanceDecreased => "validator_balance_decreased",
            Self::ValidatorSlashed => "validator_slashed",
        }
    }

    /// Resolve a user- or config-supplied event name, accepting aliases.
    pub fn parse_lenient(input: &str) -> Option<Self> {
        let normalized = normalize_event_key(input);
        if normalized.is_empty() {
            return None;
        }

        EVENT_NAMES
            .iter()
            .find(|info| {
                normalize_event_key(info.event_name.as_str()) == normalized
                    || info
                        .aliases
                        .iter()
                        .any(|alias| normalize_event_key(alias) == normalized)
            })
            .map(|info| info.event_name)
    }
}

pub fn event_names() -> &'static [EventNameInfo] {
    EVENT_NAMES
}

fn normalize_event_key(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | '.' | '-' | ' '))
        .collect()
}

/// A notification for one subscription, produced by a detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A validator's balance is lower at `epoch` than at `epoch - 1`.
    ValidatorBalanceDecreased {
        subscription_id: i64,
        validator_index: u64,
        epoch: u64,
        /// Gwei.
        prev_balance: u64,
        /// Gwei.
        balance: u64,
    },
    /// A validator was slashed at `epoch`.
    ValidatorSlashed {
        subscription_id: i64,
        validator_index: u64,
        epoch: u64,
    },
}

impl Notification {
    pub fn subscription_id(&self) -> i64 {
        match self {
            Self::ValidatorBalanceDecreased {
                subscription_id, ..
            }
            | Self::ValidatorSlashed {
                subscription_id, ..
            } => *subscription_id,
        }
    }

    pub fn event_name(&self) -> EventName {
        match self {
            Self::ValidatorBalanceDecreased { .. } => EventName::ValidatorBalanceDecreased,
            Self::ValidatorSlashed { .. } => EventName::ValidatorSlashed,
        }
    }

    /// One human-readable line, with links into the explorer at `site_domain`.
    pub fn info(&self, site_domain: &str) -> String {
        match self {
            Self::ValidatorBalanceDecreased {
                validator_index,
                epoch,
                prev_balance,
                balance,
                ..
            } => format!(
                "The balance of validator {idx} (https://{domain}/validator/{idx}) decreased by {diff} ETH to {balance} ETH at epoch {epoch} (https://{domain}/epoch/{epoch}).",
                idx = validator_index,
                domain = site_domain,
                diff = format_gwei(prev_balance.saturating_sub(*balance)),
                balance = format_gwei(*balance),
                epoch = epoch,
            ),
            Self::ValidatorSlashed {
                validator_index,
                epoch,
                ..
            } => format!(
                "Validator {idx} (https://{domain}/validator/{idx}) has been slashed at epoch {epoch} (https://{domain}/epoch/{epoch}).",
                idx = validator_index,
                domain = site_domain,
                epoch = epoch,
            ),
        }
    }
}

/// A notification together with the address it must be delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedNotification {
    pub recipient: String,
    pub notification: Notification,
}

/// Render a Gwei amount as ETH without floating point rounding.
pub fn format_gwei(gwei: u64) -> String {
    let whole = gwei / GWEI_PER_ETH;
    let frac = gwei % GWEI_PER_ETH;
    if frac == 0 {
        return whole.to_string();
    }

    let digits = format!("{:09}", frac);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}
