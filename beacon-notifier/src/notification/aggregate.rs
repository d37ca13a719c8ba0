//! Per-cycle grouping of detected notifications.
//!
//! `recipient -> event kind -> notifications`, in detection order. One
//! aggregate is built per collection cycle and then moved into the
//! dispatcher, so no cycle ever observes another cycle's contents.

use std::collections::{BTreeMap, HashMap};

use super::events::{DetectedNotification, EventName, Notification};

/// Everything one recipient receives in a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientNotifications {
    // BTreeMap keeps section order stable across runs.
    by_event: BTreeMap<EventName, Vec<Notification>>,
}

impl RecipientNotifications {
    /// Sections ordered by event name; notifications in detection order.
    pub fn sections(&self) -> impl Iterator<Item = (EventName, &[Notification])> {
        self.by_event
            .iter()
            .map(|(event, notifications)| (*event, notifications.as_slice()))
    }

    /// Ids of every subscription included, in section order.
    pub fn subscription_ids(&self) -> Vec<i64> {
        self.by_event
            .values()
            .flatten()
            .map(Notification::subscription_id)
            .collect()
    }

    pub fn notification_count(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecipientAggregate {
    by_recipient: HashMap<String, RecipientNotifications>,
}

impl RecipientAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything collected so far.
    pub fn reset(&mut self) {
        self.by_recipient.clear();
    }

    /// Append `notification` to `recipient`'s list for `event_name`.
    pub fn absorb(
        &mut self,
        recipient: impl Into<String>,
        event_name: EventName,
        notification: Notification,
    ) {
        self.by_recipient
            .entry(recipient.into())
            .or_default()
            .by_event
            .entry(event_name)
            .or_default()
            .push(notification);
    }

    pub fn absorb_detected(&mut self, detected: DetectedNotification) {
        let event_name = detected.notification.event_name();
        self.absorb(detected.recipient, event_name, detected.notification);
    }

    pub fn get(&self, recipient: &str) -> Option<&RecipientNotifications> {
        self.by_recipient.get(recipient)
    }

    pub fn recipient_count(&self) -> usize {
        self.by_recipient.len()
    }

    pub fn notification_count(&self) -> usize {
        self.by_recipient
            .values()
            .map(RecipientNotifications::notification_count)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_recipient.is_empty()
    }

    /// Hand each recipient's notifications over by value.
    pub fn into_recipients(self) -> impl Iterator<Item = (String, RecipientNotifications)> {
        self.by_recipient.into_iter()
    }
}
