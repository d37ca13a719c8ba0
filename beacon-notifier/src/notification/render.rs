//! Plain-text rendering of a recipient's aggregated notifications.

use super::aggregate::RecipientNotifications;

/// Subject line of every notification message.
pub const NOTIFICATION_SUBJECT: &str = "beacon-notifier: Notification";

/// Render one message body.
///
/// Each event kind becomes a section: the event name, a `====` underline and
/// a blank line, then one info line per notification in detection order.
/// Sections are separated by a blank line.
pub fn render_body(notifications: &RecipientNotifications, site_domain: &str) -> String {
    let mut body = String::new();
    for (event_name, section) in notifications.sections() {
        if section.is_empty() {
            continue;
        }
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(event_name.as_str());
        body.push_str("\n====\n\n");
        for notification in section {
            body.push_str(&notification.info(site_domain));
            body.push('\n');
        }
    }
    body
}
