//! Subscriber notifications.

pub mod dispatcher;

pub use dispatcher::{DispatchReport, NotificationDispatcher};

use crate::data::{ReceivedItem, Tracker};

/// Message body announcing newly received items for one tracker
pub fn format_notification(tracker: &Tracker, items: &[ReceivedItem]) -> String {
    let lines: Vec<String> = items
        .iter()
        .map(|item| format!("{} (Order Received: {})", item.name, item.sequence))
        .collect();

    format!(
        "Room: {}, Slot: {} has received the following items:\n{}",
        tracker.room,
        tracker.slot,
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_notification_layout() {
        let items = vec![
            ReceivedItem {
                name: "Bow".to_string(),
                sequence: 7,
            },
            ReceivedItem {
                name: "Hookshot".to_string(),
                sequence: 8,
            },
        ];

        let message = format_notification(&Tracker::new("R", "S"), &items);
        assert_eq!(
            message,
            "Room: R, Slot: S has received the following items:\n\
             Bow (Order Received: 7)\n\
             Hookshot (Order Received: 8)"
        );
    }
}
