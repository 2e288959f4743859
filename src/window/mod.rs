//! Recency window over the parsed message sequence.

use std::fmt;

use chrono::{Duration, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::transcript::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum WindowDuration {
    #[serde(rename = "all")]
    #[value(name = "all")]
    All,
    #[serde(rename = "24h")]
    #[value(name = "24h")]
    Day,
    #[serde(rename = "7d")]
    #[value(name = "7d")]
    Week,
    #[serde(rename = "30d")]
    #[value(name = "30d")]
    Month,
}

impl WindowDuration {
    /// Span covered by the window; `None` means unbounded.
    pub fn span(self) -> Option<Duration> {
        match self {
            WindowDuration::All => None,
            WindowDuration::Day => Some(Duration::hours(24)),
            WindowDuration::Week => Some(Duration::days(7)),
            WindowDuration::Month => Some(Duration::days(30)),
        }
    }
}

impl fmt::Display for WindowDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WindowDuration::All => "all",
            WindowDuration::Day => "24h",
            WindowDuration::Week => "7d",
            WindowDuration::Month => "30d",
        };
        f.write_str(label)
    }
}

/// What the window's span is measured back from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    #[value(name = "last_message")]
    LastMessage,
    #[value(name = "now")]
    Now,
}

/// A contiguous tail of the message sequence.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub messages: &'a [Message],
    /// Index of the first window message in the full sequence
    pub offset: usize,
    pub cutoff: Option<NaiveDateTime>,
}

impl<'a> Window<'a> {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the message at `index` in the full sequence lies in the window.
    pub fn contains_index(&self, index: usize) -> bool {
        index >= self.offset && index < self.offset + self.messages.len()
    }
}

/// Select the messages with `timestamp >= anchor - span`.
///
/// `messages` must be chronologically non-decreasing, which the parser
/// guarantees. `now` is only consulted for [`WindowAnchor::Now`].
pub fn select_window(
    messages: &[Message],
    duration: WindowDuration,
    anchor: WindowAnchor,
    now: NaiveDateTime,
) -> Window<'_> {
    let cutoff = duration.span().and_then(|span| {
        let reference = match anchor {
            WindowAnchor::LastMessage => messages.last()?.timestamp,
            WindowAnchor::Now => now,
        };
        reference.checked_sub_signed(span)
    });

    let offset = match cutoff {
        Some(cutoff) => messages.partition_point(|m| m.timestamp < cutoff),
        None => 0,
    };

    Window {
        messages: &messages[offset..],
        offset,
        cutoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn message(timestamp: NaiveDateTime) -> Message {
        Message {
            timestamp,
            sender: Some("A".to_string()),
            body: "x".to_string(),
            attachment_refs: Vec::new(),
            is_system: false,
            line: 1,
        }
    }

    fn sequence() -> Vec<Message> {
        vec![
            message(at(1, 9)),
            message(at(20, 9)),
            message(at(28, 8)),
            message(at(28, 12)),
            message(at(29, 12)),
        ]
    }

    #[test]
    fn test_unbounded_returns_everything() {
        let messages = sequence();
        let window = select_window(&messages, WindowDuration::All, WindowAnchor::LastMessage, at(1, 0));
        assert_eq!(window.len(), messages.len());
        assert_eq!(window.offset, 0);
        assert!(window.cutoff.is_none());
    }

    #[test]
    fn test_day_window_is_inclusive_suffix() {
        let messages = sequence();
        let window = select_window(&messages, WindowDuration::Day, WindowAnchor::LastMessage, at(1, 0));
        assert_eq!(window.cutoff, Some(at(28, 12)));
        assert_eq!(window.offset, 3);
        assert_eq!(window.len(), 2);
        assert!(window.messages.iter().all(|m| m.timestamp >= at(28, 12)));
    }

    #[test]
    fn test_week_and_month_windows() {
        let messages = sequence();
        let week = select_window(&messages, WindowDuration::Week, WindowAnchor::LastMessage, at(1, 0));
        assert_eq!(week.offset, 2);
        let month = select_window(&messages, WindowDuration::Month, WindowAnchor::LastMessage, at(1, 0));
        assert_eq!(month.offset, 0);
    }

    #[test]
    fn test_now_anchor_can_be_empty() {
        let messages = sequence();
        let later = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let window = select_window(&messages, WindowDuration::Week, WindowAnchor::Now, later);
        assert!(window.is_empty());
        assert_eq!(window.offset, messages.len());
    }

    #[test]
    fn test_empty_sequence() {
        let window = select_window(&[], WindowDuration::Day, WindowAnchor::LastMessage, at(1, 0));
        assert!(window.is_empty());
        assert!(window.cutoff.is_none());
    }

    #[test]
    fn test_contains_index() {
        let messages = sequence();
        let window = select_window(&messages, WindowDuration::Day, WindowAnchor::LastMessage, at(1, 0));
        assert!(!window.contains_index(2));
        assert!(window.contains_index(3));
        assert!(window.contains_index(4));
        assert!(!window.contains_index(5));
    }

    #[test]
    fn test_duration_labels() {
        assert_eq!(WindowDuration::Week.to_string(), "7d");
        assert_eq!(
            WindowDuration::from_str("24h", true).unwrap(),
            WindowDuration::Day
        );
        assert_eq!(
            serde_json::to_string(&WindowAnchor::LastMessage).unwrap(),
            "\"last_message\""
        );
    }
}
