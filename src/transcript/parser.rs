//! Line classifier that turns transcript text into [`Message`]s.
//!
//! Two states: waiting for a message start, or inside an open message whose
//! body absorbs every following line that is not itself a message start.

use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::format::{Header, HeaderMatcher, TimestampFormat};
use super::{Message, Transcript};
use crate::error::{ParseError, ParseWarning};

const EXCERPT_CHARS: usize = 60;

/// Characters that carry no text but break prefix matching.
const INVISIBLE_MARKS: &[char] = &[
    '\u{200e}', '\u{200f}', '\u{202a}', '\u{202b}', '\u{202c}', '\u{202d}', '\u{202e}',
    '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}', '\u{feff}',
];

pub struct TranscriptParser {
    headers: HeaderMatcher,
    markers: Regex,
    subject_notice: Regex,
    sender_notices: Regex,
    membership_notices: Regex,
    sample_lines: usize,
}

enum State {
    AwaitingMessageStart,
    Continuation(OpenMessage),
}

struct OpenMessage {
    line: usize,
    timestamp: NaiveDateTime,
    sender: Option<String>,
    body: String,
    attachment_refs: Vec<String>,
    is_system: bool,
}

impl OpenMessage {
    fn add_ref(&mut self, filename: String) {
        if !self.attachment_refs.contains(&filename) {
            self.attachment_refs.push(filename);
        }
    }

    fn append_line(&mut self, text: &str) {
        if self.body.is_empty() {
            if !text.trim().is_empty() {
                self.body.push_str(text);
            }
        } else {
            self.body.push('\n');
            self.body.push_str(text);
        }
    }

    fn close(self) -> Message {
        Message {
            timestamp: self.timestamp,
            sender: self.sender,
            body: self.body.trim_end().to_string(),
            attachment_refs: self.attachment_refs,
            is_system: self.is_system,
            line: self.line,
        }
    }
}

impl TranscriptParser {
    pub fn new(sample_lines: usize) -> Result<Self, regex::Error> {
        let headers = HeaderMatcher::new()?;
        let markers = Regex::new(
            r"(?i)<attached:\s*(?P<a>[^>]+?)\s*>|<media omitted>\s*(?P<b>[^\s<>]+\.[a-z0-9]{2,5})\b|(?P<c>[^\s<>]+\.[a-z0-9]{2,5})\s*\(file attached\)",
        )?;
        let subject_notice = Regex::new(
            r"^[^:]+? changed (?:the subject|this group's icon|the group description|the group name)\b",
        )?;
        let sender_notices = Regex::new(
            r"(?i)^(?:messages and calls are end-to-end encrypted|messages to this (?:group|chat) are now secured with end-to-end encryption|your security code with .+ changed|.+'s security code changed)",
        )?;
        let membership_notices = Regex::new(
            r"(?i)^.+ (?:created group|created this group|added .+|removed .+|left|joined using this group's invite link|changed their phone number.*)$",
        )?;

        Ok(Self {
            headers,
            markers,
            subject_notice,
            sender_notices,
            membership_notices,
            sample_lines: sample_lines.max(1),
        })
    }

    /// Parse a decoded transcript. Fails only when no message can be produced.
    pub fn parse(&self, text: &str) -> Result<Transcript, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let lines: Vec<(&str, String, Option<Header>)> = text
            .lines()
            .map(|raw| {
                let normalized = normalize_line(raw);
                let header = self.headers.match_line(&normalized);
                (raw, normalized, header)
            })
            .collect();

        let samples: Vec<Header> = lines
            .iter()
            .filter_map(|(_, _, header)| header.clone())
            .take(self.sample_lines)
            .collect();

        let (format, fallback) = TimestampFormat::lock_in(&samples).ok_or(
            ParseError::NoMessages {
                lines: lines.len(),
            },
        )?;

        let mut warnings = Vec::new();
        if fallback {
            warn!("No timestamp format fit cleanly, falling back to {}", format);
            warnings.push(ParseWarning::FormatFallback {
                format: format.to_string(),
            });
        } else {
            debug!("Locked transcript timestamp format: {}", format);
        }

        let senders = colon_senders(
            lines
                .iter()
                .filter_map(|(_, _, header)| header.as_ref())
                .filter(|h| format.parse(h).is_some())
                .map(|h| h.rest.as_str()),
        );

        let mut messages: Vec<Message> = Vec::new();
        let mut last_timestamp: Option<NaiveDateTime> = None;
        let mut state = State::AwaitingMessageStart;

        for (index, (raw, normalized, header)) in lines.iter().enumerate() {
            let line_no = index + 1;
            // A prefix of the other layout is quoted text, not a message start.
            let header = header.as_ref().filter(|h| h.layout == format.layout);
            let start = header.and_then(|h| format.parse(h).map(|ts| (h, ts)));

            if start.is_none() && header.is_some() {
                // Looks like a message start but does not read under the
                // locked format; it is neither a message nor body text.
                warnings.push(ParseWarning::UnrecognizedLine {
                    line: line_no,
                    excerpt: excerpt(normalized),
                });
                continue;
            }

            if let Some((header, mut timestamp)) = start {
                if let State::Continuation(open) =
                    std::mem::replace(&mut state, State::AwaitingMessageStart)
                {
                    messages.push(open.close());
                }

                if let Some(previous) = last_timestamp {
                    if timestamp < previous {
                        warnings.push(ParseWarning::OutOfOrderTimestamp { line: line_no });
                        timestamp = previous;
                    }
                }
                last_timestamp = Some(timestamp);

                state = State::Continuation(self.open_message(line_no, timestamp, header, raw, &senders));
                continue;
            }

            match &mut state {
                State::Continuation(open) => {
                    let (cleaned, refs) = self.extract_markers(normalized);
                    let had_refs = !refs.is_empty();
                    for filename in refs {
                        open.add_ref(filename);
                    }
                    if !(had_refs && cleaned.is_empty()) {
                        open.append_line(&cleaned);
                    }
                }
                State::AwaitingMessageStart => {
                    if normalized.trim().is_empty() {
                        continue;
                    }
                    let (_, refs) = self.extract_markers(normalized);
                    if refs.is_empty() {
                        warnings.push(ParseWarning::UnrecognizedLine {
                            line: line_no,
                            excerpt: excerpt(normalized),
                        });
                    } else {
                        for filename in refs {
                            warnings.push(ParseWarning::OrphanAttachment {
                                line: line_no,
                                filename,
                            });
                        }
                    }
                }
            }
        }

        if let State::Continuation(open) = state {
            messages.push(open.close());
        }

        if messages.is_empty() {
            return Err(ParseError::NoMessages { lines: lines.len() });
        }

        debug!(
            "Parsed {} messages from {} lines ({} warnings)",
            messages.len(),
            lines.len(),
            warnings.len()
        );

        Ok(Transcript {
            messages,
            warnings,
            format,
        })
    }

    fn open_message(
        &self,
        line: usize,
        timestamp: NaiveDateTime,
        header: &Header,
        raw: &str,
        senders: &[String],
    ) -> OpenMessage {
        let (sender, body, is_system) = self.split_sender(&header.rest, raw, senders);
        let (cleaned, refs) = self.extract_markers(&body);

        let mut open = OpenMessage {
            line,
            timestamp,
            sender,
            body: cleaned,
            attachment_refs: Vec::new(),
            is_system,
        };
        for filename in refs {
            open.add_ref(filename);
        }
        open
    }

    /// Split `Sender: text`, recognizing notices that carry no real sender.
    /// `senders` lists known names containing `": "`, longest first.
    fn split_sender(
        &self,
        rest: &str,
        raw: &str,
        senders: &[String],
    ) -> (Option<String>, String, bool) {
        if self.subject_notice.is_match(rest) {
            return (None, rest.to_string(), true);
        }

        let split = senders
            .iter()
            .find(|name| {
                rest.strip_prefix(name.as_str())
                    .is_some_and(|tail| tail.starts_with(": "))
            })
            .map(|name| name.len())
            .or_else(|| rest.find(": "));

        if let Some(idx) = split {
            let sender = rest[..idx].trim();
            let body = &rest[idx + 2..];

            if sender.is_empty() || self.sender_notices.is_match(body.trim_start()) {
                return (None, body.to_string(), true);
            }

            // Group exports from some clients put the group name in the
            // sender slot and prefix membership notices with a direction mark.
            let marked = raw.contains(":\u{a0}\u{200e}") || raw.contains(": \u{200e}");
            if marked && self.membership_notices.is_match(body.trim()) {
                return (None, body.to_string(), true);
            }

            return (Some(sender.to_string()), body.to_string(), false);
        }

        if let Some(sender) = rest.strip_suffix(':') {
            if !sender.trim().is_empty() && sender.split_whitespace().count() <= 3 {
                return (Some(sender.trim().to_string()), String::new(), false);
            }
        }

        (None, rest.to_string(), true)
    }

    /// Remove attachment markers from `text`, returning the cleaned text and
    /// the referenced filenames in order.
    fn extract_markers(&self, text: &str) -> (String, Vec<String>) {
        let mut refs = Vec::new();
        for caps in self.markers.captures_iter(text) {
            let name = caps
                .name("a")
                .or_else(|| caps.name("b"))
                .or_else(|| caps.name("c"))
                .map(|m| m.as_str().trim().to_string());
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                refs.push(name);
            }
        }

        if refs.is_empty() {
            return (text.to_string(), refs);
        }

        let cleaned = self.markers.replace_all(text, "");
        (cleaned.trim().to_string(), refs)
    }
}

/// Sender names that contain `": "` themselves, longest first.
///
/// Lines are grouped by the text before their first `": "`. When a group has
/// at least two lines and all of them continue with the same further
/// `segment: `, the longer prefix is the sender's name.
fn colon_senders<'a>(rests: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut groups: HashMap<&str, Vec<&str>> = HashMap::new();
    for rest in rests {
        if let Some(idx) = rest.find(": ") {
            groups.entry(&rest[..idx]).or_default().push(rest);
        }
    }

    let mut senders = Vec::new();
    for (first, lines) in groups {
        if lines.len() < 2 {
            continue;
        }
        let sample = lines[0];
        let mut end = first.len();
        while let Some(offset) = sample[end + 2..].find(": ") {
            let next = end + 2 + offset;
            let prefix = &sample[..next];
            let shared = lines
                .iter()
                .all(|line| line.starts_with(prefix) && line[next..].starts_with(": "));
            if !shared {
                break;
            }
            end = next;
        }
        if end > first.len() {
            senders.push(sample[..end].to_string());
        }
    }

    senders.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    senders
}

/// Drop invisible direction marks and unify exotic spaces.
fn normalize_line(raw: &str) -> String {
    raw.chars()
        .filter(|c| !INVISIBLE_MARKS.contains(c))
        .map(|c| match c {
            '\u{202f}' | '\u{a0}' | '\u{2007}' => ' ',
            other => other,
        })
        .collect()
}

fn excerpt(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > EXCERPT_CHARS {
        let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn parser() -> TranscriptParser {
        TranscriptParser::new(20).unwrap()
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_three_line_example() {
        let text = "[2024-01-01, 10:00] Alice: Hello\n\
                    [2024-01-01, 10:01] Bob: <media omitted> IMG-1.jpg\n\
                    [2024-01-01, 25:61] ???";
        let transcript = parser().parse(text).unwrap();

        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(transcript.messages[0].sender.as_deref(), Some("Alice"));
        assert_eq!(transcript.messages[0].body, "Hello");
        assert_eq!(transcript.messages[1].sender.as_deref(), Some("Bob"));
        assert_eq!(transcript.messages[1].attachment_refs, vec!["IMG-1.jpg"]);
        assert_eq!(transcript.messages[1].body, "");
        assert_eq!(transcript.warnings.len(), 1);
        assert!(matches!(
            transcript.warnings[0],
            ParseWarning::UnrecognizedLine { line: 3, .. }
        ));
    }

    #[test]
    fn test_plain_line_after_message_is_continuation() {
        let text = "[2024-01-01, 10:00] Alice: Hello\n\
                    ~~~ not a timestamp ~~~";
        let transcript = parser().parse(text).unwrap();
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].body, "Hello\n~~~ not a timestamp ~~~");
        assert!(transcript.warnings.is_empty());
    }

    #[test]
    fn test_leading_garbage_is_warned_and_skipped() {
        let text = "exported by some tool\n\
                    [2024-01-01, 10:00] Alice: Hello\n\
                    [2024-01-01, 10:01] Bob: <media omitted> IMG-1.jpg";
        let transcript = parser().parse(text).unwrap();

        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(transcript.warnings.len(), 1);
        assert!(matches!(
            transcript.warnings[0],
            ParseWarning::UnrecognizedLine { line: 1, .. }
        ));
    }

    #[test]
    fn test_multiline_messages_keep_line_order() {
        let text = "29/01/2020, 23:29 - Alice: first line\n\
                    second line\n\
                    \n\
                    third line\n\
                    29/01/2020, 23:30 - Bob: reply\n\
                    more reply";
        let transcript = parser().parse(text).unwrap();

        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(
            transcript.messages[0].body,
            "first line\nsecond line\n\nthird line"
        );
        assert_eq!(transcript.messages[1].body, "reply\nmore reply");
    }

    #[test]
    fn test_dashed_layout_file_attached_marker() {
        let text = "29/01/2020, 23:29 - Author: IMG-20200129-WA0000.jpg (file attached)\n\
                    look at this";
        let transcript = parser().parse(text).unwrap();
        let message = &transcript.messages[0];

        assert_eq!(message.timestamp, dt(2020, 1, 29, 23, 29));
        assert_eq!(message.attachment_refs, vec!["IMG-20200129-WA0000.jpg"]);
        assert_eq!(message.body, "look at this");
    }

    #[test]
    fn test_bracketed_twelve_hour_with_direction_marks() {
        let text = "\u{200e}[1/29/20, 11:29:15\u{202f}PM] Alice: \u{200e}<attached: 00000012-PHOTO-2020-01-29-23-29-15.jpg>\n\
                    [1/29/20, 11:31:00\u{202f}PM] Bob: nice";
        let transcript = parser().parse(text).unwrap();

        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(
            transcript.messages[0].attachment_refs,
            vec!["00000012-PHOTO-2020-01-29-23-29-15.jpg"]
        );
        assert_eq!(
            transcript.messages[1].timestamp,
            NaiveDate::from_ymd_opt(2020, 1, 29)
                .unwrap()
                .and_hms_opt(23, 31, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_system_notices_have_no_sender() {
        let text = "12/03/2024, 09:00 - Messages and calls are end-to-end encrypted. No one outside of this chat can read them.\n\
                    12/03/2024, 09:01 - Alice created group \"Trip\"\n\
                    12/03/2024, 09:02 - Alice changed the subject from \"a: b\" to \"Trip\"\n\
                    12/03/2024, 09:03 - Alice: I left my keys";
        let transcript = parser().parse(text).unwrap();
        let messages = &transcript.messages;

        assert!(messages[0].is_system && messages[0].sender.is_none());
        assert!(messages[1].is_system && messages[1].sender.is_none());
        assert!(messages[2].is_system && messages[2].sender.is_none());
        assert!(!messages[3].is_system);
        assert_eq!(messages[3].sender.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_iso_security_notice_after_sender() {
        let text = "[2024-01-01, 10:00] Trip: Your security code with Bob changed. Tap to learn more.\n\
                    [2024-01-01, 10:05] Bob: hi";
        let transcript = parser().parse(text).unwrap();
        assert!(transcript.messages[0].is_system);
        assert_eq!(transcript.messages[0].sender, None);
        assert!(!transcript.messages[1].is_system);
    }

    #[test]
    fn test_marked_membership_notice_after_sender() {
        let text = "[2024-01-01, 10:00] Trip: \u{200e}Alice added Bob\n\
                    [2024-01-01, 10:01] Carol: Alice added Bob";
        let transcript = parser().parse(text).unwrap();
        assert!(transcript.messages[0].is_system);
        assert!(!transcript.messages[1].is_system);
        assert_eq!(transcript.messages[1].sender.as_deref(), Some("Carol"));
    }

    #[test]
    fn test_orphan_marker_before_first_message() {
        let text = "IMG-1.jpg (file attached)\n\
                    [2024-01-01, 10:00] Alice: Hello";
        let transcript = parser().parse(text).unwrap();
        assert_eq!(
            transcript.warnings,
            vec![ParseWarning::OrphanAttachment {
                line: 1,
                filename: "IMG-1.jpg".to_string()
            }]
        );
    }

    #[test]
    fn test_continuation_marker_attaches_to_open_message() {
        let text = "[2024-01-01, 10:00] Alice: two pictures\n\
                    <attached: a.jpg>\n\
                    <attached: b.jpg>\n\
                    <attached: a.jpg>";
        let transcript = parser().parse(text).unwrap();
        let message = &transcript.messages[0];
        assert_eq!(message.attachment_refs, vec!["a.jpg", "b.jpg"]);
        assert_eq!(message.body, "two pictures");
    }

    #[test]
    fn test_media_omitted_without_filename_stays_in_body() {
        let text = "01/01/2024, 10:00 - Alice: <Media omitted>";
        let transcript = parser().parse(text).unwrap();
        assert!(transcript.messages[0].attachment_refs.is_empty());
        assert_eq!(transcript.messages[0].body, "<Media omitted>");
    }

    #[test]
    fn test_out_of_order_timestamp_is_clamped() {
        let text = "[2024-01-02, 10:00] Alice: later\n\
                    [2024-01-02, 09:00] Bob: earlier";
        // A one-line sample locks year-month-day before the regression is seen.
        let transcript = TranscriptParser::new(1).unwrap().parse(text).unwrap();
        let messages = &transcript.messages;
        assert_eq!(messages[1].timestamp, messages[0].timestamp);
        assert_eq!(
            transcript.warnings,
            vec![ParseWarning::OutOfOrderTimestamp { line: 2 }]
        );
    }

    #[test]
    fn test_timestamps_are_non_decreasing() {
        let text = "1/5/24, 9:00 AM - A: one\n\
                    1/5/24, 9:00 AM - B: two\n\
                    1/5/24, 12:30 PM - A: three\n\
                    1/6/24, 12:01 AM - B: four";
        let transcript = parser().parse(text).unwrap();
        assert_eq!(transcript.messages.len(), 4);
        assert!(transcript
            .messages
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        // Both orders fit, so day-first wins on priority.
        assert_eq!(transcript.messages[3].timestamp, dt(2024, 6, 1, 0, 1));
    }

    #[test]
    fn test_empty_transcript_is_an_error() {
        assert!(matches!(parser().parse("  \n\n"), Err(ParseError::Empty)));
    }

    #[test]
    fn test_transcript_without_messages_is_an_error() {
        let result = parser().parse("hello\nworld");
        assert!(matches!(result, Err(ParseError::NoMessages { lines: 2 })));
    }

    #[test]
    fn test_generated_transcript_reads_back_unchanged() {
        let senders = ["Alice", "Bob", "Carol Ann", "Dr. Who"];
        let start = dt(2024, 3, 1, 8, 0);

        let mut text = String::new();
        let mut expected = Vec::new();
        for i in 0..60usize {
            let timestamp = start + chrono::Duration::minutes((i * 7) as i64);
            let stamp = timestamp.format("[%Y-%m-%d, %H:%M]");

            if i % 11 == 10 {
                text.push_str(&format!("{stamp} Alice added Guest {i}\n"));
                expected.push((timestamp, None, format!("Alice added Guest {i}"), Vec::new(), true));
                continue;
            }

            let sender = senders[i % senders.len()];
            let mut body = format!("message {i}");
            let mut refs = Vec::new();
            text.push_str(&format!("{stamp} {sender}: message {i}\n"));
            if i % 3 == 0 {
                text.push_str(&format!("second line of {i}\n"));
                body.push_str(&format!("\nsecond line of {i}"));
            }
            if i % 4 == 0 {
                text.push_str(&format!("\nafter a blank line {i}\n"));
                body.push_str(&format!("\n\nafter a blank line {i}"));
            }
            if i % 5 == 0 {
                text.push_str(&format!("<attached: IMG-{i}.jpg>\n"));
                refs.push(format!("IMG-{i}.jpg"));
            }
            if i % 10 == 0 {
                text.push_str(&format!("<attached: VID-{i}.mp4>\n"));
                refs.push(format!("VID-{i}.mp4"));
            }
            expected.push((timestamp, Some(sender.to_string()), body, refs, false));
        }

        let transcript = parser().parse(&text).unwrap();
        assert!(transcript.warnings.is_empty(), "{:?}", transcript.warnings);

        let actual: Vec<_> = transcript
            .messages
            .into_iter()
            .map(|m| (m.timestamp, m.sender, m.body, m.attachment_refs, m.is_system))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_quoted_bracketed_line_in_dashed_chat_is_body_text() {
        let text = "29/01/2020, 23:29 - Alice: forwarding this\n\
                    [2019-12-31, 08:00] Bob: old news\n\
                    30/01/2020, 08:15 - Bob: thanks";
        let transcript = parser().parse(text).unwrap();

        assert!(transcript.warnings.is_empty(), "{:?}", transcript.warnings);
        assert_eq!(transcript.messages.len(), 2);
        assert_eq!(
            transcript.messages[0].body,
            "forwarding this\n[2019-12-31, 08:00] Bob: old news"
        );
        assert_eq!(transcript.messages[1].timestamp, dt(2020, 1, 30, 8, 15));
    }

    #[test]
    fn test_sender_name_containing_colon() {
        let text = "[2024-01-01, 10:00] Team: Ops: deploy at noon\n\
                    [2024-01-01, 10:01] Bob: ok\n\
                    [2024-01-01, 10:02] Team: Ops: deploy done\n\
                    [2024-01-01, 10:03] Bob: note: rollback plan is ready\n\
                    [2024-01-01, 10:04] Bob: thanks";
        let transcript = parser().parse(text).unwrap();
        let messages = &transcript.messages;

        assert_eq!(messages[0].sender.as_deref(), Some("Team: Ops"));
        assert_eq!(messages[0].body, "deploy at noon");
        assert_eq!(messages[2].sender.as_deref(), Some("Team: Ops"));
        assert_eq!(messages[2].body, "deploy done");
        // Bob also speaks without the extra segment, so his name stays short.
        assert_eq!(messages[3].sender.as_deref(), Some("Bob"));
        assert_eq!(messages[3].body, "note: rollback plan is ready");
    }

    #[test]
    fn test_sender_with_empty_body_takes_next_line() {
        let text = "[2024-01-01, 10:00] Alice:\n\
                    the actual text";
        let transcript = parser().parse(text).unwrap();
        assert_eq!(transcript.messages[0].sender.as_deref(), Some("Alice"));
        assert_eq!(transcript.messages[0].body, "the actual text");
    }
}
