//! Timestamp prefixes used by chat exports and the lock-in rule that picks one.
//!
//! Exports differ by client and locale: `[29/01/2020, 23:29:15] ...` on one
//! platform, `1/29/20, 11:29 PM - ...` on another. Day/month order cannot be
//! decided from a single line, so the first lines of a transcript pick one
//! [`TimestampFormat`] that is then used for the whole file.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::Serialize;
use std::fmt;

const DATE: &str = r"\d{1,4}[./-]\d{1,2}[./-]\d{1,4}";
const TIME: &str = r"\d{1,2}[:.]\d{2}(?:[:.]\d{2})?(?:\s*(?i:[ap]\.?\s?m\.?))?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `[date, time] rest`
    Bracketed,
    /// `date, time - rest`
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    TwentyFourHour,
    TwelveHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimestampFormat {
    pub layout: Layout,
    pub order: DateOrder,
    pub clock: Clock,
}

/// A line that looks like a message start, before any date interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub layout: Layout,
    pub date: String,
    pub time: String,
    pub rest: String,
}

impl TimestampFormat {
    /// Every supported format, in the priority order used for lock-in.
    pub fn candidates() -> Vec<TimestampFormat> {
        let mut formats = Vec::with_capacity(12);
        for layout in [Layout::Bracketed, Layout::Dashed] {
            for order in [
                DateOrder::DayMonthYear,
                DateOrder::MonthDayYear,
                DateOrder::YearMonthDay,
            ] {
                for clock in [Clock::TwentyFourHour, Clock::TwelveHour] {
                    formats.push(TimestampFormat {
                        layout,
                        order,
                        clock,
                    });
                }
            }
        }
        formats
    }

    /// Interpret a header under this format. `None` when layout, date order or
    /// clock style do not fit.
    pub fn parse(&self, header: &Header) -> Option<NaiveDateTime> {
        if header.layout != self.layout {
            return None;
        }
        let date = parse_date(&header.date, self.order)?;
        let time = parse_time(&header.time, self.clock)?;
        Some(date.and_time(time))
    }

    /// Choose the format for a transcript from its first message-start lines.
    ///
    /// Samples no candidate can read at all are ignored, and so are samples
    /// of the minority layout (a quoted line inside a message body). Ties go
    /// to the layout seen first. The first candidate that parses every
    /// remaining sample without going backwards in time wins. Otherwise the
    /// candidate that parses the most samples is returned with
    /// `fallback = true`. `None` when nothing parses at all.
    pub fn lock_in(samples: &[Header]) -> Option<(TimestampFormat, bool)> {
        let candidates = Self::candidates();
        let readable: Vec<&Header> = samples
            .iter()
            .filter(|h| candidates.iter().any(|f| f.parse(h).is_some()))
            .collect();
        let first = readable.first()?.layout;
        let count = |layout: Layout| readable.iter().filter(|h| h.layout == layout).count();
        let other = match first {
            Layout::Bracketed => Layout::Dashed,
            Layout::Dashed => Layout::Bracketed,
        };
        let layout = if count(other) > count(first) { other } else { first };

        let samples: Vec<&Header> = readable
            .into_iter()
            .filter(|h| h.layout == layout)
            .collect();
        let candidates: Vec<TimestampFormat> = candidates
            .into_iter()
            .filter(|f| f.layout == layout)
            .collect();

        let mut best: Option<(TimestampFormat, usize)> = None;
        for format in candidates {
            let parsed: Vec<NaiveDateTime> =
                samples.iter().filter_map(|h| format.parse(h)).collect();

            let monotonic = parsed.windows(2).all(|pair| pair[0] <= pair[1]);
            if parsed.len() == samples.len() && monotonic {
                return Some((format, false));
            }

            if !parsed.is_empty() && best.map_or(true, |(_, count)| parsed.len() > count) {
                best = Some((format, parsed.len()));
            }
        }

        best.map(|(format, _)| (format, true))
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.layout {
            Layout::Bracketed => "[date, time]",
            Layout::Dashed => "date, time -",
        };
        let order = match self.order {
            DateOrder::DayMonthYear => "day/month/year",
            DateOrder::MonthDayYear => "month/day/year",
            DateOrder::YearMonthDay => "year-month-day",
        };
        let clock = match self.clock {
            Clock::TwentyFourHour => "24h",
            Clock::TwelveHour => "12h",
        };
        write!(f, "{} {} {}", layout, order, clock)
    }
}

/// Recognizes message-start prefixes for both layouts.
pub struct HeaderMatcher {
    bracketed: Regex,
    dashed: Regex,
}

impl HeaderMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        let bracketed = Regex::new(&format!(
            r"^\[(?P<date>{DATE}),?\s+(?P<time>{TIME})\]\s?(?P<rest>.*)$"
        ))?;
        let dashed = Regex::new(&format!(
            r"^(?P<date>{DATE}),?\s+(?P<time>{TIME})\s+[-–]\s*(?P<rest>.*)$"
        ))?;
        Ok(Self { bracketed, dashed })
    }

    /// Match a normalized line against both layouts.
    pub fn match_line(&self, line: &str) -> Option<Header> {
        for (layout, regex) in [
            (Layout::Bracketed, &self.bracketed),
            (Layout::Dashed, &self.dashed),
        ] {
            if let Some(caps) = regex.captures(line) {
                return Some(Header {
                    layout,
                    date: caps["date"].to_string(),
                    time: caps["time"].to_string(),
                    rest: caps["rest"].to_string(),
                });
            }
        }
        None
    }
}

fn parse_date(raw: &str, order: DateOrder) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split(['/', '.', '-']).collect();
    if parts.len() != 3 {
        return None;
    }
    let numbers: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (year_part, year, month, day) = match order {
        DateOrder::YearMonthDay => (parts[0], numbers[0], numbers[1], numbers[2]),
        DateOrder::DayMonthYear => (parts[2], numbers[2], numbers[1], numbers[0]),
        DateOrder::MonthDayYear => (parts[2], numbers[2], numbers[0], numbers[1]),
    };

    let year = match year_part.len() {
        4 => year,
        2 if order != DateOrder::YearMonthDay => 2000 + year,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year as i32, month, day)
}

fn parse_time(raw: &str, clock: Clock) -> Option<NaiveTime> {
    let lower = raw.trim().to_ascii_lowercase();
    let (numeric, meridiem) = match lower.find(['a', 'p']) {
        Some(idx) => {
            let suffix: String = lower[idx..]
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect();
            (lower[..idx].trim(), Some(suffix))
        }
        None => (lower.as_str(), None),
    };

    let fields: Vec<u32> = numeric
        .split([':', '.'])
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (hour, minute, second) = match fields.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };

    let hour = match (clock, meridiem.as_deref()) {
        (Clock::TwentyFourHour, None) => hour,
        (Clock::TwelveHour, Some("am")) if (1..=12).contains(&hour) => hour % 12,
        (Clock::TwelveHour, Some("pm")) if (1..=12).contains(&hour) => hour % 12 + 12,
        _ => return None,
    };

    NaiveTime::from_hms_opt(hour, minute, second)
}
