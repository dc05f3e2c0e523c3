use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One raw mail record as produced by a mail source: header name -> value.
/// Header names are stored lower-cased.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMessage {
    pub headers: BTreeMap<String, String>,
}

impl RawMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// A message timestamp. `Unknown` never wins a most-recent or oldest
/// comparison against a known date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailDate {
    #[default]
    Unknown,
    Known(DateTime<FixedOffset>),
}

impl MailDate {
    /// Parse a mail or sheet date. Strings without a timezone are pinned to
    /// `offset`. Unparseable input yields `Unknown`.
    pub fn parse(s: &str, offset: FixedOffset) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return MailDate::Unknown;
        }

        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return MailDate::Known(dt);
        }
        // Trailing zone comments like "(PST)" trip the RFC 2822 parser
        if let Some(idx) = s.rfind(" (") {
            if let Ok(dt) = DateTime::parse_from_rfc2822(&s[..idx]) {
                return MailDate::Known(dt);
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return MailDate::Known(dt);
        }

        const DATETIME_FORMATS: &[&str] = &[
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
            "%Y-%m-%dT%H:%M:%S",
            "%m/%d/%Y %H:%M:%S",
            "%m/%d/%Y %H:%M",
            "%a, %d %b %Y %H:%M:%S",
            "%d %b %Y %H:%M:%S",
        ];
        for fmt in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Self::pinned(naive, offset);
            }
        }

        const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"];
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
                if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                    return Self::pinned(naive, offset);
                }
            }
        }

        tracing::debug!(date = s, "unparseable date, treating as unknown");
        MailDate::Unknown
    }

    fn pinned(naive: NaiveDateTime, offset: FixedOffset) -> Self {
        match offset.from_local_datetime(&naive).single() {
            Some(dt) => MailDate::Known(dt),
            None => MailDate::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MailDate::Known(_))
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            MailDate::Known(dt) => Some(*dt),
            MailDate::Unknown => None,
        }
    }

    /// `self` is strictly newer than `other`. A known date beats an unknown one;
    /// an unknown date never beats anything.
    pub fn is_more_recent_than(&self, other: &MailDate) -> bool {
        match (self, other) {
            (MailDate::Known(a), MailDate::Known(b)) => a > b,
            (MailDate::Known(_), MailDate::Unknown) => true,
            (MailDate::Unknown, _) => false,
        }
    }

    /// `self` is strictly older than `other`, with the same unknown rules.
    pub fn is_older_than(&self, other: &MailDate) -> bool {
        match (self, other) {
            (MailDate::Known(a), MailDate::Known(b)) => a < b,
            (MailDate::Known(_), MailDate::Unknown) => true,
            (MailDate::Unknown, _) => false,
        }
    }

    /// Strictly before a known cutoff. Unknown dates are never before anything.
    pub fn is_before(&self, cutoff: &DateTime<FixedOffset>) -> bool {
        match self {
            MailDate::Known(dt) => dt.cmp(cutoff) == Ordering::Less,
            MailDate::Unknown => false,
        }
    }

    /// Keep the more recent of the two
    pub fn advance(&mut self, candidate: MailDate) {
        if candidate.is_more_recent_than(self) {
            *self = candidate;
        }
    }

    /// Keep the older of the two
    pub fn retreat(&mut self, candidate: MailDate) {
        if candidate.is_older_than(self) {
            *self = candidate;
        }
    }
}

impl std::fmt::Display for MailDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailDate::Known(dt) => write!(f, "{}", dt.format("%m/%d/%Y %H:%M")),
            MailDate::Unknown => write!(f, "(unknown)"),
        }
    }
}

/// A normalized mail message. Built once by the normalizer, never mutated.
#[derive(Debug, Clone)]
pub struct Message {
    /// Empty when the source carried no thread id
    pub thread_id: String,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub labels: Vec<String>,
    pub timestamp: MailDate,
    pub is_spam: bool,
    pub is_idea: bool,
    pub is_internal: bool,
    pub is_from_support: bool,
    pub is_to_from_support: bool,
    /// Recipient is an internal (non-service) organisation address
    pub to_internal: bool,
    /// False for internal and support traffic, which does not establish member contact
    pub counts: bool,
}

impl Message {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Spam and ideas-box traffic never enters a thread
    pub fn is_ignored(&self) -> bool {
        self.is_spam || self.is_idea
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eastern() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn test_parse_formats() {
        let off = eastern();
        assert!(MailDate::parse("Mon, 15 Jan 2024 10:30:45 -0800", off).is_known());
        assert!(MailDate::parse("Mon, 15 Jan 2024 10:30:45 -0800 (PST)", off).is_known());
        assert!(MailDate::parse("2024-01-15T10:30:45+00:00", off).is_known());
        assert!(MailDate::parse("01/15/2024", off).is_known());
        assert_eq!(MailDate::parse("not a date", off), MailDate::Unknown);
        assert_eq!(MailDate::parse("", off), MailDate::Unknown);
    }

    #[test]
    fn test_naive_dates_use_reference_offset() {
        let date = MailDate::parse("01/15/2024", eastern());
        let dt = date.as_datetime().unwrap();
        assert_eq!(dt.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_unknown_never_wins() {
        let off = eastern();
        let known = MailDate::parse("01/15/2024", off);
        let unknown = MailDate::Unknown;
        assert!(!unknown.is_more_recent_than(&known));
        assert!(!unknown.is_older_than(&known));
        assert!(known.is_more_recent_than(&unknown));
        assert!(known.is_older_than(&unknown));

        let mut slot = known;
        slot.advance(unknown);
        assert_eq!(slot, known);
        slot.retreat(unknown);
        assert_eq!(slot, known);
    }

    #[test]
    fn test_advance_and_retreat() {
        let off = eastern();
        let early = MailDate::parse("01/10/2024", off);
        let late = MailDate::parse("01/20/2024", off);
        let mut newest = early;
        newest.advance(late);
        assert_eq!(newest, late);
        let mut oldest = late;
        oldest.retreat(early);
        assert_eq!(oldest, early);
    }
}
