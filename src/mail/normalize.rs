use chrono::{FixedOffset, Offset, Utc};

use super::types::{MailDate, Message, RawMessage};
use crate::config::OrgConfig;

/// Turns raw header records into `Message` values. This is the single place
/// missing headers are resolved to defaults.
#[derive(Debug, Clone)]
pub struct Normalizer {
    domain: String,
    support: String,
    ideas: String,
    allowlist: Vec<String>,
    spam: Vec<String>,
    offset: FixedOffset,
}

impl Normalizer {
    pub fn new(org: &OrgConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        let offset =
            FixedOffset::east_opt(org.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            domain: org.domain.to_lowercase(),
            support: org.support_address.to_lowercase(),
            ideas: org.ideas_address.to_lowercase(),
            allowlist: lower(&org.internal_allowlist),
            spam: lower(&org.spam_senders),
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn parse_date(&self, s: &str) -> MailDate {
        MailDate::parse(s, self.offset)
    }

    pub fn normalize(&self, raw: &RawMessage) -> Message {
        let field = |name: &str| raw.get(name).unwrap_or("");

        let from_address = extract_address(field("from"));
        let to_address = field("to").to_lowercase();
        let subject = strip_breaks(field("subject"));
        let labels = split_labels(&strip_breaks(field("x-gmail-labels")));
        let timestamp = self.parse_date(field("date"));

        let is_internal = self.is_internal_address(&from_address);
        let is_from_support = from_address.contains(&self.support);

        Message {
            thread_id: field("x-gm-thrid").trim().to_string(),
            is_spam: from_address.is_empty() || self.spam.iter().any(|s| from_address.contains(s)),
            is_idea: to_address.contains(&self.ideas),
            is_to_from_support: is_from_support && to_address.contains(&self.support),
            to_internal: self.is_internal_address(&to_address),
            counts: !(is_internal || is_from_support),
            is_internal,
            is_from_support,
            from_address,
            to_address,
            subject,
            labels,
            timestamp,
        }
    }

    /// Sent by a person at the organisation, not one of its service accounts
    pub fn is_internal_address(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        address.contains(&self.domain) && !self.allowlist.iter().any(|a| address.contains(a))
    }
}

/// "Name <addr>" -> "addr"; anything else is used as-is minus stray
/// delimiters. Always lower-cased.
pub fn extract_address(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(start) = raw.find('<') {
        if let Some(len) = raw[start..].find('>') {
            return raw[start + 1..start + len].trim().to_lowercase();
        }
    }
    raw.chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect::<String>()
        .to_lowercase()
}

/// Long headers in mbox exports are wrapped across physical lines
fn strip_breaks(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Split a Gmail label header on commas, honouring double-quoted labels
fn split_labels(s: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in s.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                let label = current.trim();
                if !label.is_empty() {
                    labels.push(label.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let label = current.trim();
    if !label.is_empty() {
        labels.push(label.to_string());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(&OrgConfig::default())
    }

    fn raw(from: &str, to: &str) -> RawMessage {
        RawMessage::new()
            .with("X-GM-THRID", "1600000000000000001")
            .with("From", from)
            .with("To", to)
            .with("Subject", "Help with\r\n login")
            .with("Date", "Mon, 15 Jan 2024 10:30:45 -0500")
            .with("X-Gmail-Labels", "Inbox,Issue,\r\n \"Waiting on, member\"")
    }

    #[test]
    fn test_address_extraction() {
        assert_eq!(extract_address("Jane Doe <Jane.Doe@Uni.EDU>"), "jane.doe@uni.edu");
        assert_eq!(extract_address("JANE@UNI.EDU"), "jane@uni.edu");
        assert_eq!(extract_address("broken <jane@uni.edu"), "broken jane@uni.edu");
        for raw in ["A <b@c.d>", "<x@y.z>", "plain@host", "Weird <A@B> <C@D>"] {
            let addr = extract_address(raw);
            assert!(!addr.contains('<') && !addr.contains('>'));
            assert_eq!(addr, addr.to_lowercase());
        }
    }

    #[test]
    fn test_member_message() {
        let msg = normalizer().normalize(&raw("Jane <jane@uni.edu>", "support@irbnet.org"));
        assert_eq!(msg.thread_id, "1600000000000000001");
        assert_eq!(msg.subject, "Help with login");
        assert_eq!(msg.labels, vec!["Inbox", "Issue", "Waiting on, member"]);
        assert!(msg.timestamp.is_known());
        assert!(msg.counts);
        assert!(!msg.is_spam && !msg.is_idea && !msg.is_internal);
    }

    #[test]
    fn test_missing_headers_default_to_empty() {
        let msg = normalizer().normalize(&RawMessage::new());
        assert_eq!(msg.thread_id, "");
        assert_eq!(msg.subject, "");
        assert!(msg.labels.is_empty());
        assert_eq!(msg.timestamp, MailDate::Unknown);
        // empty sender is spam
        assert!(msg.is_spam);
    }

    #[test]
    fn test_sender_classification() {
        let n = normalizer();

        let staff = n.normalize(&raw("Pat <pat@irbnet.org>", "jane@uni.edu"));
        assert!(staff.is_internal);
        assert!(!staff.counts);

        let support = n.normalize(&raw("Support <support@irbnet.org>", "support@irbnet.org"));
        assert!(!support.is_internal);
        assert!(support.is_from_support && support.is_to_from_support);
        assert!(!support.counts);

        let bounce = n.normalize(&raw("MAILER-DAEMON@LNAPL005.HPHC.org", "support@irbnet.org"));
        assert!(bounce.is_spam);

        let idea = n.normalize(&raw("jane@uni.edu", "Ideas <ideas@irbnet.org>"));
        assert!(idea.is_idea && idea.is_ignored());

        let to_staff = n.normalize(&raw("support@irbnet.org", "pat@irbnet.org"));
        assert!(to_staff.to_internal);
    }
}
