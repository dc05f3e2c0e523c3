//! Per-thread classification state.
//!
//! A `Thread` is created from the first qualifying message of a thread id and
//! folded forward one message at a time. Update order matters: the same
//! messages in a different order can classify differently.

use super::labels::LabelClassifier;
use super::types::{MailDate, Message};
use crate::config::OrgConfig;
use crate::confirm::{ConfirmReason, ConfirmRequest, Confirmer};
use crate::error::Result;

/// Subject markers and labels the state machine reacts to
#[derive(Debug, Clone)]
pub struct ThreadRules {
    pub classifier: LabelClassifier,
    pub demo_subject: String,
    pub inquiry_subject: String,
    pub voicemail_subject: String,
    pub auto_reply_address: String,
    pub sales_ping_label: String,
    pub new_org_label: String,
    pub check_in_label: String,
    pub open_markers: Vec<String>,
}

impl ThreadRules {
    pub fn new(org: &OrgConfig, classifier: LabelClassifier) -> Self {
        Self {
            classifier,
            demo_subject: org.demo_subject.clone(),
            inquiry_subject: org.inquiry_subject.clone(),
            voicemail_subject: org.voicemail_subject.clone(),
            auto_reply_address: org.auto_reply_address.to_lowercase(),
            sales_ping_label: org.sales_ping_label.clone(),
            new_org_label: org.new_org_label.clone(),
            check_in_label: org.check_in_label.clone(),
            open_markers: org.open_markers.clone(),
        }
    }

    fn opens(&self, message: &Message) -> bool {
        message
            .labels
            .iter()
            .any(|label| self.open_markers.iter().any(|m| label.contains(m.as_str())))
    }

    fn is_web_form(&self, message: &Message) -> bool {
        message.has_label(&self.sales_ping_label)
            && (message.subject.contains(&self.demo_subject)
                || message.subject.contains(&self.inquiry_subject))
    }
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    /// Subject of the first counted message
    pub subject: String,
    /// Recognised statistic labels in first-seen order
    pub stat_labels: Vec<String>,
    pub member_labels: Vec<String>,
    pub good: bool,
    /// Starts true; once false it stays false
    pub closed: bool,
    pub oldest_date: MailDate,
    pub last_contact_date: MailDate,
    pub check_in_date: MailDate,
    pub message_count: u32,
    pub demo: bool,
    pub inquiry: bool,
    pub vm: bool,
    pub new_org: bool,
    pub sales_ping: bool,
    /// A sales ping that arrived through the website forms
    pub web_form: bool,
    /// The operator (or an override mode) has already decided this thread
    pub checked: bool,
}

impl Thread {
    pub fn create(
        message: &Message,
        rules: &ThreadRules,
        confirmer: &mut Confirmer,
    ) -> Result<Self> {
        let labels = rules.classifier.classify(&message.labels);
        let (subject, dated) = if message.counts {
            (message.subject.clone(), message.timestamp)
        } else {
            (String::new(), MailDate::Unknown)
        };

        let mut thread = Self {
            id: message.thread_id.clone(),
            subject,
            stat_labels: labels.stats,
            member_labels: labels.members,
            good: true,
            closed: true,
            oldest_date: dated,
            last_contact_date: dated,
            check_in_date: MailDate::Unknown,
            message_count: 1,
            demo: false,
            inquiry: false,
            vm: false,
            new_org: false,
            sales_ping: false,
            web_form: false,
            checked: false,
        };

        thread.note_check_in(message, rules);
        thread.evaluate(message, rules, confirmer)?;
        thread.note_open(message, rules);
        Ok(thread)
    }

    pub fn add_message(
        &mut self,
        message: &Message,
        rules: &ThreadRules,
        confirmer: &mut Confirmer,
    ) -> Result<()> {
        self.message_count += 1;

        // A later member reply outweighs a single support-only message
        if !self.good && message.counts {
            self.good = true;
        }

        let labels = rules.classifier.classify(&message.labels);
        for label in labels.stats {
            if !self.stat_labels.contains(&label) {
                self.stat_labels.push(label);
            }
        }
        for label in labels.members {
            if !self.member_labels.contains(&label) {
                self.member_labels.push(label);
            }
        }

        if message.counts {
            self.oldest_date.retreat(message.timestamp);
            self.last_contact_date.advance(message.timestamp);
            if self.subject.is_empty() {
                self.subject = message.subject.clone();
            }
        }
        self.note_check_in(message, rules);

        self.evaluate(message, rules, confirmer)?;
        self.note_open(message, rules);
        Ok(())
    }

    /// Exclude the thread regardless of how its messages classified
    pub fn dont_count(&mut self) {
        self.good = false;
    }

    pub fn non_ping(&self) -> bool {
        !self.stat_labels.is_empty()
    }

    pub fn is_check_in(&self) -> bool {
        self.check_in_date.is_known()
    }

    /// Short description used in diagnostics
    pub fn kind(&self) -> String {
        if self.non_ping() {
            format!("Non Ping: {}", self.stat_labels.join(", "))
        } else if self.inquiry {
            "Inquiry".to_string()
        } else if self.demo {
            "Demo".to_string()
        } else if self.vm {
            "Voicemail".to_string()
        } else if self.new_org {
            "New Organization".to_string()
        } else if self.sales_ping {
            "Sales Ping".to_string()
        } else if self.is_check_in() {
            "Check In".to_string()
        } else {
            "Unknown".to_string()
        }
    }

    fn note_check_in(&mut self, message: &Message, rules: &ThreadRules) {
        if message.has_label(&rules.check_in_label) {
            self.check_in_date.advance(message.timestamp);
        }
    }

    fn note_open(&mut self, message: &Message, rules: &ThreadRules) {
        if self.closed && rules.opens(message) {
            self.closed = false;
        }
    }

    fn evaluate(
        &mut self,
        message: &Message,
        rules: &ThreadRules,
        confirmer: &mut Confirmer,
    ) -> Result<()> {
        let subject = &message.subject;

        if rules.is_web_form(message) {
            self.web_form = true;
        }

        if !self.non_ping() {
            // The second message confirms real interest rather than a bounce
            if self.message_count == 2 {
                if subject.contains(&rules.demo_subject) {
                    self.demo = true;
                    self.good = true;
                } else if subject.contains(&rules.inquiry_subject) {
                    self.inquiry = true;
                    self.good = true;
                }
                if message.has_label(&rules.new_org_label) {
                    self.new_org = true;
                    self.good = true;
                }
            } else if message.has_label(&rules.sales_ping_label) {
                self.sales_ping = true;
                self.good = true;
                self.checked = true;
            }

            if subject.contains(&rules.voicemail_subject) {
                // Only the auto-routed message is one voicemail; human replies are not
                if message.from_address != rules.auto_reply_address {
                    self.message_count = self.message_count.saturating_sub(1);
                }
                self.vm = true;
                self.good = true;
            }
        } else if !self.checked {
            let new_org = self.new_org || self.stat_labels.contains(&rules.new_org_label);
            let sales_ping = self.sales_ping || self.stat_labels.contains(&rules.sales_ping_label);

            if message.is_to_from_support && !new_org {
                self.should_it_count(message, ConfirmReason::ToAndFromSupport, confirmer)?;
            } else if message.is_internal
                || (message.is_from_support && message.to_internal && !sales_ping)
            {
                self.should_it_count(message, ConfirmReason::Internal, confirmer)?;
            }
        }
        Ok(())
    }

    fn should_it_count(
        &mut self,
        message: &Message,
        reason: ConfirmReason,
        confirmer: &mut Confirmer,
    ) -> Result<()> {
        let request = ConfirmRequest { reason, message };
        self.good = confirmer.resolve(&request)?;
        self.checked = true;
        tracing::debug!(
            thread = %self.id,
            %reason,
            good = self.good,
            "thread confirmation resolved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::CountMode;
    use crate::confirm::testing::ScriptedPort;
    use crate::mail::{Normalizer, RawMessage};

    fn rules() -> ThreadRules {
        let classifier = LabelClassifier::new(
            ["Issue", "Reports", "Sales", "Sales Pings", "New Organizations"],
            ["UVA"],
        );
        ThreadRules::new(&OrgConfig::default(), classifier)
    }

    fn msg(from: &str, to: &str, subject: &str, date: &str, labels: &str) -> Message {
        Normalizer::new(&OrgConfig::default()).normalize(
            &RawMessage::new()
                .with("X-GM-THRID", "42")
                .with("From", from)
                .with("To", to)
                .with("Subject", subject)
                .with("Date", date)
                .with("X-Gmail-Labels", labels),
        )
    }

    fn member(subject: &str, date: &str, labels: &str) -> Message {
        msg("Jane <jane@uni.edu>", "support@irbnet.org", subject, date, labels)
    }

    fn fold(messages: &[Message], confirmer: &mut Confirmer) -> Thread {
        let rules = rules();
        let mut thread = Thread::create(&messages[0], &rules, confirmer).unwrap();
        for m in &messages[1..] {
            thread.add_message(m, &rules, confirmer).unwrap();
        }
        thread
    }

    #[test]
    fn test_voicemail_reply_does_not_inflate_count() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let thread = fold(
            &[
                msg(
                    "IRBNet <noreply@irbnet.org>",
                    "support@irbnet.org",
                    "IRBNet Help Desk Inquiry",
                    "01/15/2024",
                    "Inbox",
                ),
                member("RE: IRBNet Help Desk Inquiry", "01/16/2024", "Inbox"),
            ],
            &mut confirmer,
        );
        assert!(thread.vm);
        assert!(thread.good);
        assert_eq!(thread.message_count, 1);
    }

    #[test]
    fn test_demo_request_needs_second_message() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let first = msg(
            "noreply@irbnet.org",
            "support@irbnet.org",
            "IRBNet Demo Request",
            "01/15/2024",
            "Inbox",
        );
        let rules = rules();
        let mut thread = Thread::create(&first, &rules, &mut confirmer).unwrap();
        assert!(!thread.demo);
        thread
            .add_message(
                &member("RE: IRBNet Demo Request", "01/16/2024", ""),
                &rules,
                &mut confirmer,
            )
            .unwrap();
        assert!(thread.demo && !thread.inquiry);
        assert_eq!(thread.kind(), "Demo");
    }

    #[test]
    fn test_non_ping_tracks_stat_labels() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let rules = rules();
        let mut thread =
            Thread::create(&member("Question", "01/15/2024", "Inbox"), &rules, &mut confirmer)
                .unwrap();
        assert_eq!(thread.non_ping(), !thread.stat_labels.is_empty());
        for labels in ["Opened", "Reports,UVA", "Issue", "Inbox"] {
            thread
                .add_message(&member("Question", "01/16/2024", labels), &rules, &mut confirmer)
                .unwrap();
            assert_eq!(thread.non_ping(), !thread.stat_labels.is_empty());
        }
        assert_eq!(thread.stat_labels, vec!["Reports", "Issue"]);
        assert_eq!(thread.member_labels, vec!["UVA"]);
    }

    #[test]
    fn test_closed_never_reopens() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let rules = rules();
        let mut thread =
            Thread::create(&member("Q", "01/15/2024", "Issue"), &rules, &mut confirmer).unwrap();
        assert!(thread.closed);
        thread
            .add_message(&member("Q", "01/16/2024", "Waiting on Member"), &rules, &mut confirmer)
            .unwrap();
        assert!(!thread.closed);
        for labels in ["Issue", "", "Inbox,Done"] {
            thread
                .add_message(&member("Q", "01/17/2024", labels), &rules, &mut confirmer)
                .unwrap();
            assert!(!thread.closed);
        }
    }

    #[test]
    fn test_count_all_resolves_without_prompt() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::CountAll);
        let thread = fold(
            &[
                member("Login", "01/15/2024", "Issue"),
                msg(
                    "support@irbnet.org",
                    "support@irbnet.org",
                    "Fwd: Login",
                    "01/16/2024",
                    "Issue",
                ),
            ],
            &mut confirmer,
        );
        assert!(thread.non_ping());
        assert!(thread.good);
        assert!(thread.checked);
        assert!(port.asked.borrow().is_empty());
    }

    #[test]
    fn test_internal_message_prompts_once() {
        let port = ScriptedPort::answering(&[false]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let rules = rules();
        let mut thread = Thread::create(
            &msg("Pat <pat@irbnet.org>", "support@irbnet.org", "Test", "01/15/2024", "Issue"),
            &rules,
            &mut confirmer,
        )
        .unwrap();
        assert!(!thread.good && thread.checked);

        thread
            .add_message(
                &msg("pat@irbnet.org", "support@irbnet.org", "Test", "01/16/2024", "Issue"),
                &rules,
                &mut confirmer,
            )
            .unwrap();
        assert_eq!(port.asked.borrow().len(), 1);
        assert!(!thread.good);

        // a member reply resurrects the thread
        thread
            .add_message(&member("RE: Test", "01/17/2024", "Issue"), &rules, &mut confirmer)
            .unwrap();
        assert!(thread.good);
    }

    #[test]
    fn test_sales_ping_skips_confirmation() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let classifier = LabelClassifier::new(["Issue"], ["UVA"]);
        let rules = ThreadRules::new(&OrgConfig::default(), classifier);
        let thread = Thread::create(
            &msg(
                "noreply@irbnet.org",
                "support@irbnet.org",
                "IRBNet Inquiry From Jane",
                "01/15/2024",
                "Sales Pings",
            ),
            &rules,
            &mut confirmer,
        )
        .unwrap();
        assert!(thread.sales_ping && thread.checked && thread.good);
        assert!(thread.web_form);
    }

    #[test]
    fn test_sales_label_on_second_message_is_not_a_ping() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let classifier = LabelClassifier::new(["Issue"], ["UVA"]);
        let rules = ThreadRules::new(&OrgConfig::default(), classifier);
        let mut thread =
            Thread::create(&member("Pricing", "01/15/2024", ""), &rules, &mut confirmer).unwrap();
        thread
            .add_message(
                &member("RE: Pricing", "01/16/2024", "Sales Pings"),
                &rules,
                &mut confirmer,
            )
            .unwrap();
        assert!(!thread.non_ping());
        assert_eq!(thread.message_count, 2);
        assert!(!thread.sales_ping);
        assert!(!thread.checked);

        // a third message with the label is a sales ping again
        thread
            .add_message(
                &member("RE: Pricing", "01/17/2024", "Sales Pings"),
                &rules,
                &mut confirmer,
            )
            .unwrap();
        assert!(thread.sales_ping && thread.checked);
    }

    #[test]
    fn test_dates_only_follow_counted_messages() {
        let port = ScriptedPort::answering(&[true]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let thread = fold(
            &[
                member("Q", "01/15/2024", "Issue"),
                msg("support@irbnet.org", "jane@uni.edu", "RE: Q", "01/20/2024", ""),
                member("RE: Q", "01/10/2024", "check-in call"),
                member("RE: Q", "garbage", ""),
            ],
            &mut confirmer,
        );
        let off = Normalizer::new(&OrgConfig::default()).offset();
        assert_eq!(thread.oldest_date, MailDate::parse("01/10/2024", off));
        assert_eq!(thread.last_contact_date, MailDate::parse("01/15/2024", off));
        assert_eq!(thread.check_in_date, MailDate::parse("01/10/2024", off));
        assert_eq!(thread.message_count, 4);
    }

    #[test]
    fn test_dont_count() {
        let port = ScriptedPort::answering(&[]);
        let mut confirmer = port.confirmer(CountMode::Interactive);
        let mut thread = fold(&[member("Q", "01/15/2024", "Issue")], &mut confirmer);
        thread.dont_count();
        assert!(!thread.good);
    }
}
