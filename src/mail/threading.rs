use std::collections::HashMap;

use super::thread::{Thread, ThreadRules};
use super::types::Message;
use crate::confirm::Confirmer;
use crate::error::Result;

/// What happened to a message offered to the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folded {
    Ignored,
    Created,
    Appended,
}

/// All threads of a run, keyed by thread id, in first-seen order.
/// Messages with an empty thread id share the "" thread; they are never
/// merged into any other thread.
#[derive(Debug, Default)]
pub struct ThreadBook {
    threads: Vec<Thread>,
    index: HashMap<String, usize>,
}

impl ThreadBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(
        &mut self,
        message: &Message,
        rules: &ThreadRules,
        confirmer: &mut Confirmer,
    ) -> Result<Folded> {
        if message.is_ignored() {
            return Ok(Folded::Ignored);
        }

        match self.index.get(&message.thread_id) {
            Some(&idx) => {
                self.threads[idx].add_message(message, rules, confirmer)?;
                Ok(Folded::Appended)
            }
            None => {
                let thread = Thread::create(message, rules, confirmer)?;
                self.index.insert(message.thread_id.clone(), self.threads.len());
                self.threads.push(thread);
                Ok(Folded::Created)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Thread> {
        self.index.get(id).map(|&i| &self.threads[i])
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn threads_mut(&mut self) -> &mut [Thread] {
        &mut self.threads
    }

    pub fn into_threads(self) -> Vec<Thread> {
        self.threads
    }

    /// Threads sorted by last member contact, most recent first.
    /// Threads with no known contact date go last, in first-seen order.
    pub fn by_recent_contact(&self) -> Vec<&Thread> {
        let mut sorted: Vec<&Thread> = self.threads.iter().collect();
        sorted.sort_by(|a, b| {
            let (da, db) = (a.last_contact_date.as_datetime(), b.last_contact_date.as_datetime());
            match (da, db) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrgConfig;
    use crate::confirm::CountMode;
    use crate::confirm::testing::ScriptedPort;
    use crate::mail::{LabelClassifier, Normalizer, RawMessage};

    fn message(thread: &str, from: &str, date: &str) -> Message {
        Normalizer::new(&OrgConfig::default()).normalize(
            &RawMessage::new()
                .with("X-GM-THRID", thread)
                .with("From", from)
                .with("To", "support@irbnet.org")
                .with("Subject", "Question")
                .with("Date", date),
        )
    }

    #[test]
    fn test_grouping_and_ignored_messages() {
        let rules = ThreadRules::new(&OrgConfig::default(), LabelClassifier::default());
        let mut confirmer = ScriptedPort::answering(&[]).confirmer(CountMode::Interactive);
        let mut book = ThreadBook::new();

        let seq = [
            (message("1", "jane@uni.edu", "01/10/2024"), Folded::Created),
            (message("2", "sam@uni.edu", "01/12/2024"), Folded::Created),
            (message("1", "jane@uni.edu", "01/11/2024"), Folded::Appended),
            (message("1", "", "01/11/2024"), Folded::Ignored),
            (message("", "kim@uni.edu", "01/09/2024"), Folded::Created),
            (message("", "lee@uni.edu", "01/09/2024"), Folded::Appended),
        ];
        for (m, expected) in &seq {
            assert_eq!(book.fold(m, &rules, &mut confirmer).unwrap(), *expected);
        }

        assert_eq!(book.len(), 3);
        assert_eq!(book.get("1").unwrap().message_count, 2);
        assert_eq!(book.get("").unwrap().message_count, 2);

        let recent: Vec<&str> = book.by_recent_contact().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(recent, vec!["2", "1", ""]);
    }
}
