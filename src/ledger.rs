//! Open inquiries carried between reporting periods.
//!
//! On disk the ledger is plain text, four lines per record:
//!
//! ```text
//! <thread id>
//! <subject>
//! Open | Closed
//! Y | N
//! ```
//!
//! Thread ids are wide integers that spreadsheet programs mangle, which is
//! why this is not CSV.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StatsError};
use crate::mail::Thread;

/// A non-ping thread that is open and countable. Identity is the id alone.
#[derive(Debug, Clone, Eq)]
pub struct OpenInquiry {
    pub id: String,
    pub subject: String,
}

impl OpenInquiry {
    pub fn new(id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
        }
    }
}

impl PartialEq for OpenInquiry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for OpenInquiry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub inquiry: OpenInquiry,
    pub open: bool,
    pub countable: bool,
}

impl LedgerEntry {
    fn tracked(inquiry: OpenInquiry) -> Self {
        Self {
            inquiry,
            open: true,
            countable: true,
        }
    }

    fn counts(&self) -> bool {
        self.open && self.countable
    }
}

/// Outcome of comparing the ledger against the current inbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Previously tracked inquiries still sitting in the inbox
    pub still_open: usize,
    /// Previously tracked inquiries that left the inbox since the last run
    pub existing_closed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a ledger file. Missing files surface as `Io`, bad content as
    /// `LedgerMalformed`; callers rebuild from the inbox in both cases.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        if lines.len() % 4 != 0 {
            return Err(StatsError::LedgerMalformed {
                line: lines.len(),
                message: "file ends in the middle of a record".to_string(),
            });
        }

        let mut ledger = Ledger::new();
        for (n, record) in lines.chunks(4).enumerate() {
            let line = n * 4 + 1;
            let id = record[0].trim();
            if id.is_empty() {
                return Err(StatsError::LedgerMalformed {
                    line,
                    message: "empty thread id".to_string(),
                });
            }
            let open = match record[2].trim().to_lowercase().as_str() {
                "open" => true,
                "closed" => false,
                other => {
                    return Err(StatsError::LedgerMalformed {
                        line: line + 2,
                        message: format!("expected Open or Closed, found '{other}'"),
                    });
                }
            };
            let countable = match record[3].trim() {
                "Y" | "y" => true,
                "N" | "n" => false,
                other => {
                    return Err(StatsError::LedgerMalformed {
                        line: line + 3,
                        message: format!("expected Y or N, found '{other}'"),
                    });
                }
            };
            ledger.upsert(LedgerEntry {
                inquiry: OpenInquiry::new(id, record[1].trim()),
                open,
                countable,
            });
        }
        Ok(ledger)
    }

    /// Derive the open set from threads folded out of an inbox snapshot
    pub fn from_threads<'a>(threads: impl IntoIterator<Item = &'a Thread>) -> Self {
        let mut ledger = Ledger::new();
        for thread in threads {
            if thread.good && thread.non_ping() && !thread.closed {
                ledger.track(OpenInquiry::new(thread.id.clone(), thread.subject.clone()));
            }
        }
        ledger
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.inquiry.id == id)
    }

    /// Open inquiries currently tracked
    pub fn open_inquiries(&self) -> HashSet<&OpenInquiry> {
        self.entries
            .iter()
            .filter(|e| e.counts())
            .map(|e| &e.inquiry)
            .collect()
    }

    pub fn track(&mut self, inquiry: OpenInquiry) {
        self.upsert(LedgerEntry::tracked(inquiry));
    }

    fn upsert(&mut self, entry: LedgerEntry) {
        match self.entries.iter_mut().find(|e| e.inquiry == entry.inquiry) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Count tracked inquiries still in the inbox, drop the ones that left,
    /// then start tracking this run's new open inquiries. Recomputed from the
    /// inbox every time, so re-running after a failure does not double count.
    /// Tracked entries that are also new this run are counted as new only.
    pub fn reconcile(
        &mut self,
        new_open: impl IntoIterator<Item = OpenInquiry>,
        inbox_ids: &HashSet<String>,
    ) -> Reconciliation {
        let new_open: Vec<OpenInquiry> = new_open.into_iter().collect();
        let new_ids: HashSet<&str> = new_open.iter().map(|i| i.id.as_str()).collect();
        let mut result = Reconciliation::default();

        self.entries.retain(|entry| {
            let in_inbox = inbox_ids.contains(&entry.inquiry.id);
            if new_ids.contains(entry.inquiry.id.as_str()) {
                return true;
            }
            if entry.counts() {
                if in_inbox {
                    result.still_open += 1;
                } else {
                    result.existing_closed += 1;
                }
            }
            in_inbox
        });

        for inquiry in new_open {
            self.track(inquiry);
        }
        result
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let subject: String = entry
                .inquiry
                .subject
                .chars()
                .filter(|c| *c != '\n' && *c != '\r')
                .collect();
            out.push_str(&entry.inquiry.id);
            out.push('\n');
            out.push_str(&subject);
            out.push('\n');
            out.push_str(if entry.open { "Open" } else { "Closed" });
            out.push('\n');
            out.push_str(if entry.countable { "Y" } else { "N" });
            out.push('\n');
        }
        out
    }

    /// Write atomically so a crash never leaves a half-written ledger
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| StatsError::Io(e.error))?;
        Ok(())
    }
}
