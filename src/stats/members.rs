//! Member and administrator records read from the sheet, updated from the
//! run's threads and written back.

use std::collections::{BTreeMap, HashMap};

use chrono::FixedOffset;

use super::registry::StatRegistry;
use crate::config::SheetsConfig;
use crate::error::{Result, StatsError};
use crate::mail::{MailDate, Message, Thread};
use crate::sheet::{CellValue, SheetStore};

/// Columns before the per-stat counts on the member sheet
const MEMBER_FIXED_COLUMNS: usize = 3;
/// Admin sheet columns: org, name, .., .., last contact, check-in, emails 6..9
const ADMIN_LAST_CONTACT: usize = 4;
const ADMIN_CHECK_IN: usize = 5;
const ADMIN_EMAILS: usize = 6;
const ADMIN_COLUMNS: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Short name, also the mail label for the member
    pub name: String,
    pub last_contact: MailDate,
    pub check_in: MailDate,
    /// Indexed by the stat's sheet column
    pub stats: Vec<i64>,
}

impl Member {
    pub fn new(name: impl Into<String>, stat_count: usize) -> Self {
        Self {
            name: name.into(),
            last_contact: MailDate::Unknown,
            check_in: MailDate::Unknown,
            stats: vec![0; stat_count],
        }
    }

    /// Returns false when the member has no such column
    pub fn increment_stat(&mut self, column: usize) -> bool {
        match self.stats.get_mut(column) {
            Some(n) => {
                *n += 1;
                true
            }
            None => false,
        }
    }

    pub fn to_row(&self) -> Vec<CellValue> {
        let mut row = vec![
            CellValue::text(self.name.clone()),
            CellValue::date(&self.last_contact),
            CellValue::date(&self.check_in),
        ];
        row.extend(self.stats.iter().map(|n| CellValue::Number(*n as f64)));
        row
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Admin {
    pub org: String,
    pub name: String,
    pub last_contact: MailDate,
    pub check_in: MailDate,
    /// Lower-cased
    pub emails: Vec<String>,
    /// The sheet row as read; only the date columns change on write-back
    row: Vec<CellValue>,
}

impl Admin {
    pub fn to_row(&self) -> Vec<CellValue> {
        let mut row = self.row.clone();
        row[ADMIN_LAST_CONTACT] = CellValue::date(&self.last_contact);
        row[ADMIN_CHECK_IN] = CellValue::date(&self.check_in);
        row
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: BTreeMap<String, Member>,
    admins: Vec<Admin>,
    by_email: HashMap<String, usize>,
}

impl Roster {
    /// Read members, admins and the stat header. The header seeds the
    /// returned registry in column order.
    pub fn load(
        store: &dyn SheetStore,
        sheets: &SheetsConfig,
        offset: FixedOffset,
    ) -> Result<(Self, StatRegistry)> {
        let (members, registry) = read_members(store, sheets, offset)?;
        let admins = read_admins(store, &sheets.admin_sheet, offset)?;

        let mut roster = Roster {
            members,
            ..Default::default()
        };
        for admin in admins {
            roster.add_admin(admin);
        }
        tracing::info!(
            members = roster.members.len(),
            admins = roster.admins.len(),
            stats = registry.len(),
            "loaded roster"
        );
        Ok((roster, registry))
    }

    pub fn add_member(&mut self, member: Member) {
        self.members.insert(member.name.clone(), member);
    }

    fn add_admin(&mut self, admin: Admin) {
        let idx = self.admins.len();
        for email in &admin.emails {
            if !email.is_empty() {
                self.by_email.entry(email.clone()).or_insert(idx);
            }
        }
        self.admins.push(admin);
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|s| s.as_str())
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut Member> {
        self.members.get_mut(name)
    }

    pub fn admins(&self) -> &[Admin] {
        &self.admins
    }

    pub fn admin_for(&self, email: &str) -> Option<&Admin> {
        self.by_email.get(email).map(|&i| &self.admins[i])
    }

    /// Carry a thread's contact dates to the members it is labelled with
    pub fn note_thread(&mut self, thread: &Thread) {
        for name in &thread.member_labels {
            if let Some(member) = self.members.get_mut(name) {
                member.last_contact.advance(thread.last_contact_date);
                member.check_in.advance(thread.check_in_date);
            }
        }
    }

    /// Update the admin who sent `message`, if any
    pub fn note_message(&mut self, message: &Message, check_in_label: &str) {
        if !message.counts {
            return;
        }
        if let Some(&idx) = self.by_email.get(&message.from_address) {
            let admin = &mut self.admins[idx];
            admin.last_contact.advance(message.timestamp);
            if message.has_label(check_in_label) {
                admin.check_in.advance(message.timestamp);
            }
        }
    }

    /// Member rows in name order
    pub fn member_rows(&self) -> Vec<Vec<CellValue>> {
        self.members.values().map(Member::to_row).collect()
    }

    pub fn admin_rows(&self) -> Vec<Vec<CellValue>> {
        self.admins.iter().map(Admin::to_row).collect()
    }
}

fn read_members(
    store: &dyn SheetStore,
    sheets: &SheetsConfig,
    offset: FixedOffset,
) -> Result<(BTreeMap<String, Member>, StatRegistry)> {
    let range = &sheets.member_sheet;
    let rows = store.read_range(range)?;
    let Some((header, records)) = rows.split_first() else {
        return Err(StatsError::IncompleteRecord {
            range: range.clone(),
            row: 0,
            detail: "sheet has no header row".to_string(),
        });
    };

    let labels: Vec<String> = header
        .iter()
        .skip(MEMBER_FIXED_COLUMNS)
        .map(CellValue::as_text)
        .collect();
    let registry = StatRegistry::from_header(labels.iter().cloned());

    let mut members = BTreeMap::new();
    for (i, row) in records.iter().enumerate() {
        let row_number = i + 1;
        if row.len() < MEMBER_FIXED_COLUMNS {
            let detail = "expected name, last contact and check-in";
            return Err(incomplete(range, row_number, row, detail));
        }
        let name = row[0].as_text();
        if name.trim().is_empty() {
            return Err(incomplete(range, row_number, row, "missing member name"));
        }

        let mut stats = Vec::with_capacity(row.len() - MEMBER_FIXED_COLUMNS);
        for cell in &row[MEMBER_FIXED_COLUMNS..] {
            match cell.as_count() {
                Some(n) => stats.push(n),
                None => {
                    let detail = format!("'{}' is not a count", cell.as_text());
                    return Err(incomplete(range, row_number, row, &detail));
                }
            }
        }

        members.insert(
            name.clone(),
            Member {
                name,
                last_contact: row[1].as_date(offset),
                check_in: row[2].as_date(offset),
                stats,
            },
        );
    }

    // Members on the short-name list but not yet on the stats sheet
    let short_names = store.read_range(&sheets.short_name_range)?;
    for row in short_names {
        let Some(name) = row.first().map(CellValue::as_text) else {
            continue;
        };
        if name.trim().is_empty() || members.contains_key(&name) {
            continue;
        }
        tracing::debug!(member = %name, "member missing from stats sheet, starting at zero");
        members.insert(name.clone(), Member::new(name, labels.len()));
    }

    Ok((members, registry))
}

fn read_admins(store: &dyn SheetStore, range: &str, offset: FixedOffset) -> Result<Vec<Admin>> {
    let rows = store.read_range(range)?;
    let mut admins = Vec::new();
    for (i, row) in rows.iter().enumerate().skip(1) {
        if row.len() <= ADMIN_CHECK_IN {
            return Err(incomplete(
                range,
                i,
                row,
                "columns missing before check-in (usually a blank phone number)",
            ));
        }
        let emails = row
            .iter()
            .take(ADMIN_COLUMNS)
            .skip(ADMIN_EMAILS)
            .map(|c| c.as_text().trim().to_lowercase())
            .collect();
        let mut padded = row.clone();
        if padded.len() < ADMIN_COLUMNS {
            padded.resize_with(ADMIN_COLUMNS, CellValue::blank);
        }
        admins.push(Admin {
            org: row[0].as_text(),
            name: row[1].as_text(),
            last_contact: row[ADMIN_LAST_CONTACT].as_date(offset),
            check_in: row[ADMIN_CHECK_IN].as_date(offset),
            emails,
            row: padded,
        });
    }
    Ok(admins)
}

fn incomplete(range: &str, row: usize, cells: &[CellValue], detail: &str) -> StatsError {
    let shown: Vec<String> = cells.iter().map(CellValue::as_text).collect();
    StatsError::IncompleteRecord {
        range: range.to_string(),
        row,
        detail: format!("{detail}: [{}]", shown.join(", ")),
    }
}
