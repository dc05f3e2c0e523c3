//! Turns finished threads into counts, then into the report's totals.

use chrono::{DateTime, FixedOffset};

use super::members::Roster;
use super::registry::{StatRegistry, StatValue};
use crate::config::{MergeRule, OrgConfig, StatsConfig};
use crate::error::{Result, StatsError};
use crate::ledger::{OpenInquiry, Reconciliation};
use crate::mail::Thread;

pub const USER_INQUIRIES: &str = "User Inquiries";
pub const DEMO_REQUESTS: &str = "Demo Requests";
pub const VOICEMAILS: &str = "Voicemails";
pub const TOTAL_PINGS: &str = "Total Pings";
pub const TOTAL_NON_PINGS: &str = "Total Non-Pings";
pub const OVERALL_TOTAL: &str = "Overall Total New Inquiries";
pub const NEW_OPEN: &str = "New Open Inquiries";
pub const NEW_CLOSED: &str = "New Closed Inquiries";
pub const EXISTING_CLOSED: &str = "Existing Open Inquiries Closed";
pub const TOTAL_OPEN: &str = "Total Open Inquiries";
pub const TOTAL_CLOSED: &str = "Total Closed Inquiries";
pub const SESSIONS: &str = "Total # of Sessions";
pub const SALES_CALLS: &str = "Total # of Sales Calls";
pub const DEMO_CALLS: &str = "Total # of Demo Calls";
pub const CATEGORY: &str = "Category";

/// Offsets from the header length for the ping band
const SALES_PINGS_OFFSET: f64 = 30.0;
const USER_INQUIRIES_OFFSET: f64 = 101.0;
const DEMO_REQUESTS_OFFSET: f64 = 102.0;
const NEW_ORGS_OFFSET: f64 = 103.0;
const VOICEMAILS_OFFSET: f64 = 104.0;
const TOTAL_PINGS_OFFSET: f64 = 105.0;

const TOTALS: [(&str, f64); 6] = [
    (OVERALL_TOTAL, 200.0),
    (NEW_OPEN, 201.0),
    (NEW_CLOSED, 202.0),
    (EXISTING_CLOSED, 203.0),
    (TOTAL_OPEN, 204.0),
    (TOTAL_CLOSED, 205.0),
];

/// Call volume entered by the operator for the period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallInfo {
    pub sessions: i64,
    pub sales_calls: i64,
    pub demo_calls: i64,
}

/// Per-thread outcome of the counting pass
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub new_open: i64,
    pub new_closed: i64,
    /// Counted sales pings that came in through the web forms
    pub web_form: i64,
    /// Newly open inquiries, for the ledger
    pub open: Vec<OpenInquiry>,
    pub counted: usize,
    /// Member increments dropped because the member has no column for the stat
    pub member_skips: usize,
}

/// Final totals, as they appear in the summary email
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total_pings: i64,
    pub total_non_pings: i64,
    pub sales_pings: i64,
    pub web_form: i64,
    pub overall: i64,
    pub new_open: i64,
    pub new_closed: i64,
    pub existing_closed: i64,
    pub total_open: i64,
    pub total_closed: i64,
    pub calls: CallInfo,
}

impl Summary {
    pub fn pings_less_sales(&self) -> i64 {
        self.total_pings - self.sales_pings
    }

    /// `"<sales pings>(<from web forms>)"`
    pub fn sales_inquiries(&self) -> String {
        format!("{}({})", self.sales_pings, self.web_form)
    }
}

/// Force every thread that started before `cutoff` out of the counts.
/// Returns how many were suppressed.
pub fn apply_cutoff(threads: &mut [Thread], cutoff: &DateTime<FixedOffset>) -> usize {
    let mut suppressed = 0;
    for thread in threads.iter_mut() {
        if thread.oldest_date.is_before(cutoff) {
            if thread.good {
                suppressed += 1;
            }
            thread.dont_count();
        }
    }
    if suppressed > 0 {
        tracing::info!(
            suppressed,
            cutoff = %cutoff.format("%m/%d/%Y"),
            "threads older than the cutoff will not count"
        );
    }
    suppressed
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    merges: Vec<MergeRule>,
    ping_categories: Vec<String>,
    excluded: Vec<String>,
    sales_ping_label: String,
    new_org_label: String,
}

impl Aggregator {
    pub fn new(org: &OrgConfig, stats: &StatsConfig) -> Self {
        Self {
            merges: stats.merges.clone(),
            ping_categories: stats.ping_categories.clone(),
            excluded: stats.excluded_from_inquiries.clone(),
            sales_ping_label: org.sales_ping_label.clone(),
            new_org_label: org.new_org_label.clone(),
        }
    }

    /// Register the ping buckets and total rows so counting has somewhere
    /// to land. Must run before `count`.
    pub fn prepare(&self, registry: &mut StatRegistry) {
        let n = registry.header_len() as f64;
        registry.place(&self.sales_ping_label, n + SALES_PINGS_OFFSET);
        registry.place(USER_INQUIRIES, n + USER_INQUIRIES_OFFSET);
        registry.place(DEMO_REQUESTS, n + DEMO_REQUESTS_OFFSET);
        registry.place(&self.new_org_label, n + NEW_ORGS_OFFSET);
        registry.place(VOICEMAILS, n + VOICEMAILS_OFFSET);
        for (name, priority) in TOTALS {
            registry.place(name, priority);
        }
    }

    fn is_ping_stat(&self, key: &str) -> bool {
        key == self.sales_ping_label
            || key == self.new_org_label
            || [USER_INQUIRIES, DEMO_REQUESTS, VOICEMAILS].contains(&key)
            || self.ping_categories.iter().any(|c| c == key)
    }

    /// The one ping counter a good ping thread lands in, and by how much
    fn ping_bucket<'a>(&'a self, thread: &Thread) -> Option<(&'a str, i64)> {
        if thread.inquiry {
            Some((USER_INQUIRIES, 1))
        } else if thread.demo {
            Some((DEMO_REQUESTS, 1))
        } else if thread.vm {
            Some((VOICEMAILS, i64::from(thread.message_count)))
        } else if thread.new_org {
            Some((self.new_org_label.as_str(), 1))
        } else if thread.sales_ping {
            Some((self.sales_ping_label.as_str(), 1))
        } else {
            None
        }
    }

    /// Count every good thread once under its winning category. Members
    /// are credited for every category the thread carries.
    pub fn count(
        &self,
        threads: &[Thread],
        registry: &mut StatRegistry,
        roster: &mut Roster,
    ) -> Tally {
        let mut tally = Tally::default();

        for thread in threads.iter().filter(|t| t.good) {
            if !thread.non_ping() {
                match self.ping_bucket(thread) {
                    Some((key, n)) => {
                        registry.add(key, n);
                        if key == self.sales_ping_label && thread.web_form {
                            tally.web_form += 1;
                        }
                        tally.counted += 1;
                    }
                    None => {
                        tracing::debug!(thread = %thread.id, "good ping thread matched no bucket")
                    }
                }
                continue;
            }

            let sorted = registry.sort_labels(&thread.stat_labels);
            let Some(winner) = sorted.first() else {
                continue;
            };
            if !registry.increment(winner) {
                tracing::warn!(
                    thread = %thread.id,
                    label = %winner,
                    "winning label is not a registered stat"
                );
                continue;
            }
            tally.counted += 1;

            if *winner == self.sales_ping_label && thread.web_form {
                tally.web_form += 1;
            }
            if !self.excluded.iter().any(|e| e == winner) {
                if thread.closed {
                    tally.new_closed += 1;
                } else {
                    tally.new_open += 1;
                    tally.open.push(OpenInquiry::new(thread.id.clone(), thread.subject.clone()));
                }
            }

            for name in &thread.member_labels {
                let Some(member) = roster.member_mut(name) else {
                    tracing::warn!(member = %name, "member label has no roster entry");
                    continue;
                };
                for label in &sorted {
                    let credited = registry
                        .get(label)
                        .and_then(|s| s.column)
                        .is_some_and(|column| member.increment_stat(column));
                    if !credited {
                        tracing::warn!(
                            member = %name,
                            label = %label,
                            columns = member.stats.len(),
                            "member has no column for stat, skipping"
                        );
                        tally.member_skips += 1;
                    }
                }
            }
        }

        tracing::info!(
            counted = tally.counted,
            new_open = tally.new_open,
            new_closed = tally.new_closed,
            "counted threads"
        );
        tally
    }

    /// Merge near-duplicate categories, then derive every total, spacer and
    /// header row. Order matters: totals read the merged counts.
    pub fn format(
        &self,
        registry: &mut StatRegistry,
        tally: &Tally,
        reconciliation: Reconciliation,
        calls: CallInfo,
        run_date: &str,
    ) -> Result<Summary> {
        for rule in &self.merges {
            if !registry.merge(&rule.into, &rule.sources) {
                tracing::debug!(into = %rule.into, "no source stats to merge");
            }
        }

        let categories: Vec<(i64, f64)> = registry
            .iter()
            .filter(|s| s.column.is_some() && !self.is_ping_stat(&s.key))
            .map(|s| (s.count(), s.priority))
            .collect();
        let total_non_pings: i64 = categories.iter().map(|(n, _)| n).sum();
        let last_category = categories
            .iter()
            .map(|(_, p)| *p)
            .reduce(f64::max)
            .unwrap_or(registry.header_len() as f64 - 1.0);
        registry.insert(
            TOTAL_NON_PINGS,
            TOTAL_NON_PINGS,
            StatValue::Count(total_non_pings),
            last_category + 0.5,
        );
        registry.spacer("spacer-non-pings", last_category + 0.6);
        registry.insert("category-pings", CATEGORY, StatValue::Blank, last_category + 0.7);

        let sales_pings = require(registry, &self.sales_ping_label)?;
        let mut total_pings = sales_pings;
        for key in [USER_INQUIRIES, DEMO_REQUESTS, VOICEMAILS, self.new_org_label.as_str()] {
            total_pings += require(registry, key)?;
        }
        for key in &self.ping_categories {
            total_pings += registry.count(key);
        }
        if let Some(stat) = registry.get_mut(&self.sales_ping_label) {
            stat.value = StatValue::Text(format!("{}({})", sales_pings, tally.web_form));
        }

        let ping_priority = registry.header_len() as f64 + TOTAL_PINGS_OFFSET;
        registry.insert(TOTAL_PINGS, TOTAL_PINGS, StatValue::Count(total_pings), ping_priority);
        registry.spacer("spacer-pings-1", ping_priority + 0.1);
        registry.spacer("spacer-pings-2", ping_priority + 0.2);

        let existing_closed = reconciliation.existing_closed as i64;
        let summary = Summary {
            total_pings,
            total_non_pings,
            sales_pings,
            web_form: tally.web_form,
            overall: total_pings + total_non_pings,
            new_open: tally.new_open,
            new_closed: tally.new_closed,
            existing_closed,
            total_open: tally.new_open + reconciliation.still_open as i64,
            total_closed: tally.new_closed + existing_closed,
            calls,
        };

        let values = [
            summary.overall,
            summary.new_open,
            summary.new_closed,
            summary.existing_closed,
            summary.total_open,
            summary.total_closed,
        ];
        for ((name, priority), value) in TOTALS.into_iter().zip(values) {
            registry.insert(name, name, StatValue::Count(value), priority);
        }
        registry.spacer("spacer-closed", TOTALS[5].1 + 0.3);

        registry.insert(SESSIONS, SESSIONS, StatValue::Count(calls.sessions), 300.0);
        registry.insert(SALES_CALLS, SALES_CALLS, StatValue::Count(calls.sales_calls), 301.0);
        registry.insert(DEMO_CALLS, DEMO_CALLS, StatValue::Count(calls.demo_calls), 302.0);
        registry.insert(CATEGORY, CATEGORY, StatValue::Text(run_date.to_string()), -1.0);

        tracing::info!(
            pings = summary.total_pings,
            non_pings = summary.total_non_pings,
            open = summary.total_open,
            closed = summary.total_closed,
            "totals computed"
        );
        Ok(summary)
    }
}

fn require(registry: &StatRegistry, key: &str) -> Result<i64> {
    registry
        .get(key)
        .map(|s| s.count())
        .ok_or_else(|| StatsError::MissingStat(key.to_string()))
}
