//! Rendering of the finished registry: the sheet column, the summary email
//! and the notifier that delivers it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{Result, StatsError};
use crate::sheet::{CellValue, to_serial};
use crate::stats::{
    CATEGORY, EXISTING_CLOSED, NEW_CLOSED, NEW_OPEN, OVERALL_TOTAL, StatRegistry, Summary,
    TOTAL_CLOSED, TOTAL_NON_PINGS, TOTAL_OPEN, TOTAL_PINGS,
};

/// Rows the report cannot be written without
const REQUIRED: [&str; 9] = [
    CATEGORY,
    TOTAL_NON_PINGS,
    TOTAL_PINGS,
    OVERALL_TOTAL,
    NEW_OPEN,
    NEW_CLOSED,
    EXISTING_CLOSED,
    TOTAL_OPEN,
    TOTAL_CLOSED,
];

#[derive(Debug, Clone)]
pub struct Report {
    pub subject: String,
    pub text: String,
    pub html: String,
    /// Values for the weekly sheet, top to bottom
    pub column: Vec<CellValue>,
}

#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub run_date: NaiveDate,
    /// Start of the reporting period
    pub cutoff: NaiveDate,
    pub recipient: &'a str,
    pub sales_ping_label: &'a str,
}

impl Report {
    pub fn build(
        registry: &StatRegistry,
        summary: &Summary,
        ctx: &ReportContext<'_>,
    ) -> Result<Self> {
        for key in REQUIRED.iter().copied().chain(std::iter::once(ctx.sales_ping_label)) {
            if !registry.contains(key) {
                return Err(StatsError::MissingStat(key.to_string()));
            }
        }

        Ok(Self {
            subject: format!("Stats as of {}", ctx.run_date.format("%m/%d/%Y")),
            text: text_summary(summary, ctx),
            html: html_table(registry),
            column: column_values(registry, ctx.run_date),
        })
    }
}

/// Every stat's value in priority order; the header row carries the run date
pub fn column_values(registry: &StatRegistry, run_date: NaiveDate) -> Vec<CellValue> {
    registry
        .sorted()
        .into_iter()
        .map(|stat| {
            if stat.key == CATEGORY {
                CellValue::Date(to_serial(run_date.and_hms_opt(0, 0, 0).unwrap_or_default()))
            } else {
                stat.value.to_cell()
            }
        })
        .collect()
}

fn greeting_name(recipient: &str) -> String {
    let local = recipient.split('@').next().unwrap_or_default();
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn text_summary(summary: &Summary, ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    let s = summary;
    let _ = writeln!(out, "{},\n", greeting_name(ctx.recipient));
    let _ = writeln!(
        out,
        "Below are the requested statistics from {} to {}:\n",
        ctx.cutoff.format("%A, %m/%d/%Y"),
        ctx.run_date.format("%A, %m/%d/%Y")
    );
    let _ = writeln!(
        out,
        "Pings (includes New Organizations; does not include Sales Pings): {}",
        s.pings_less_sales()
    );
    let _ = writeln!(out, "Non-Pings: {}", s.total_non_pings);
    let _ = writeln!(out, "Sales Inquiries: {}", s.sales_inquiries());
    let _ = writeln!(out, "Overall Total New Inquiries: {}\n", s.overall);

    let _ = writeln!(out, "Total New Inquiries (Non-Pings) Currently Open: {}", s.new_open);
    let _ = writeln!(out, "Total New Inquiries (Non-Pings) Closed: {}", s.new_closed);
    let _ = writeln!(out, "Total Existing Open Inquiries Closed: {}", s.existing_closed);
    let _ = writeln!(out, "Total Open Inquiries: {}", s.total_open);
    let _ = writeln!(out, "Total Closed Inquiries: {}\n", s.total_closed);

    let _ = writeln!(out, "Total # of Sessions: {}", s.calls.sessions);
    let _ = writeln!(out, "Total # of Sales Calls: {}", s.calls.sales_calls);
    let _ = writeln!(out, "Total # of Demo Calls: {}\n", s.calls.demo_calls);

    out.push_str("Let me know if you have any questions. Thanks!\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn html_table(registry: &StatRegistry) -> String {
    let mut out = String::from("<table>\n");
    for stat in registry.sorted() {
        let _ = writeln!(
            out,
            "  <tr><td>{}</td><td>{}</td></tr>",
            escape(&stat.name),
            escape(&stat.value.to_string())
        );
    }
    out.push_str("</table>\n");
    out
}

/// Delivers the finished report
pub trait Notifier {
    fn send(&mut self, to: &str, report: &Report) -> Result<()>;
}

/// Writes the email to disk for a person to paste and send
#[derive(Debug, Clone)]
pub struct FileNotifier {
    dir: PathBuf,
    stamp: String,
    written: Vec<PathBuf>,
}

impl FileNotifier {
    pub fn new(dir: &Path, run_date: NaiveDate) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stamp: run_date.format("%Y_%m_%d").to_string(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl Notifier for FileNotifier {
    fn send(&mut self, to: &str, report: &Report) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let text_path = self.dir.join(format!("stats_email_{}.txt", self.stamp));
        let body = format!("To: {to}\nSubject: {}\n\n{}", report.subject, report.text);
        std::fs::write(&text_path, body)?;

        let html_path = self.dir.join(format!("stats_email_{}.html", self.stamp));
        std::fs::write(&html_path, &report.html)?;

        tracing::info!(path = %text_path.display(), "wrote stats email");
        self.written.push(text_path);
        self.written.push(html_path);
        Ok(())
    }
}
