//! One reporting run, from raw mail to the written sheet, email and ledger.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::config::{expand, Config};
use crate::confirm::{Confirmer, CountMode};
use crate::error::{Result, StatsError};
use crate::ledger::Ledger;
use crate::mail::{LabelClassifier, MailSource, Normalizer, RawMessage, ThreadBook, ThreadRules};
use crate::report::{Notifier, Report, ReportContext};
use crate::sheet::{CellValue, JsonWorkbook, SheetStore};
use crate::stats::{apply_cutoff, Aggregator, CallInfo, Roster, StatRegistry, Summary};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Threads whose first counted message is older than this do not count
    pub cutoff: DateTime<FixedOffset>,
    pub run_date: NaiveDate,
    /// Load reference data and the ledger but count nothing
    pub skip: bool,
    /// Log every N-th message; 0 disables
    pub print_every: usize,
    pub test: bool,
    pub calls: CallInfo,
}

/// The outside world a run talks to
pub struct Collaborators<'a> {
    /// Messages of the reporting period
    pub mail: &'a dyn MailSource,
    /// Current inbox snapshot, used to detect closed inquiries
    pub inbox: &'a dyn MailSource,
    pub store: &'a mut dyn SheetStore,
    pub notifier: &'a mut dyn Notifier,
    pub confirmer: Confirmer,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub messages: usize,
    pub threads: usize,
    pub summary: Option<Summary>,
    pub report_subject: Option<String>,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    normalizer: Normalizer,
    aggregator: Aggregator,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            normalizer: Normalizer::new(&config.org),
            aggregator: Aggregator::new(&config.org, &config.stats),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        expand(&self.config.run.ledger)
    }

    pub fn run(&self, options: &RunOptions, mut io: Collaborators<'_>) -> Result<RunOutcome> {
        tracing::info!(
            mode = ?io.confirmer.mode(),
            cutoff = %options.cutoff.format("%m/%d/%Y"),
            test = options.test,
            "starting stats run"
        );
        let sheets = self.config.sheets_for(options.test);
        let (mut roster, mut registry) =
            Roster::load(&*io.store, sheets, self.normalizer.offset())?;
        tracing::info!(labels = ?registry.header_labels(), "stats to be determined");

        let classifier = LabelClassifier::new(registry.header_labels(), roster.member_names());
        let rules = ThreadRules::new(&self.config.org, classifier);

        let inbox = io.inbox.messages()?;
        let ledger_path = self.ledger_path();
        let mut ledger = match Ledger::load(&ledger_path) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!(
                    path = %ledger_path.display(),
                    error = %e,
                    "open inquiry ledger unusable, rebuilding from inbox"
                );
                self.rebuild_ledger(&inbox, &rules)?
            }
        };
        tracing::info!(tracked = ledger.len(), "open inquiries carried over");

        if options.skip {
            tracing::info!("skip mode: no threads will be counted");
            return Ok(RunOutcome::default());
        }

        let raw = io.mail.messages()?;
        let mut book = ThreadBook::new();
        for (i, record) in raw.iter().enumerate() {
            let message = self.normalizer.normalize(record);
            roster.note_message(&message, &self.config.org.check_in_label);
            book.fold(&message, &rules, &mut io.confirmer)?;

            if options.print_every > 0 && i % options.print_every == 0 {
                tracing::info!(
                    n = i,
                    thread = %message.thread_id,
                    from = %message.from_address,
                    subject = %message.subject,
                    date = %message.timestamp,
                    "processing"
                );
            }
        }

        let mut threads = book.into_threads();
        apply_cutoff(&mut threads, &options.cutoff);
        for thread in &threads {
            roster.note_thread(thread);
        }

        self.aggregator.prepare(&mut registry);
        let tally = self.aggregator.count(&threads, &mut registry, &mut roster);

        let inbox_ids: HashSet<String> = inbox
            .iter()
            .map(|r| self.normalizer.normalize(r).thread_id)
            .collect();
        let reconciliation = ledger.reconcile(tally.open.iter().cloned(), &inbox_ids);
        tracing::info!(
            still_open = reconciliation.still_open,
            closed = reconciliation.existing_closed,
            "reconciled open inquiries"
        );

        let run_date = options.run_date.format("%m/%d/%Y").to_string();
        let summary = self
            .aggregator
            .format(&mut registry, &tally, reconciliation, options.calls, &run_date)?;

        let ctx = ReportContext {
            run_date: options.run_date,
            cutoff: options.cutoff.date_naive(),
            recipient: &self.config.run.report_to,
            sales_ping_label: &self.config.org.sales_ping_label,
        };
        let report = Report::build(&registry, &summary, &ctx)?;

        if let Err(e) = self.write_sheets(&mut *io.store, &report, &roster, options) {
            let fallback = self.write_fallback(&report, &roster, &registry, options.run_date);
            match fallback {
                Ok(path) => tracing::error!(
                    path = %path.display(),
                    "sheet store failed, results saved locally"
                ),
                Err(ref fe) => tracing::error!(
                    error = %fe,
                    "sheet store failed and the local copy could not be written"
                ),
            }
            return Err(e);
        }
        io.notifier.send(&self.config.run.report_to, &report)?;

        // Last, so a failed run can be repeated against the same ledger
        ledger.save(&ledger_path)?;

        Ok(RunOutcome {
            messages: raw.len(),
            threads: threads.len(),
            summary: Some(summary),
            report_subject: Some(report.subject),
        })
    }

    /// Derive the open set from the inbox alone, counting every ambiguous thread
    fn rebuild_ledger(&self, inbox: &[RawMessage], rules: &ThreadRules) -> Result<Ledger> {
        let mut confirmer = Confirmer::unattended(CountMode::CountAll);
        let mut book = ThreadBook::new();
        for record in inbox {
            book.fold(&self.normalizer.normalize(record), rules, &mut confirmer)?;
        }
        let ledger = Ledger::from_threads(book.threads());
        tracing::info!(open = ledger.len(), "rebuilt open inquiries from inbox");
        Ok(ledger)
    }

    fn write_sheets(
        &self,
        store: &mut dyn SheetStore,
        report: &Report,
        roster: &Roster,
        options: &RunOptions,
    ) -> Result<()> {
        let sheets = self.config.sheets_for(options.test);
        store.insert_column(&sheets.weekly_sheet, sheets.insert_column, &report.column)?;
        store.replace_rows(&sheets.member_sheet, roster.member_rows())?;
        store.replace_rows(&sheets.admin_sheet, roster.admin_rows())?;
        tracing::info!(
            sheet = %sheets.weekly_sheet,
            rows = report.column.len(),
            "wrote weekly stats"
        );
        Ok(())
    }

    /// Keep the results when the store is down
    fn write_fallback(
        &self,
        report: &Report,
        roster: &Roster,
        registry: &StatRegistry,
        run_date: NaiveDate,
    ) -> Result<PathBuf> {
        let dir = expand(&self.config.run.output_dir);
        let path = dir.join(format!("stats_{}.json", run_date.format("%Y_%m_%d")));
        let mut book = JsonWorkbook::create(&path);

        let weekly = registry
            .sorted()
            .iter()
            .zip(&report.column)
            .map(|(stat, value)| vec![CellValue::text(stat.name.clone()), value.clone()])
            .collect();
        book.set_sheet("weekly", weekly)?;
        book.set_sheet("members", roster.member_rows())?;
        book.set_sheet("admins", roster.admin_rows())?;
        Ok(book.path().to_path_buf())
    }
}

/// Open the configured workbook for this run
pub fn open_store(config: &Config, test: bool) -> Result<JsonWorkbook> {
    let path = expand(&config.sheets_for(test).workbook);
    if !path.exists() {
        return Err(StatsError::store(path.display().to_string(), "workbook does not exist"));
    }
    JsonWorkbook::open(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::testing::ScriptedPort;
    use std::path::Path;

    struct Recorder {
        sent: Vec<(String, String)>,
    }

    impl Notifier for Recorder {
        fn send(&mut self, to: &str, report: &Report) -> Result<()> {
            self.sent.push((to.to_string(), report.text.clone()));
            Ok(())
        }
    }

    fn t(s: &str) -> CellValue {
        CellValue::text(s)
    }

    const SUPPORT: &str = "support@irbnet.org";

    fn raw(
        thread: &str,
        from: &str,
        to: &str,
        subject: &str,
        date: &str,
        labels: &str,
    ) -> RawMessage {
        RawMessage::new()
            .with("X-GM-THRID", thread)
            .with("From", from)
            .with("To", to)
            .with("Subject", subject)
            .with("Date", date)
            .with("X-Gmail-Labels", labels)
    }

    fn setup(dir: &Path) -> (Config, JsonWorkbook) {
        let mut config = Config::default();
        config.run.ledger = dir.join("open.txt").display().to_string();
        config.run.output_dir = dir.join("out").display().to_string();
        config.sheets.workbook = dir.join("book.json").display().to_string();

        let mut book = JsonWorkbook::create(&dir.join("book.json"));
        book.set_sheet(
            "Member Stats",
            vec![
                vec![t("Member"), t("Last Contact"), t("Check In"), t("Reports"), t("Issue")],
                vec![t("UVA"), t("01/02/2024"), t(""), t("0"), t("0")],
            ],
        )
        .unwrap();
        book.set_named_range("short_names", vec![vec![t("UVA")]]).unwrap();
        book.set_sheet("Support Outreach Administrators", vec![vec![t("Org")]])
            .unwrap();
        book.set_sheet("Weekly Support Stats", vec![vec![t("Category")]])
            .unwrap();
        (config, book)
    }

    fn options() -> RunOptions {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        RunOptions {
            cutoff: crate::mail::MailDate::parse("01/11/2024", offset)
                .as_datetime()
                .unwrap(),
            run_date: NaiveDate::from_ymd_opt(2024, 1, 18).unwrap(),
            skip: false,
            print_every: 0,
            test: false,
            calls: CallInfo::default(),
        }
    }

    #[test]
    fn test_full_run() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut book) = setup(dir.path());
        let previous = "100\nold question\nOpen\nY\n101\nanswered\nOpen\nY\n";
        std::fs::write(dir.path().join("open.txt"), previous).unwrap();

        let mail = vec![
            raw(
                "1",
                "Jane <jane@uva.edu>",
                SUPPORT,
                "Login",
                "01/15/2024",
                "Issue,UVA,Waiting on Member",
            ),
            raw("1", "support@irbnet.org", "jane@uva.edu", "RE: Login", "01/15/2024", "Issue"),
            raw("2", "sam@duke.edu", "support@irbnet.org", "Report", "01/16/2024", "Reports,UVA"),
            raw("3", "noreply@irbnet.org", SUPPORT, "IRBNet Inquiry From Kim", "01/16/2024", ""),
            raw("3", "kim@yale.edu", SUPPORT, "RE: IRBNet Inquiry From Kim", "01/17/2024", ""),
            raw("4", "old@uva.edu", "support@irbnet.org", "Ancient", "01/02/2024", "Issue"),
        ];
        let inbox = vec![
            raw("1", "", "", "Login", "", ""),
            raw("100", "", "", "old question", "", ""),
        ];
        let mut notifier = Recorder { sent: Vec::new() };
        let confirmer = ScriptedPort::answering(&[]).confirmer(CountMode::CountAll);

        let pipeline = Pipeline::new(&config);
        let outcome = pipeline
            .run(
                &options(),
                Collaborators {
                    mail: &mail,
                    inbox: &inbox,
                    store: &mut book,
                    notifier: &mut notifier,
                    confirmer,
                },
            )
            .unwrap();

        assert_eq!(outcome.messages, 6);
        assert_eq!(outcome.threads, 4);
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.total_non_pings, 2);
        assert_eq!(summary.total_pings, 1);
        assert_eq!(summary.new_open, 1);
        assert_eq!(summary.new_closed, 1);
        assert_eq!(summary.existing_closed, 1);
        assert_eq!(summary.total_open, 2);

        assert_eq!(notifier.sent.len(), 1);
        assert!(notifier.sent[0].1.contains("Total Open Inquiries: 2\n"));

        let weekly = book.read_range("Weekly Support Stats").unwrap();
        assert_eq!(weekly[0].len(), 2);

        let members = book.read_range("Member Stats").unwrap();
        assert_eq!(members[1][3], CellValue::Number(1.0));
        assert_eq!(members[1][4], CellValue::Number(1.0));

        let ledger = Ledger::load(&dir.path().join("open.txt")).unwrap();
        let ids: Vec<&str> = ledger.entries().iter().map(|e| e.inquiry.id.as_str()).collect();
        assert_eq!(ids, vec!["100", "1"]);
    }

    #[test]
    fn test_missing_ledger_is_rebuilt_and_skip_counts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (config, mut book) = setup(dir.path());
        let inbox = vec![raw("9", "jane@uva.edu", SUPPORT, "Help", "01/15/2024", "Issue,To Call")];
        let mut notifier = Recorder { sent: Vec::new() };
        let mut opts = options();
        opts.skip = true;

        let outcome = Pipeline::new(&config)
            .run(
                &opts,
                Collaborators {
                    mail: &Vec::<RawMessage>::new(),
                    inbox: &inbox,
                    store: &mut book,
                    notifier: &mut notifier,
                    confirmer: Confirmer::unattended(CountMode::CountNone),
                },
            )
            .unwrap();
        assert!(outcome.summary.is_none());
        assert!(notifier.sent.is_empty());
        assert!(!dir.path().join("open.txt").exists());
    }

    #[test]
    fn test_rebuild_counts_open_non_pings() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _) = setup(dir.path());
        let pipeline = Pipeline::new(&config);
        let rules = ThreadRules::new(&config.org, LabelClassifier::new(["Issue"], ["UVA"]));
        let inbox = vec![
            raw("9", "pat@irbnet.org", SUPPORT, "Internal", "01/15/2024", "Issue,To Call"),
            raw("10", "jane@uva.edu", "support@irbnet.org", "Done", "01/15/2024", "Issue"),
            raw("11", "kim@yale.edu", SUPPORT, "Ping", "01/15/2024", "Waiting on Member"),
        ];
        let ledger = pipeline.rebuild_ledger(&inbox, &rules).unwrap();
        let ids: Vec<&str> = ledger.entries().iter().map(|e| e.inquiry.id.as_str()).collect();
        assert_eq!(ids, vec!["9"]);
    }

    #[test]
    fn test_store_failure_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (config, book) = setup(dir.path());
        // no admin sheet to replace rows in
        let mut book_without_admins = JsonWorkbook::create(&dir.path().join("book2.json"));
        for sheet in ["Member Stats", "Weekly Support Stats"] {
            book_without_admins
                .set_sheet(sheet, book.sheet(sheet).unwrap().to_vec())
                .unwrap();
        }
        book_without_admins
            .set_named_range("short_names", vec![vec![t("UVA")]])
            .unwrap();
        book_without_admins
            .set_named_range("Support Outreach Administrators", vec![vec![t("Org")]])
            .unwrap();

        let mut notifier = Recorder { sent: Vec::new() };
        let result = Pipeline::new(&config).run(
            &options(),
            Collaborators {
                mail: &Vec::<RawMessage>::new(),
                inbox: &Vec::<RawMessage>::new(),
                store: &mut book_without_admins,
                notifier: &mut notifier,
                confirmer: Confirmer::unattended(CountMode::CountAll),
            },
        );
        assert!(matches!(result, Err(StatsError::StoreUnavailable { .. })));
        assert!(notifier.sent.is_empty());
        assert!(dir.path().join("out/stats_2024_01_18.json").exists());
        assert!(!dir.path().join("open.txt").exists());
    }
}
