use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use clap::{ArgGroup, Parser};

use support_stats::config::{expand, Config};
use support_stats::confirm::{Confirmer, CountMode};
use support_stats::error::StatsError;
use support_stats::mail::{MailDate, MailSource, MboxSource, Normalizer, RawMessage};
use support_stats::pipeline::{open_store, Collaborators, Pipeline, RunOptions};
use support_stats::report::FileNotifier;
use support_stats::stats::CallInfo;

#[derive(Parser)]
#[command(name = "support-stats", version, about = "Run weekly support stats")]
#[command(group(ArgGroup::new("counting").args(["all", "none", "skip"])))]
struct Cli {
    /// mbox file, or a directory of them, for which stats will be gathered
    mbox: PathBuf,

    /// mbox snapshot of the current inbox, used to find closed inquiries
    #[arg(long)]
    inbox: Option<PathBuf>,

    /// Start of the reporting period (e.g. 01/11/2024)
    #[arg(long)]
    cutoff: String,

    /// Date the stats are reported as of; defaults to today
    #[arg(long)]
    end: Option<String>,

    /// Count all internal threads
    #[arg(short, long)]
    all: bool,

    /// Count no internal threads
    #[arg(short, long)]
    none: bool,

    /// Skip thread counting. Use to test other parts of the run
    #[arg(short, long)]
    skip: bool,

    /// Print every i-th email read
    #[arg(short = 'i', default_value = "0")]
    print_every: usize,

    /// Use test sheets rather than production sheets
    #[arg(short, long)]
    test: bool,

    /// Sessions held this period
    #[arg(long, default_value = "0")]
    sessions: i64,

    /// Sales calls made this period
    #[arg(long, default_value = "0")]
    sales_calls: i64,

    /// Demo calls given this period
    #[arg(long, default_value = "0")]
    demo_calls: i64,

    /// Config file (defaults to ~/.config/support-stats/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> CountMode {
        if self.all {
            CountMode::CountAll
        } else if self.none {
            CountMode::CountNone
        } else {
            CountMode::Interactive
        }
    }
}

fn parse_date(s: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    MailDate::parse(s, offset)
        .as_datetime()
        .ok_or_else(|| StatsError::InvalidDate(s.to_string()).into())
}

fn open_mbox(path: &Path) -> Result<MboxSource> {
    MboxSource::open(path).with_context(|| format!("opening {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let offset = Normalizer::new(&config.org).offset();

    let cutoff = parse_date(&cli.cutoff, offset).context("--cutoff")?;
    let run_date: NaiveDate = match &cli.end {
        Some(end) => parse_date(end, offset).context("--end")?.date_naive(),
        None => Local::now().date_naive(),
    };

    let mail = open_mbox(&cli.mbox)?;
    tracing::info!(files = mail.files().len(), "stats file(s) found");
    let inbox: Box<dyn MailSource> = match &cli.inbox {
        Some(path) => Box::new(open_mbox(path)?),
        None => {
            tracing::warn!("no inbox snapshot given, every tracked inquiry will read as closed");
            Box::new(Vec::<RawMessage>::new())
        }
    };

    let mut store = open_store(&config, cli.test).context("opening workbook")?;
    let mut notifier = FileNotifier::new(&expand(&config.run.output_dir), run_date);

    let options = RunOptions {
        cutoff,
        run_date,
        skip: cli.skip,
        print_every: cli.print_every,
        test: cli.test,
        calls: CallInfo {
            sessions: cli.sessions,
            sales_calls: cli.sales_calls,
            demo_calls: cli.demo_calls,
        },
    };

    let outcome = Pipeline::new(&config).run(
        &options,
        Collaborators {
            mail: &mail,
            inbox: inbox.as_ref(),
            store: &mut store,
            notifier: &mut notifier,
            confirmer: Confirmer::terminal(cli.mode()),
        },
    )?;

    match outcome.report_subject {
        Some(subject) => {
            println!("{subject}: {} messages in {} threads", outcome.messages, outcome.threads);
            for path in notifier.written() {
                println!("  {}", path.display());
            }
        }
        None => println!("Nothing counted"),
    }
    Ok(())
}
